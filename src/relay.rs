//! Relay service: the datagram-channel receive loop that authenticates each
//! chat datagram by (room, token) and fans it out to the room's other
//! bound members.
//!
//! Lazy address binding is the subtle contract this module exists to
//! preserve: the admission phase never learns a client's UDP source port,
//! so the relay records (and, on NAT rebinding, updates) a member's
//! datagram address from the source address of its first — and every
//! subsequent — valid chat datagram. Nothing outside this module ever
//! writes to a member's address.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::frame::{ChatFrame, ProtocolError, MAX_DATAGRAM_SIZE, UNAUTHORIZED_REPLY};
use crate::registry::{Registry, RegistryError};

/// How often the relay loop wakes up to check the shutdown flag when there
/// is nothing to receive.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub struct RelayService {
    registry: Arc<Registry>,
}

impl RelayService {
    pub fn new(registry: Arc<Registry>) -> Self {
        RelayService { registry }
    }

    /// Runs the receive loop until `shutdown` is set. Single receive queue,
    /// one datagram processed at a time, per spec.md §4.4. A per-datagram
    /// failure (malformed frame, unauthorized token, poisoned registry) is
    /// logged and the loop continues; only a failure to set up the socket
    /// itself is fatal.
    pub fn run(&self, socket: UdpSocket, shutdown: Arc<AtomicBool>) -> Result<(), RelayError> {
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
        log::info!("relay service listening on {}", socket.local_addr()?);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while !shutdown.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((len, src)) => {
                    if let Err(e) = self.handle_datagram(&socket, &buf[..len], src) {
                        log::warn!("relay: dropping datagram from {src}: {e}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => log::error!("relay: receive error: {e}"),
            }
        }
        log::info!("relay service shutting down");
        Ok(())
    }

    fn handle_datagram(&self, socket: &UdpSocket, bytes: &[u8], src: SocketAddr) -> Result<(), RelayError> {
        let frame = ChatFrame::decode(bytes)?;
        let room_name = frame.room_name.as_bytes();

        let Some(_member) = self.registry.authenticate(room_name, &frame.token)? else {
            log::warn!("relay: unauthorized datagram from {src} for room {:?}", frame.room_name);
            send_best_effort(socket, UNAUTHORIZED_REPLY, src);
            return Ok(());
        };

        // Lazy binding: record (or update, on rebinding) the sender's
        // datagram address from the source of this datagram.
        self.registry.bind_address(room_name, &frame.token, src)?;

        let outbound = ChatFrame::new(frame.room_name.clone(), frame.token.clone(), frame.message.clone());
        let encoded = outbound.encode();

        // Snapshot recipients under the registry lock, then release it
        // before sending: a slow or blocked send must never stall the
        // admission service, which shares this same lock.
        let recipients = self.registry.members_except(room_name, &frame.token)?;
        for recipient in recipients {
            if let Some(addr) = recipient.addr {
                send_best_effort(socket, &encoded, addr);
            }
        }
        Ok(())
    }
}

/// Sends one datagram, logging (never propagating) a failure. A per-recipient
/// send failure must not affect delivery to any other recipient.
fn send_best_effort(socket: &UdpSocket, bytes: &[u8], addr: SocketAddr) {
    if let Err(e) = socket.send_to(bytes, addr) {
        log::warn!("relay: failed to send to {addr}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChatFrame;
    use std::net::IpAddr;
    use std::thread;

    fn spawn_relay(registry: Arc<Registry>) -> (SocketAddr, Arc<AtomicBool>, thread::JoinHandle<Result<(), RelayError>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let service = RelayService::new(registry);
        let handle = thread::spawn(move || service.run(socket, shutdown_clone));
        (addr, shutdown, handle)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn fanout_reaches_other_bound_members_only() {
        let registry = Arc::new(Registry::new());
        let host_token = registry.create(b"party", ip("127.0.0.1")).unwrap();
        let guest_token = registry.join(b"party", ip("127.0.0.1")).unwrap();

        let (relay_addr, shutdown, handle) = spawn_relay(Arc::clone(&registry));

        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        a.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        b.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        // A speaks first: binds A's address, but B is not bound yet so no fanout.
        let frame_a = ChatFrame::new("party", host_token.clone(), "hello");
        a.send_to(&frame_a.encode(), relay_addr).unwrap();
        thread::sleep(Duration::from_millis(100));

        // B speaks: binds B's address and fans out to A (the only other bound member).
        let frame_b = ChatFrame::new("party", guest_token.clone(), "hi");
        b.send_to(&frame_b.encode(), relay_addr).unwrap();

        let mut buf = [0u8; 4096];
        let (len, _) = a.recv_from(&mut buf).unwrap();
        let received = ChatFrame::decode(&buf[..len]).unwrap();
        assert_eq!(received.token, guest_token);
        assert_eq!(received.message, "hi");

        // B should receive nothing from its own send (no self-delivery).
        assert!(b.set_read_timeout(Some(Duration::from_millis(200))).is_ok());
        assert!(b.recv_from(&mut buf).is_err());

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn unauthorized_token_gets_reply_and_no_state_change() {
        let registry = Arc::new(Registry::new());
        registry.create(b"party", ip("127.0.0.1")).unwrap();
        registry.join(b"party", ip("127.0.0.1")).unwrap();

        let (relay_addr, shutdown, handle) = spawn_relay(Arc::clone(&registry));

        let e = UdpSocket::bind("127.0.0.1:0").unwrap();
        e.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let frame = ChatFrame::new("party", b"xxxxx".to_vec(), "boom");
        e.send_to(&frame.encode(), relay_addr).unwrap();

        let mut buf = [0u8; 4096];
        let (len, _) = e.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], UNAUTHORIZED_REPLY);
        assert_eq!(registry.member_count(b"party").unwrap(), Some(2));

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn malformed_datagram_is_dropped_silently() {
        let registry = Arc::new(Registry::new());
        registry.create(b"party", ip("127.0.0.1")).unwrap();

        let (relay_addr, shutdown, handle) = spawn_relay(Arc::clone(&registry));

        let e = UdpSocket::bind("127.0.0.1:0").unwrap();
        e.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        e.send_to(&[5u8, 5, 0], relay_addr).unwrap();

        let mut buf = [0u8; 4096];
        assert!(e.recv_from(&mut buf).is_err());
        assert_eq!(registry.member_count(b"party").unwrap(), Some(1));

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn address_rebinding_on_nat_change() {
        let registry = Arc::new(Registry::new());
        let token = registry.create(b"party", ip("127.0.0.1")).unwrap();
        registry.bind_address(b"party", &token, "10.0.0.2:40000".parse().unwrap()).unwrap();
        registry.bind_address(b"party", &token, "10.0.0.2:40001".parse().unwrap()).unwrap();
        let member = registry.authenticate(b"party", &token).unwrap().unwrap();
        assert_eq!(member.addr, Some("10.0.0.2:40001".parse().unwrap()));
    }
}
