//! Admission service: the stream-channel accept loop that handles CREATE and
//! JOIN requests, mints tokens, mutates the registry, and replies.
//!
//! One thread runs the accept loop; each accepted connection is handled on
//! its own short-lived thread (spec.md §4.3's state machine: ACCEPTED ->
//! DECODED -> {REPLIED_OK, REPLIED_FAIL} -> CLOSED, with read errors and
//! timeouts also routing straight to CLOSED). The admission socket is never
//! held open across requests.

use std::io::{self, Read, Write};
use std::net::{IpAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::frame::{AdmissionFrame, AdmissionOperation, AdmissionReply, ProtocolError, MAX_ADMISSION_FRAME_SIZE};
use crate::registry::{Registry, RegistryError};

/// How long a connection may sit without sending a complete admission frame
/// before the service gives up on it. Spec.md §5 recommends "a few seconds".
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the accept loop wakes up to check the shutdown flag when the
/// listener has nothing to accept. Mirrors the source's 1-second
/// `settimeout` poll.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub struct AdmissionService {
    registry: Arc<Registry>,
}

impl AdmissionService {
    pub fn new(registry: Arc<Registry>) -> Self {
        AdmissionService { registry }
    }

    /// Runs the accept loop until `shutdown` is set. Each connection is
    /// handled on its own thread; the accept loop itself never blocks on a
    /// connection handler.
    pub fn run(&self, listener: TcpListener, shutdown: Arc<AtomicBool>) -> io::Result<()> {
        listener.set_nonblocking(true)?;
        log::info!("admission service listening on {}", listener.local_addr()?);

        let mut handlers = Vec::new();
        while !shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    log::debug!("admission: accepted connection from {addr}");
                    let registry = Arc::clone(&self.registry);
                    handlers.push(thread::spawn(move || {
                        if let Err(e) = handle_connection(registry, stream) {
                            log::warn!("admission: connection from {addr} failed: {e}");
                        }
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    log::error!("admission: accept failed: {e}");
                    return Err(e);
                }
            }
            handlers.retain(|h| !h.is_finished());
        }

        log::info!("admission service shutting down, joining {} in-flight connections", handlers.len());
        for handler in handlers {
            let _ = handler.join();
        }
        Ok(())
    }
}

/// Handles one accepted connection end to end: read frame, decode, mutate
/// the registry, reply, close. On any error before a reply is written, a
/// best-effort plain-text error line is sent and the registry is left
/// untouched.
fn handle_connection(registry: Arc<Registry>, mut stream: TcpStream) -> Result<(), AdmissionError> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let peer_ip = stream.peer_addr()?.ip();

    let frame = match read_and_decode(&mut stream) {
        Ok(frame) => frame,
        Err(e) => {
            let _ = stream.write_all(format!("Protocol error: {e}").as_bytes());
            return Err(e);
        }
    };

    let reply = match apply(&registry, &frame, peer_ip) {
        Ok(reply) => reply,
        Err(e) => {
            let _ = stream.write_all(format!("Server error: {e}").as_bytes());
            return Err(e);
        }
    };
    log::info!("admission: {:?} room {:?} -> {}", frame.operation, frame.room_name, reply);
    stream.write_all(&reply.to_bytes())?;
    Ok(())
}

fn read_and_decode(stream: &mut TcpStream) -> Result<AdmissionFrame, AdmissionError> {
    let mut header = [0u8; 3];
    stream.read_exact(&mut header)?;
    let room_name_len = header[0] as usize;
    if 3 + room_name_len > MAX_ADMISSION_FRAME_SIZE {
        return Err(AdmissionError::Protocol(ProtocolError::InvalidRoomNameLength(room_name_len)));
    }
    let mut buf = Vec::with_capacity(3 + room_name_len);
    buf.extend_from_slice(&header);
    buf.resize(3 + room_name_len, 0);
    stream.read_exact(&mut buf[3..])?;
    AdmissionFrame::decode(&buf).map_err(AdmissionError::from)
}

fn apply(registry: &Registry, frame: &AdmissionFrame, peer_ip: IpAddr) -> Result<AdmissionReply, AdmissionError> {
    match frame.operation {
        AdmissionOperation::Create => match registry.create(frame.room_name.as_bytes(), peer_ip) {
            Ok(token) => Ok(AdmissionReply::RoomCreated(token)),
            Err(RegistryError::RoomExists) => Ok(AdmissionReply::RoomAlreadyExists),
            Err(RegistryError::RoomNotFound) => unreachable!("create never returns RoomNotFound"),
            Err(e @ RegistryError::MutexPoisoned) => Err(AdmissionError::from(e)),
        },
        AdmissionOperation::Join => match registry.join(frame.room_name.as_bytes(), peer_ip) {
            Ok(token) => Ok(AdmissionReply::JoinedRoom(token)),
            Err(RegistryError::RoomNotFound) => Ok(AdmissionReply::RoomNotFound),
            Err(RegistryError::RoomExists) => unreachable!("join never returns RoomExists"),
            Err(e @ RegistryError::MutexPoisoned) => Err(AdmissionError::from(e)),
        },
    }
}
