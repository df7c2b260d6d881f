//! End-to-end coverage of the admission + relay services wired together,
//! driving the scenarios from spec.md §8 over real loopback sockets.

use std::net::{IpAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chat_relay::admission::AdmissionService;
use chat_relay::frame::{AdmissionFrame, AdmissionOperation, ChatFrame};
use chat_relay::registry::Registry;
use chat_relay::relay::{RelayError, RelayService};

struct TestServer {
    tcp_addr: std::net::SocketAddr,
    udp_addr: std::net::SocketAddr,
    registry: Arc<Registry>,
    shutdown: Arc<AtomicBool>,
    admission_handle: thread::JoinHandle<std::io::Result<()>>,
    relay_handle: thread::JoinHandle<Result<(), RelayError>>,
}

impl TestServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let tcp_addr = listener.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let udp_addr = socket.local_addr().unwrap();

        let registry = Arc::new(Registry::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let admission = AdmissionService::new(Arc::clone(&registry));
        let admission_shutdown = Arc::clone(&shutdown);
        let admission_handle = thread::spawn(move || admission.run(listener, admission_shutdown));

        let relay = RelayService::new(Arc::clone(&registry));
        let relay_shutdown = Arc::clone(&shutdown);
        let relay_handle = thread::spawn(move || relay.run(socket, relay_shutdown));

        TestServer { tcp_addr, udp_addr, registry, shutdown, admission_handle, relay_handle }
    }

    fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.admission_handle.join().unwrap().unwrap();
        self.relay_handle.join().unwrap().unwrap();
    }
}

fn admit(tcp_addr: std::net::SocketAddr, room: &str, operation: AdmissionOperation) -> String {
    use std::io::{Read, Write};
    let mut stream = TcpStream::connect(tcp_addr).unwrap();
    let frame = AdmissionFrame::new(operation, room);
    stream.write_all(&frame.encode()).unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    String::from_utf8(response).unwrap()
}

#[test]
fn scenario_create_join_relay_happy_path() {
    let server = TestServer::start();

    let created = admit(server.tcp_addr, "party", AdmissionOperation::Create);
    assert!(created.starts_with("Room created host_127.0.0.1"));
    let host_token = created.split_whitespace().last().unwrap().as_bytes().to_vec();

    let joined = admit(server.tcp_addr, "party", AdmissionOperation::Join);
    assert!(joined.starts_with("Joined room guest_127.0.0.1_1"));
    let guest_token = joined.split_whitespace().last().unwrap().as_bytes().to_vec();

    let a = UdpSocket::bind("127.0.0.1:0").unwrap();
    a.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").unwrap();
    b.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    // A speaks before B is bound: no fanout yet.
    let a_hello = ChatFrame::new("party", host_token.clone(), "hello");
    a.send_to(&a_hello.encode(), server.udp_addr).unwrap();
    thread::sleep(Duration::from_millis(150));

    // B speaks: binds B, fans out to A (the sole other bound member).
    let b_hi = ChatFrame::new("party", guest_token.clone(), "hi");
    b.send_to(&b_hi.encode(), server.udp_addr).unwrap();

    let mut buf = [0u8; 4096];
    let (len, _) = a.recv_from(&mut buf).unwrap();
    let relayed = ChatFrame::decode(&buf[..len]).unwrap();
    assert_eq!(relayed.token, guest_token);
    assert_eq!(relayed.message, "hi");

    // A speaks again: now fans out to B with A's token.
    let a_again = ChatFrame::new("party", host_token.clone(), "hello again");
    a.send_to(&a_again.encode(), server.udp_addr).unwrap();

    let (len, _) = b.recv_from(&mut buf).unwrap();
    let relayed = ChatFrame::decode(&buf[..len]).unwrap();
    assert_eq!(relayed.token, host_token);
    assert_eq!(relayed.message, "hello again");

    server.stop();
}

#[test]
fn scenario_duplicate_create_leaves_one_member() {
    let server = TestServer::start();

    let created = admit(server.tcp_addr, "party", AdmissionOperation::Create);
    assert!(created.starts_with("Room created"));

    let duplicate = admit(server.tcp_addr, "party", AdmissionOperation::Create);
    assert_eq!(duplicate, "Room already exists");
    assert_eq!(server.registry.member_count(b"party").unwrap(), Some(1));

    server.stop();
}

#[test]
fn scenario_join_missing_room() {
    let server = TestServer::start();

    let joined = admit(server.tcp_addr, "absent", AdmissionOperation::Join);
    assert_eq!(joined, "Room not found");
    assert_eq!(server.registry.room_count().unwrap(), 0);

    server.stop();
}

#[test]
fn scenario_unauthenticated_datagram_gets_no_fanout() {
    let server = TestServer::start();
    admit(server.tcp_addr, "party", AdmissionOperation::Create);
    admit(server.tcp_addr, "party", AdmissionOperation::Join);

    let e = UdpSocket::bind("127.0.0.1:0").unwrap();
    e.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let frame = ChatFrame::new("party", b"xxxxx".to_vec(), "boom");
    e.send_to(&frame.encode(), server.udp_addr).unwrap();

    let mut buf = [0u8; 4096];
    let (len, _) = e.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"Unauthorized");

    server.stop();
}

#[test]
fn room_name_round_trips_as_non_ascii_utf8() {
    let server = TestServer::start();
    let room = "caf\u{e9}-room";
    let created = admit(server.tcp_addr, room, AdmissionOperation::Create);
    assert!(created.starts_with("Room created"));
    assert_eq!(server.registry.member_count(room.as_bytes()).unwrap(), Some(1));
    server.stop();
}

#[test]
fn host_ip_is_read_from_peer_not_client_claim() {
    let server = TestServer::start();
    let created = admit(server.tcp_addr, "party", AdmissionOperation::Create);
    let token = created.split_whitespace().last().unwrap();
    let expected_ip: IpAddr = "127.0.0.1".parse().unwrap();
    assert_eq!(token, format!("host_{expected_ip}"));
    server.stop();
}
