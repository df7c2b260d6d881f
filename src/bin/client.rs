//! Chat relay client: negotiates room membership over the admission socket,
//! then exchanges chat datagrams over the relay socket until `/quit`.

use std::io::{self, BufRead, Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;

use chat_relay::cli::ClientArgs;
use chat_relay::frame::{AdmissionFrame, AdmissionOperation, AdmissionReply, ChatFrame};
use chat_relay::logging;

const QUIT_COMMAND: &str = "/quit";

fn main() {
    let args = ClientArgs::parse();
    logging::init(args.verbose, args.quiet);

    if let Err(e) = run(args) {
        log::error!("client error: {e}");
        exit(1);
    }
}

fn run(args: ClientArgs) -> anyhow::Result<()> {
    let room = match args.room {
        Some(room) => room,
        None => prompt("Room name: ")?,
    };
    let operation = match args.operation {
        Some(op) => parse_operation(op)?,
        None => {
            let raw = prompt("Operation (1=create, 2=join): ")?;
            parse_operation(raw.trim().parse().unwrap_or(0))?
        }
    };

    let (token, stream_local_port) = admit(&args.address, args.tcp_port, &room, operation)?;
    log::info!("admitted to room {room:?} with token {}", String::from_utf8_lossy(&token));

    chat_session(&args.address, args.udp_port, room, token, stream_local_port)
}

fn prompt(message: &str) -> io::Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn parse_operation(code: u8) -> anyhow::Result<AdmissionOperation> {
    match code {
        1 => Ok(AdmissionOperation::Create),
        2 => Ok(AdmissionOperation::Join),
        other => Err(anyhow::anyhow!("operation must be 1 (create) or 2 (join), got {other}")),
    }
}

/// Connects the admission socket, sends one admission frame, reads the
/// reply, and extracts the token. Returns the token and the local port the
/// kernel assigned the (now-closed) stream socket, which the datagram
/// socket will try to reuse.
fn admit(address: &str, tcp_port: u16, room: &str, operation: AdmissionOperation) -> anyhow::Result<(Vec<u8>, u16)> {
    let mut stream = TcpStream::connect((address, tcp_port))?;
    let local_port = stream.local_addr()?.port();

    let frame = AdmissionFrame::new(operation, room);
    stream.write_all(&frame.encode())?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let response = String::from_utf8_lossy(&response);
    println!("{response}");

    let token = AdmissionReply::parse_token(&response)
        .ok_or_else(|| anyhow::anyhow!("request failed: {response}"))?
        .as_bytes()
        .to_vec();

    Ok((token, local_port))
}

/// Binds the datagram socket (preferring the stream socket's now-free local
/// port, per spec.md §4.5 — an affordance, not a protocol requirement) and
/// runs the reader and writer loops until `/quit`.
fn chat_session(address: &str, udp_port: u16, room: String, token: Vec<u8>, preferred_port: u16) -> anyhow::Result<()> {
    let socket = match UdpSocket::bind(("0.0.0.0", preferred_port)) {
        Ok(socket) => socket,
        Err(_) => UdpSocket::bind(("0.0.0.0", 0))?,
    };
    log::info!("datagram socket bound to {}", socket.local_addr()?);

    let server_addr = (address, udp_port);
    socket.connect(server_addr)?;

    let shutdown = Arc::new(AtomicBool::new(false));

    let reader_socket = socket.try_clone()?;
    let reader_token = token.clone();
    let reader_shutdown = Arc::clone(&shutdown);
    let reader = thread::spawn(move || reader_loop(reader_socket, reader_token, reader_shutdown));

    writer_loop(&socket, &room, &token)?;

    shutdown.store(true, Ordering::SeqCst);
    // Nudge the blocked reader thread past its recv call; it reads with a
    // bounded timeout so it notices the shutdown flag shortly either way.
    let _ = reader.join();
    Ok(())
}

fn reader_loop(socket: UdpSocket, own_token: Vec<u8>, shutdown: Arc<AtomicBool>) {
    socket
        .set_read_timeout(Some(std::time::Duration::from_millis(200)))
        .expect("setting read timeout should not fail");

    let mut buf = vec![0u8; chat_relay::frame::MAX_DATAGRAM_SIZE];
    while !shutdown.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(len) => match ChatFrame::decode(&buf[..len]) {
                Ok(frame) if frame.token == own_token => {} // discard our own echo
                Ok(frame) => {
                    println!("[{}] {}: {}", frame.room_name, String::from_utf8_lossy(&frame.token), frame.message);
                }
                Err(e) => log::debug!("client: dropping malformed datagram: {e}"),
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    log::warn!("client: receive error: {e}");
                }
            }
        }
    }
}

fn writer_loop(socket: &UdpSocket, room: &str, token: &[u8]) -> anyhow::Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.eq_ignore_ascii_case(QUIT_COMMAND) {
            break;
        }
        if line.is_empty() {
            continue;
        }
        let frame = ChatFrame::new(room, token.to_vec(), line);
        if let Err(e) = socket.send(&frame.encode()) {
            log::warn!("client: send failed: {e}");
        }
    }
    Ok(())
}
