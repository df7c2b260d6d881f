//! Chat relay server entry point: binds the admission and relay sockets,
//! runs both services on their own threads over one shared registry, and
//! tears down cleanly on SIGINT/SIGTERM.

use std::net::{TcpListener, UdpSocket};
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use chat_relay::admission::AdmissionService;
use chat_relay::cli::ServerArgs;
use chat_relay::logging;
use chat_relay::registry::Registry;
use chat_relay::relay::RelayService;

fn main() {
    let args = ServerArgs::parse();
    logging::init(args.verbose, args.quiet);

    if let Err(e) = run(args) {
        log::error!("server error: {e}");
        exit(1);
    }
}

fn run(args: ServerArgs) -> anyhow::Result<()> {
    let tcp_addr = format!("{}:{}", args.bind, args.tcp_port);
    let udp_addr = format!("{}:{}", args.bind, args.udp_port);

    let listener = TcpListener::bind(&tcp_addr)
        .map_err(|e| anyhow::anyhow!("failed to bind admission socket on {tcp_addr}: {e}"))?;
    let socket = UdpSocket::bind(&udp_addr)
        .map_err(|e| anyhow::anyhow!("failed to bind relay socket on {udp_addr}: {e}"))?;

    log::info!("chat relay starting: admission on {tcp_addr}, relay on {udp_addr}");

    let registry = Arc::new(Registry::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }

    let admission = AdmissionService::new(Arc::clone(&registry));
    let admission_shutdown = Arc::clone(&shutdown);
    let admission_handle = std::thread::spawn(move || admission.run(listener, admission_shutdown));

    let relay = RelayService::new(Arc::clone(&registry));
    let relay_shutdown = Arc::clone(&shutdown);
    let relay_handle = std::thread::spawn(move || relay.run(socket, relay_shutdown));

    admission_handle
        .join()
        .map_err(|_| anyhow::anyhow!("admission service thread panicked"))??;
    relay_handle
        .join()
        .map_err(|_| anyhow::anyhow!("relay service thread panicked"))??;

    registry.clear()?;
    log::info!("chat relay shut down cleanly");
    Ok(())
}
