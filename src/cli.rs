//! Command-line surfaces for the `server` and `client` binaries.
//!
//! Neither struct requires any flag to be passed: every field defaults to
//! the value spec.md names, so running either binary bare matches the
//! minimum contract exactly.

use clap::Parser;

/// The chat relay server: a TCP admission port and a UDP relay port over
/// one shared room registry.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct ServerArgs {
    /// Interface to bind both the admission and relay sockets to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// TCP port for the admission (create/join) service.
    #[arg(long, default_value_t = 9001)]
    pub tcp_port: u16,

    /// UDP port for the relay (chat) service.
    #[arg(long, default_value_t = 9002)]
    pub udp_port: u16,

    /// Increase logging verbosity (-v = debug, -vv = trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease logging verbosity (-q = warn, -qq = error).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

/// The chat relay client: connects, creates or joins a room, then exchanges
/// chat datagrams until `/quit`.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct ClientArgs {
    /// Server address to connect to.
    #[arg(short, long, default_value = "127.0.0.1")]
    pub address: String,

    /// TCP port the server's admission service listens on.
    #[arg(long, default_value_t = 9001)]
    pub tcp_port: u16,

    /// UDP port the server's relay service listens on.
    #[arg(long, default_value_t = 9002)]
    pub udp_port: u16,

    /// Room name to create or join. Prompted interactively if omitted.
    #[arg(long)]
    pub room: Option<String>,

    /// 1 = create the room, 2 = join an existing room. Prompted
    /// interactively if omitted.
    #[arg(long)]
    pub operation: Option<u8>,

    /// Increase logging verbosity (-v = debug, -vv = trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease logging verbosity (-q = warn, -qq = error).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,
}
