//! Logging setup shared by both binaries.

use log::LevelFilter;

/// Resolves `-v`/`-q` counts into a level, defaulting to `Info`, and
/// installs `simple_logger` as the `log` backend.
pub fn init(verbose: u8, quiet: u8) {
    let level = match verbose.min(2) as i8 - quiet.min(2) as i8 {
        i8::MIN..=-2 => LevelFilter::Error,
        -1 => LevelFilter::Warn,
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if let Err(e) = simple_logger::SimpleLogger::new().with_level(level).init() {
        eprintln!("failed to initialize logger: {e}");
    }
}
