//! Core library for the multi-room chat relay: wire codec, room registry,
//! admission service, and relay service. The `server` and `client` binaries
//! are thin CLI shells over these modules.

pub mod admission;
pub mod cli;
pub mod frame;
pub mod logging;
pub mod registry;
pub mod relay;
pub mod token;

/// Shorthand for fallible operations with no success payload, matching the
/// rest of this crate's error-enum-per-module style.
pub type EmptyResult = Result<(), Box<dyn std::error::Error>>;
