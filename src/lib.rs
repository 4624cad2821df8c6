//! A family of reliable-data-transfer protocols (stop-and-wait through
//! sliding-window selective repeat) and a simplified TCP-like byte-stream
//! transport, validated against a shared configurable fault-injection
//! channel.

mod err;
pub use err::Error;

pub mod channel;
pub mod codec;
pub mod rdt;
pub mod stats;
pub mod tcp;

/// Test-support helpers for driving an endpoint pair over a channel. Used by
/// this crate's own unit and integration tests; not meant as a stable public
/// API.
pub mod harness;
