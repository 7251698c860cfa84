//! Logger setup for binaries and tests that drive the batching core.
//!
//! The library itself only talks to the `log` facade; installing a backend is
//! left to the embedding program.

mod init;

pub use init::{init_logging, LoggingConfig};
