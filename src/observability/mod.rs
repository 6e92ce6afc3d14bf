//! Observability.
//!
//! Structured logging infrastructure for the session server.

pub mod logging;

pub use logging::{LogFormat, init_logging, verbosity_to_directive};
