//! Observability
//!
//! Every stage logs through `tracing`; this module only installs the
//! subscriber. Generation code never prints.
//!
//! ```text
//!   factories / engine / runner ── tracing::{debug, info, warn, error}!
//!                                        │
//!                                 EnvFilter (RUST_LOG or config)
//!                                        │
//!                          fmt layer: pretty │ compact │ json
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
