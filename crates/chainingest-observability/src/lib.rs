//! # chainingest-observability
//!
//! Structured logging for ChainIngest.
//!
//! Text or JSON logs (compatible with ELK, Loki, CloudWatch) written to
//! stderr, with levels configurable per component. Stdout stays free for
//! record output.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig};
