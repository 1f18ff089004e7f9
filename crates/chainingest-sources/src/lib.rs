//! # chainingest-sources
//!
//! Inputs for the ChainIngest engine:
//!
//! - [`FileSource`]: a local log file, polled for growth
//! - [`TxLogLineHandler`]: parses the JSON log written by the websocket listener
//! - [`CometWsFeed`]: live CometBFT `subscribe` notifications

pub mod file;
pub mod txlog;
pub mod ws;

pub use file::FileSource;
pub use txlog::{parse_log_line, tx_events_from_result, TxLogError, TxLogLineHandler};
pub use ws::{query_for_contract, CometWsFeed};
