//! chainingest-storage: sinks and cursor stores for ChainIngest.
//!
//! | Type                   | Role                                   |
//! |------------------------|----------------------------------------|
//! | `MemorySink`           | keeps records in RAM (tests, dry runs) |
//! | `StdoutSink`           | JSON lines on stdout                   |
//! | `ElasticsearchSink`    | document store with index provisioning |
//! | `JsonFileCursorStore`  | checkpoints as JSON files              |

pub mod cursor_file;
pub mod elasticsearch;
pub mod memory;
pub mod stdout;

pub use cursor_file::JsonFileCursorStore;
pub use elasticsearch::{mapping_for, ElasticsearchConfig, ElasticsearchSink};
pub use memory::MemorySink;
pub use stdout::StdoutSink;
