//! chainingest-core: stateful stream-to-record extraction engine.
//!
//! Turns append-only, semi-structured text streams (YAML-like status dumps,
//! transaction logs) and protocol event feeds into typed records for a
//! document store.
//!
//! # Architecture
//!
//! ```text
//! IngestEngine (one Tokio task per stream)
//!   ├── LineStream
//!   │     ByteSource → OffsetTracker → lines::split → LineHandler
//!   │                                                  └── kv::parse → BlockAssembler
//!   │     → RecordNormalizer → Emitter → Sink
//!   │     CursorStore (offset + sticky values per stream)
//!   └── EventStream
//!         EventFeed → EventAttributeDecoder → RecordNormalizer → Emitter → Sink
//! ```

pub mod assembler;
pub mod attributes;
pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod event;
pub mod feed;
pub mod kv;
pub mod lines;
pub mod metrics;
pub mod normalizer;
pub mod record;
pub mod source;
pub mod stream;

pub use assembler::{BlockAssembler, BlockState};
pub use attributes::{DecodedEvent, EventAttributeDecoder};
pub use checkpoint::{CursorStore, MemoryCursorStore, StreamCheckpoint};
pub use config::{
    AttributeEncoding, BlockProfile, DecoderConfig, LineStreamOptions, ReconnectPolicy,
    StartPosition,
};
pub use cursor::{Advance, OffsetTracker, ReadWindow, StreamCursor, StreamId};
pub use emitter::{Emitter, Sink};
pub use engine::IngestEngine;
pub use error::{IngestError, SinkError, SourceError};
pub use event::{EncodedAttribute, ProtocolEvent};
pub use feed::{ChannelFeed, EventFeed, ProtocolEventStream};
pub use kv::KvPair;
pub use metrics::{Counter, IngestMetrics, StreamMetrics};
pub use normalizer::{FieldType, FieldTypeTable, RecordNormalizer};
pub use record::{CorrelationKey, FieldValue, OutputRecord, RawFields};
pub use source::{ByteSource, MemorySource};
pub use stream::{BlockLineHandler, EventStream, LineHandler, LineOutcome, LineStream, PollOutcome};
