//! Ingest counters shared by every stream task.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of [`IngestMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamMetrics {
    pub lines_read: u64,
    pub malformed_lines: u64,
    pub records_emitted: u64,
    pub sink_errors: u64,
    pub fields_dropped: u64,
    pub truncations: u64,
    pub events_decoded: u64,
    pub attributes_skipped: u64,
    pub reconnections: u64,
}

/// Which counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    LinesRead,
    MalformedLines,
    RecordsEmitted,
    SinkErrors,
    FieldsDropped,
    Truncations,
    EventsDecoded,
    AttributesSkipped,
    Reconnections,
}

/// Lock-free counters, shared behind an `Arc` by the emitter and the
/// stream loops.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    lines_read: AtomicU64,
    malformed_lines: AtomicU64,
    records_emitted: AtomicU64,
    sink_errors: AtomicU64,
    fields_dropped: AtomicU64,
    truncations: AtomicU64,
    events_decoded: AtomicU64,
    attributes_skipped: AtomicU64,
    reconnections: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::LinesRead => &self.lines_read,
            Counter::MalformedLines => &self.malformed_lines,
            Counter::RecordsEmitted => &self.records_emitted,
            Counter::SinkErrors => &self.sink_errors,
            Counter::FieldsDropped => &self.fields_dropped,
            Counter::Truncations => &self.truncations,
            Counter::EventsDecoded => &self.events_decoded,
            Counter::AttributesSkipped => &self.attributes_skipped,
            Counter::Reconnections => &self.reconnections,
        }
    }

    pub fn add(&self, counter: Counter, n: u64) {
        if n > 0 {
            self.slot(counter).fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StreamMetrics {
        StreamMetrics {
            lines_read: self.get(Counter::LinesRead),
            malformed_lines: self.get(Counter::MalformedLines),
            records_emitted: self.get(Counter::RecordsEmitted),
            sink_errors: self.get(Counter::SinkErrors),
            fields_dropped: self.get(Counter::FieldsDropped),
            truncations: self.get(Counter::Truncations),
            events_decoded: self.get(Counter::EventsDecoded),
            attributes_skipped: self.get(Counter::AttributesSkipped),
            reconnections: self.get(Counter::Reconnections),
        }
    }
}
