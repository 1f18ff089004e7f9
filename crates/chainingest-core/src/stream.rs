//! Stream loops: one per monitored source, each run as its own Tokio task.
//!
//! ```text
//! LineStream:  ByteSource → OffsetTracker → split → LineHandler → normalize → Emitter
//! EventStream: EventFeed  → EventAttributeDecoder            → normalize → Emitter
//! ```
//!
//! A line stream commits its cursor only after every complete line of the
//! window was handled and the resulting records were emitted. The bytes
//! after the last line terminator are left uncommitted, so the next window
//! starts with them. Each commit saves the handler's parse state alongside
//! the offset, so a half-assembled block survives a restart. Shutdown is
//! observed only between polls.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::assembler::{BlockAssembler, BlockState};
use crate::attributes::EventAttributeDecoder;
use crate::checkpoint::{CursorStore, MemoryCursorStore, StreamCheckpoint};
use crate::config::{BlockProfile, LineStreamOptions, ReconnectPolicy, StartPosition};
use crate::cursor::{Advance, OffsetTracker, ReadWindow, StreamCursor, StreamId};
use crate::emitter::Emitter;
use crate::error::{IngestError, SourceError};
use crate::event::ProtocolEvent;
use crate::feed::EventFeed;
use crate::kv;
use crate::lines;
use crate::metrics::Counter;
use crate::normalizer::RecordNormalizer;
use crate::record::RawFields;
use crate::source::ByteSource;

/// Upper bound of a single read, unless `max_line_bytes` is larger.
const READ_CHUNK_BYTES: u64 = 4 << 20;

/// Wait on `fut` unless shutdown is requested first. Returns `true` when the
/// caller should stop.
async fn wait_or_shutdown<F: Future>(shutdown: &mut watch::Receiver<bool>, fut: F) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = fut => *shutdown.borrow(),
    }
}

// ─── Line handlers ────────────────────────────────────────────────────────────

/// What a handler made of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Consumed,
    /// Not in the expected shape; skipped and counted.
    Malformed,
}

/// Turns lines into raw records. Owns whatever per-stream parse state the
/// format needs.
pub trait LineHandler: Send + Sync {
    /// Handle one complete line, pushing any finished records onto `out`.
    fn handle_line(&mut self, line: &str, out: &mut Vec<RawFields>) -> LineOutcome;

    /// State to persist with the cursor.
    fn sticky_values(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Restore state loaded from a checkpoint.
    fn restore_sticky(&mut self, _values: BTreeMap<String, String>) {}

    /// Incomplete record built from lines already handled.
    fn pending_block(&self) -> Option<RawFields> {
        None
    }

    fn restore_pending(&mut self, _block: RawFields) {}

    /// Attributes dropped while decoding since the last call.
    fn take_skipped_attributes(&mut self) -> usize {
        0
    }
}

/// `key: value` lines assembled into blocks by a [`BlockProfile`].
#[derive(Debug, Clone)]
pub struct BlockLineHandler {
    assembler: BlockAssembler,
    timestamp_field: Option<String>,
}

impl BlockLineHandler {
    pub fn new(profile: &BlockProfile) -> Self {
        Self {
            assembler: BlockAssembler::new(profile),
            timestamp_field: None,
        }
    }

    /// Stamp emitted blocks lacking `field` with the current Unix time.
    pub fn with_timestamp_field(mut self, field: Option<String>) -> Self {
        self.timestamp_field = field;
        self
    }

    pub fn assembler(&self) -> &BlockAssembler {
        &self.assembler
    }
}

impl LineHandler for BlockLineHandler {
    fn handle_line(&mut self, line: &str, out: &mut Vec<RawFields>) -> LineOutcome {
        if line.trim().is_empty() {
            return LineOutcome::Consumed;
        }
        let Some(pair) = kv::parse(line) else {
            return LineOutcome::Malformed;
        };
        if let Some(mut block) = self.assembler.push(pair) {
            if let Some(field) = &self.timestamp_field {
                if !block.contains_key(field) {
                    block.insert(field.clone(), chrono::Utc::now().timestamp().to_string());
                }
            }
            out.push(block);
        }
        LineOutcome::Consumed
    }

    fn sticky_values(&self) -> BTreeMap<String, String> {
        self.assembler.sticky_values().clone()
    }

    fn restore_sticky(&mut self, values: BTreeMap<String, String>) {
        self.assembler.restore_sticky(values);
    }

    fn pending_block(&self) -> Option<RawFields> {
        (self.assembler.state() == BlockState::Accumulating).then(|| self.assembler.pending().clone())
    }

    fn restore_pending(&mut self, block: RawFields) {
        self.assembler.restore_pending(block);
    }
}

// ─── Line stream ──────────────────────────────────────────────────────────────

/// Result of one [`LineStream::poll_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No new bytes.
    UpToDate,
    /// New bytes, but no complete line yet.
    Incomplete,
    /// Lines were handled and the cursor moved to `offset`.
    Progress {
        lines: usize,
        records: usize,
        offset: u64,
    },
}

/// Follows one growing byte source.
pub struct LineStream {
    id: StreamId,
    source: Arc<dyn ByteSource>,
    handler: Box<dyn LineHandler>,
    normalizer: Arc<RecordNormalizer>,
    emitter: Emitter,
    store: Arc<dyn CursorStore>,
    options: LineStreamOptions,
    tracker: OffsetTracker,
    /// The committed offset is inside an oversized line; drop bytes up to
    /// the next terminator.
    skipping_line: bool,
    initialized: bool,
}

impl LineStream {
    pub fn new(
        id: impl Into<StreamId>,
        source: Arc<dyn ByteSource>,
        handler: Box<dyn LineHandler>,
        emitter: Emitter,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            handler,
            normalizer: Arc::new(RecordNormalizer::default()),
            emitter,
            store: Arc::new(MemoryCursorStore::new()),
            options: LineStreamOptions::default(),
            tracker: OffsetTracker::new(),
            skipping_line: false,
            initialized: false,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<RecordNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_options(mut self, options: LineStreamOptions) -> Self {
        self.options = options;
        self
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn cursor(&self) -> Option<&StreamCursor> {
        self.tracker.cursor(&self.id)
    }

    /// Position the cursor from the stored checkpoint, or from the
    /// configured start position when there is none.
    pub async fn init(&mut self) -> Result<(), IngestError> {
        if self.initialized {
            return Ok(());
        }
        match self.store.load(&self.id).await? {
            Some(cp) => {
                info!(
                    stream = %self.id,
                    offset = cp.offset,
                    generation = cp.generation,
                    pending = cp.pending.is_some(),
                    "resuming from checkpoint"
                );
                self.tracker.restore(cp.cursor());
                self.skipping_line = cp.skipping_line;
                self.handler.restore_sticky(cp.sticky);
                if let Some(block) = cp.pending {
                    self.handler.restore_pending(block);
                }
            }
            None => {
                let mut cursor = StreamCursor::new(self.id.clone());
                if self.options.start_from == StartPosition::End {
                    cursor.last_offset = self.source.len().await?;
                }
                info!(
                    stream = %self.id,
                    source = %self.source.describe(),
                    offset = cursor.last_offset,
                    "starting without checkpoint"
                );
                self.tracker.restore(cursor);
            }
        }
        self.initialized = true;
        Ok(())
    }

    /// Read and process whatever the source gained since the last commit.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, IngestError> {
        self.init().await?;
        loop {
            let size = self.source.len().await?;
            match self.tracker.advance(&self.id, size) {
                Advance::UpToDate => return Ok(PollOutcome::UpToDate),
                Advance::Truncated {
                    previous_offset,
                    generation,
                } => {
                    warn!(
                        stream = %self.id,
                        previous_offset,
                        size,
                        generation,
                        "source truncated or rotated, restarting from offset 0"
                    );
                    self.emitter.metrics().incr(Counter::Truncations);
                    self.skipping_line = false;
                    self.save_checkpoint().await;
                }
                Advance::Read(window) => return self.process_window(window).await,
            }
        }
    }

    async fn process_window(&mut self, window: ReadWindow) -> Result<PollOutcome, IngestError> {
        let limit = READ_CHUNK_BYTES.max(self.options.max_line_bytes as u64 + 1);
        let window = ReadWindow {
            start: window.start,
            end: window.end.min(window.start + limit),
        };
        let buf = self.source.read_range(window).await?;
        let metrics = self.emitter.metrics().clone();

        let mut skipped = 0;
        if self.skipping_line {
            match buf.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    skipped = i + 1;
                    self.skipping_line = false;
                }
                None => skipped = buf.len(),
            }
            trace!(stream = %self.id, bytes = skipped, "discarding tail of oversized line");
        }
        let split = lines::split(&buf[skipped..]);

        let mut raw_records = Vec::new();
        let mut line_count = 0;
        for line in split.lines() {
            line_count += 1;
            if self.handler.handle_line(&line, &mut raw_records) == LineOutcome::Malformed {
                trace!(stream = %self.id, line = %line, "skipping malformed line");
                metrics.incr(Counter::MalformedLines);
            }
        }
        metrics.add(Counter::LinesRead, line_count as u64);
        metrics.add(
            Counter::AttributesSkipped,
            self.handler.take_skipped_attributes() as u64,
        );

        let mut consumed = skipped + split.consumed();
        if split.consumed() == 0 && split.remainder().len() > self.options.max_line_bytes {
            warn!(
                stream = %self.id,
                bytes = split.remainder().len(),
                "unterminated line exceeds max_line_bytes, skipping"
            );
            metrics.incr(Counter::MalformedLines);
            consumed = buf.len();
            self.skipping_line = true;
        }
        if consumed == 0 {
            return Ok(PollOutcome::Incomplete);
        }

        let record_count = raw_records.len();
        for raw in raw_records {
            let record = self.normalizer.normalize(&raw);
            metrics.add(Counter::FieldsDropped, (raw.len() - record.len()) as u64);
            self.emitter.emit(record).await;
        }

        let offset = window.start + consumed as u64;
        if self.tracker.commit(&self.id, offset) {
            self.save_checkpoint().await;
        }
        debug!(stream = %self.id, lines = line_count, records = record_count, offset, "window processed");
        Ok(PollOutcome::Progress {
            lines: line_count,
            records: record_count,
            offset,
        })
    }

    async fn save_checkpoint(&self) {
        let Some(cursor) = self.tracker.cursor(&self.id) else {
            return;
        };
        let cp = StreamCheckpoint::new(cursor, self.handler.sticky_values())
            .with_pending(self.handler.pending_block())
            .with_skipping_line(self.skipping_line);
        if let Err(e) = self.store.save(cp).await {
            warn!(stream = %self.id, error = %e, "failed to save checkpoint");
        }
    }

    /// Follow the source until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        let retry_delay = Duration::from_millis(self.options.poll_interval_ms);
        info!(stream = %self.id, source = %self.source.describe(), "line stream started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.poll_once().await {
                Ok(PollOutcome::Progress { .. }) => continue,
                Ok(_) => {
                    let source = self.source.clone();
                    if wait_or_shutdown(&mut shutdown, source.changed()).await {
                        break;
                    }
                }
                Err(e) if e.is_transport() => {
                    warn!(stream = %self.id, error = %e, "source unavailable, retrying");
                    if wait_or_shutdown(&mut shutdown, tokio::time::sleep(retry_delay)).await {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        info!(stream = %self.id, "line stream stopped");
        Ok(())
    }
}

// ─── Event stream ─────────────────────────────────────────────────────────────

/// Decodes events from one feed, reconnecting with backoff.
pub struct EventStream {
    feed: Arc<dyn EventFeed>,
    decoder: EventAttributeDecoder,
    normalizer: Arc<RecordNormalizer>,
    emitter: Emitter,
    reconnect: ReconnectPolicy,
}

impl EventStream {
    pub fn new(feed: Arc<dyn EventFeed>, decoder: EventAttributeDecoder, emitter: Emitter) -> Self {
        Self {
            feed,
            decoder,
            normalizer: Arc::new(RecordNormalizer::default()),
            emitter,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<RecordNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Decode, normalize and emit one event. Returns the number of records
    /// the sink accepted.
    pub async fn handle_event(&self, event: &ProtocolEvent) -> usize {
        let metrics = self.emitter.metrics();
        let decoded = self.decoder.decode(event);
        metrics.incr(Counter::EventsDecoded);
        metrics.add(Counter::AttributesSkipped, decoded.skipped_attributes as u64);

        let mut accepted = 0;
        for raw in decoded.into_records() {
            let record = self.normalizer.normalize(&raw);
            metrics.add(Counter::FieldsDropped, (raw.len() - record.len()) as u64);
            if self.emitter.emit(record).await {
                accepted += 1;
            }
        }
        accepted
    }

    /// Consume the feed until `shutdown` flips to `true` or the feed reports
    /// it is permanently closed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        let name = self.feed.name().to_string();
        let mut attempt = 0u32;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.feed.subscribe().await {
                Ok(mut events) => {
                    info!(feed = %name, "event feed connected");
                    attempt = 0;
                    loop {
                        let item = tokio::select! {
                            _ = shutdown.changed() => return Ok(()),
                            item = events.next() => item,
                        };
                        match item {
                            Some(Ok(event)) => {
                                self.handle_event(&event).await;
                            }
                            Some(Err(e)) => {
                                warn!(feed = %name, error = %e, "event feed error");
                                break;
                            }
                            None => {
                                info!(feed = %name, "event feed closed");
                                break;
                            }
                        }
                    }
                }
                Err(SourceError::Closed) => {
                    info!(feed = %name, "event feed exhausted");
                    break;
                }
                Err(e) => {
                    warn!(feed = %name, error = %e, "event feed connect failed");
                }
            }

            attempt += 1;
            self.emitter.metrics().incr(Counter::Reconnections);
            let delay = Duration::from_millis(self.reconnect.delay_ms(attempt));
            info!(feed = %name, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            if wait_or_shutdown(&mut shutdown, tokio::time::sleep(delay)).await {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::Sink;
    use crate::error::SinkError;
    use crate::metrics::IngestMetrics;
    use crate::normalizer::FieldTypeTable;
    use crate::record::{FieldValue, OutputRecord};
    use crate::source::MemorySource;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct VecSink(Mutex<Vec<OutputRecord>>);

    #[async_trait]
    impl Sink for VecSink {
        async fn write(&self, record: OutputRecord) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(record);
            Ok(())
        }
    }

    impl VecSink {
        fn records(&self) -> Vec<OutputRecord> {
            self.0.lock().unwrap().clone()
        }
    }

    fn unbonding_stream(
        source: Arc<MemorySource>,
        store: Arc<MemoryCursorStore>,
    ) -> (LineStream, Arc<VecSink>) {
        let sink = Arc::new(VecSink::default());
        let emitter = Emitter::new(sink.clone(), Arc::new(IngestMetrics::new()));
        let profile = BlockProfile::host_zone_unbondings();
        let stream = LineStream::new("unbonding", source, Box::new(BlockLineHandler::new(&profile)), emitter)
            .with_normalizer(Arc::new(RecordNormalizer::new(FieldTypeTable::liquid_staking())))
            .with_cursor_store(store)
            .with_options(LineStreamOptions {
                timestamp_field: None,
                ..LineStreamOptions::default()
            });
        (stream, sink)
    }

    const UNBONDING: &str = "epoch_number: \"12\"\n\
        host_zone_unbondings:\n\
        - denom: uarch\n  host_zone_id: archway-1\n  native_token_amount: \"100\"\n  st_token_amount: \"95\"\n  status: UNBONDING_QUEUE\n\
        - denom: uarch\n  host_zone_id: archway-2\n  native_token_amount: \"7\"\n  st_token_amount: \"6\"\n  status: CLAIMABLE\n";

    #[tokio::test]
    async fn partial_line_is_not_consumed_until_terminated() {
        let source = Arc::new(MemorySource::new("t"));
        let (mut stream, sink) = unbonding_stream(source.clone(), Arc::new(MemoryCursorStore::new()));

        let (head, tail) = UNBONDING.split_at(UNBONDING.len() - 4);
        source.append(head).unwrap();
        let first = stream.poll_once().await.unwrap();
        let PollOutcome::Progress { offset, .. } = first else {
            panic!("expected progress, got {first:?}");
        };
        assert!(offset < head.len() as u64);
        assert_eq!(sink.records().len(), 1);

        source.append(tail).unwrap();
        stream.poll_once().await.unwrap();
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("status"), Some(&FieldValue::Str("CLAIMABLE".into())));
        assert_eq!(records[1].get("epoch_number"), Some(&FieldValue::Int(12)));
        assert_eq!(stream.cursor().unwrap().last_offset, UNBONDING.len() as u64);
        assert_eq!(stream.poll_once().await.unwrap(), PollOutcome::UpToDate);
    }

    #[tokio::test]
    async fn only_fragment_reports_incomplete() {
        let source = Arc::new(MemorySource::new("t"));
        let (mut stream, sink) = unbonding_stream(source.clone(), Arc::new(MemoryCursorStore::new()));
        source.append("epoch_num").unwrap();
        assert_eq!(stream.poll_once().await.unwrap(), PollOutcome::Incomplete);
        assert_eq!(stream.cursor().unwrap().last_offset, 0);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn truncation_rereads_from_zero() {
        let source = Arc::new(MemorySource::new("t"));
        let (mut stream, sink) = unbonding_stream(source.clone(), Arc::new(MemoryCursorStore::new()));
        source.append(UNBONDING).unwrap();
        stream.poll_once().await.unwrap();
        assert_eq!(sink.records().len(), 2);

        source.replace(UNBONDING.as_bytes()[..40].to_vec()).unwrap();
        stream.poll_once().await.unwrap();
        let cursor = stream.cursor().unwrap();
        assert_eq!(cursor.generation, 1);
        assert!(cursor.last_offset <= 40);
    }

    #[tokio::test]
    async fn checkpoint_restores_cursor_and_sticky_values() {
        let source = Arc::new(MemorySource::new("t"));
        let store = Arc::new(MemoryCursorStore::new());
        let (mut stream, _) = unbonding_stream(source.clone(), store.clone());
        source.append(UNBONDING).unwrap();
        stream.poll_once().await.unwrap();
        drop(stream);

        let cp = store.load(&StreamId::new("unbonding")).await.unwrap().unwrap();
        assert_eq!(cp.offset, UNBONDING.len() as u64);
        assert_eq!(cp.sticky["epoch_number"], "12");

        let (mut resumed, sink) = unbonding_stream(source.clone(), store);
        source
            .append("- denom: uarch\n  host_zone_id: archway-3\n  native_token_amount: \"1\"\n  st_token_amount: \"1\"\n  status: CLAIMABLE\n")
            .unwrap();
        resumed.poll_once().await.unwrap();
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("epoch_number"), Some(&FieldValue::Int(12)));
    }

    #[tokio::test]
    async fn block_split_across_restart_is_emitted_once() {
        let source = Arc::new(MemorySource::new("t"));
        let store = Arc::new(MemoryCursorStore::new());
        let (mut stream, sink) = unbonding_stream(source.clone(), store.clone());
        source
            .append("epoch_number: 3\n- denom: uarch\nhost_zone_id: a\nnative_token_amount: 1\n")
            .unwrap();
        stream.poll_once().await.unwrap();
        assert!(sink.records().is_empty());
        drop(stream);

        let cp = store.load(&StreamId::new("unbonding")).await.unwrap().unwrap();
        let pending = cp.pending.expect("pending block saved");
        assert_eq!(pending["host_zone_id"], "a");

        let (mut resumed, sink) = unbonding_stream(source.clone(), store.clone());
        source.append("st_token_amount: 1\nstatus: CLAIMABLE\n").unwrap();
        resumed.poll_once().await.unwrap();
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("host_zone_id"), Some(&FieldValue::Str("a".into())));
        assert_eq!(records[0].get("epoch_number"), Some(&FieldValue::Int(3)));

        let cp = store.load(&StreamId::new("unbonding")).await.unwrap().unwrap();
        assert!(cp.pending.is_none());
    }

    #[tokio::test]
    async fn oversized_line_is_skipped_through_its_terminator() {
        let source = Arc::new(MemorySource::new("t"));
        let store = Arc::new(MemoryCursorStore::new());
        let (stream, sink) = unbonding_stream(source.clone(), store.clone());
        let mut stream = stream.with_options(LineStreamOptions {
            max_line_bytes: 16,
            timestamp_field: None,
            ..LineStreamOptions::default()
        });

        source.append(format!("memo: {}", "x".repeat(40))).unwrap();
        assert!(matches!(stream.poll_once().await.unwrap(), PollOutcome::Progress { .. }));
        let cp = store.load(&StreamId::new("unbonding")).await.unwrap().unwrap();
        assert!(cp.skipping_line);

        source.append("xxxx status: FORGED\n").unwrap();
        stream.poll_once().await.unwrap();
        assert!(sink.records().is_empty());
        assert_eq!(stream.handler.pending_block(), None);

        source
            .append("epoch_number: 3\n- denom: uarch\nhost_zone_id: a\nnative_token_amount: 1\nst_token_amount: 1\nstatus: CLAIMABLE\n")
            .unwrap();
        stream.poll_once().await.unwrap();
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("status"), Some(&FieldValue::Str("CLAIMABLE".into())));
        assert_eq!(stream.emitter.metrics().snapshot().malformed_lines, 1);
        assert_eq!(stream.cursor().unwrap().last_offset, source.len().await.unwrap());
    }

    #[tokio::test]
    async fn start_from_end_skips_existing_content() {
        let source = Arc::new(MemorySource::new("t"));
        source.append(UNBONDING).unwrap();
        let (stream, sink) = unbonding_stream(source.clone(), Arc::new(MemoryCursorStore::new()));
        let mut stream = stream.with_options(LineStreamOptions {
            start_from: StartPosition::End,
            ..LineStreamOptions::default()
        });
        assert_eq!(stream.poll_once().await.unwrap(), PollOutcome::UpToDate);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_are_counted() {
        let source = Arc::new(MemorySource::new("t"));
        let (mut stream, _) = unbonding_stream(source.clone(), Arc::new(MemoryCursorStore::new()));
        source.append("---\nnot a pair\nstatus: x\n").unwrap();
        stream.poll_once().await.unwrap();
        let m = stream.emitter.metrics().snapshot();
        assert_eq!(m.lines_read, 3);
        assert_eq!(m.malformed_lines, 2);
    }

    #[derive(Default)]
    struct SkippingHandler(usize);

    impl LineHandler for SkippingHandler {
        fn handle_line(&mut self, _line: &str, _out: &mut Vec<RawFields>) -> LineOutcome {
            self.0 += 1;
            LineOutcome::Consumed
        }

        fn take_skipped_attributes(&mut self) -> usize {
            std::mem::take(&mut self.0)
        }
    }

    #[tokio::test]
    async fn handler_skipped_attributes_reach_metrics() {
        let source = Arc::new(MemorySource::new("t"));
        let emitter = Emitter::new(Arc::new(VecSink::default()), Arc::new(IngestMetrics::new()));
        let mut stream = LineStream::new("txlog", source.clone(), Box::new(SkippingHandler::default()), emitter);
        source.append("a\nb\n").unwrap();
        stream.poll_once().await.unwrap();
        source.append("c\n").unwrap();
        stream.poll_once().await.unwrap();
        assert_eq!(stream.emitter.metrics().snapshot().attributes_skipped, 3);
    }

    #[tokio::test]
    async fn event_stream_stops_when_feed_is_exhausted() {
        use crate::feed::ChannelFeed;

        let sink = Arc::new(VecSink::default());
        let emitter = Emitter::new(sink.clone(), Arc::new(IngestMetrics::new()));
        let (feed, tx) = ChannelFeed::new("test");
        tx.unbounded_send(
            ProtocolEvent::new("wasm-liquid_stake")
                .with_tx_hash("AB")
                .with_attribute("YW1vdW50", "MTAw"),
        )
        .unwrap();
        drop(tx);

        let stream = EventStream::new(Arc::new(feed), EventAttributeDecoder::default(), emitter)
            .with_reconnect(ReconnectPolicy { initial_ms: 1, max_ms: 1 });
        let (_tx, rx) = watch::channel(false);
        tokio::time::timeout(Duration::from_secs(5), stream.run(rx))
            .await
            .unwrap()
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("amount"), Some(&FieldValue::Str("100".into())));
        assert_eq!(records[0].tx_hash(), Some("AB"));
    }

    #[tokio::test]
    async fn line_stream_run_stops_on_shutdown() {
        let source = Arc::new(MemorySource::new("t"));
        let (stream, sink) = unbonding_stream(source.clone(), Arc::new(MemoryCursorStore::new()));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(stream.run(rx));

        source.append(UNBONDING).unwrap();
        for _ in 0..100 {
            if sink.records().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.records().len(), 2);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
