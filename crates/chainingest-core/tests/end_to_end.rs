//! End-to-end tests: bytes appended to an in-memory source come out of the
//! sink as typed records.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chainingest_core::{
    BlockLineHandler, BlockProfile, Emitter, FieldTypeTable, FieldValue, IngestMetrics,
    LineStream, LineStreamOptions, MemoryCursorStore, MemorySource, OutputRecord, PollOutcome,
    RecordNormalizer, Sink, SinkError,
};

// ─── Helpers ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<OutputRecord>>,
}

#[async_trait]
impl Sink for CollectingSink {
    fn name(&self) -> &str {
        "collect"
    }

    async fn write(&self, record: OutputRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

impl CollectingSink {
    fn take(&self) -> Vec<OutputRecord> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }
}

fn redemption_stream(source: Arc<MemorySource>) -> (LineStream, Arc<CollectingSink>, Arc<IngestMetrics>) {
    let sink = Arc::new(CollectingSink::default());
    let metrics = Arc::new(IngestMetrics::new());
    let options = LineStreamOptions::default();
    let handler = BlockLineHandler::new(&BlockProfile::redemption_rate())
        .with_timestamp_field(options.timestamp_field.clone());
    let stream = LineStream::new(
        "redemptionrate",
        source,
        Box::new(handler),
        Emitter::new(sink.clone(), metrics.clone()),
    )
    .with_normalizer(Arc::new(RecordNormalizer::new(FieldTypeTable::liquid_staking())))
    .with_cursor_store(Arc::new(MemoryCursorStore::new()))
    .with_options(options);
    (stream, sink, metrics)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn redemption_rate_block_becomes_one_typed_record() {
    let source = Arc::new(MemorySource::new("redemptionrate"));
    let (mut stream, sink, _) = redemption_stream(source.clone());

    let before = chrono::Utc::now().timestamp();
    source
        .append("host_zone:\n  redemption_rate: \"1.05\"\n  staked_bal: 1000\n")
        .unwrap();
    stream.poll_once().await.unwrap();

    let records = sink.take();
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.get("redemption_rate"), Some(&FieldValue::Float(1.05)));
    assert_eq!(rec.get("staked_bal"), Some(&FieldValue::Int(1000)));
    let ts = rec.timestamp().expect("timestamp stamped");
    assert!(ts >= before);
    assert_eq!(rec.len(), 3);

    // Unrelated lines never re-trigger emission.
    source.append("  chain_id: archway-1\n  halted: false\n").unwrap();
    stream.poll_once().await.unwrap();
    assert!(sink.take().is_empty());
}

#[tokio::test]
async fn block_split_across_appends_is_emitted_once() {
    let source = Arc::new(MemorySource::new("redemptionrate"));
    let (mut stream, sink, metrics) = redemption_stream(source.clone());

    source.append("  redemption_rate: \"1.0").unwrap();
    assert_eq!(stream.poll_once().await.unwrap(), PollOutcome::Incomplete);
    source.append("7\"\n  staked_").unwrap();
    stream.poll_once().await.unwrap();
    assert!(sink.take().is_empty());
    source.append("bal: \"2500\"\n").unwrap();
    stream.poll_once().await.unwrap();

    let records = sink.take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("redemption_rate"), Some(&FieldValue::Float(1.07)));
    assert_eq!(records[0].get("staked_bal"), Some(&FieldValue::Int(2500)));

    let m = metrics.snapshot();
    assert_eq!(m.lines_read, 2);
    assert_eq!(m.records_emitted, 1);
}

#[tokio::test]
async fn unconvertible_field_is_dropped_not_the_record() {
    let source = Arc::new(MemorySource::new("redemptionrate"));
    let (mut stream, sink, metrics) = redemption_stream(source.clone());

    source
        .append("redemption_rate: not_a_number\nstaked_bal: 10\n")
        .unwrap();
    stream.poll_once().await.unwrap();

    let records = sink.take();
    assert_eq!(records.len(), 1);
    assert!(!records[0].contains("redemption_rate"));
    assert_eq!(records[0].get("staked_bal"), Some(&FieldValue::Int(10)));
    assert_eq!(metrics.snapshot().fields_dropped, 1);
}

#[tokio::test]
async fn rotation_replays_new_content() {
    let source = Arc::new(MemorySource::new("redemptionrate"));
    let (mut stream, sink, metrics) = redemption_stream(source.clone());

    source
        .append("redemption_rate: \"1.05\"\nstaked_bal: \"1000\"\n")
        .unwrap();
    stream.poll_once().await.unwrap();
    assert_eq!(sink.take().len(), 1);

    source
        .replace(b"redemption_rate: \"1.10\"\nstaked_bal: \"1\"\n".to_vec())
        .unwrap();
    stream.poll_once().await.unwrap();

    let records = sink.take();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("redemption_rate"), Some(&FieldValue::Float(1.10)));
    assert_eq!(metrics.snapshot().truncations, 1);
    assert_eq!(stream.cursor().unwrap().generation, 1);
}
