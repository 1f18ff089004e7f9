//! `chainingest run`: start every configured stream and ingest until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chainingest_core::{
    BlockLineHandler, CursorStore, DecoderConfig, EventAttributeDecoder, EventStream,
    FieldTypeTable, IngestEngine, LineHandler, LineStream, LineStreamOptions, MemoryCursorStore,
    RecordNormalizer, Sink,
};
use chainingest_sources::{CometWsFeed, FileSource, TxLogLineHandler};
use chainingest_storage::{ElasticsearchSink, JsonFileCursorStore, MemorySink, StdoutSink};
use tracing::info;

use crate::config::{IngestConfig, SinkConfig, StreamConfig};

pub async fn run(config: IngestConfig) -> Result<()> {
    let table = config.field_table();
    let sink = build_sink(&config.sink, &table).await?;
    let store: Arc<dyn CursorStore> = match &config.cursor_dir {
        Some(dir) => Arc::new(
            JsonFileCursorStore::open(dir)
                .await
                .with_context(|| format!("open cursor directory '{}'", dir.display()))?,
        ),
        None => Arc::new(MemoryCursorStore::new()),
    };
    let normalizer = Arc::new(RecordNormalizer::new(table));

    let mut engine = IngestEngine::new();
    for stream in &config.streams {
        spawn_stream(
            &mut engine,
            stream,
            &config.decoder,
            sink.clone(),
            store.clone(),
            normalizer.clone(),
        )?;
    }
    info!(streams = engine.stream_count(), sink = sink.name(), "ingestion running");

    wait_and_stop(engine).await
}

/// Follow one key/value dump with a built-in profile, printing records.
pub async fn tail(
    path: &str,
    profile: chainingest_core::BlockProfile,
    options: LineStreamOptions,
) -> Result<()> {
    let mut engine = IngestEngine::new();
    let emitter = engine.emitter(Arc::new(StdoutSink::new()));
    let source = Arc::new(
        FileSource::new(path).with_poll_interval(Duration::from_millis(options.poll_interval_ms)),
    );
    let handler =
        BlockLineHandler::new(&profile).with_timestamp_field(options.timestamp_field.clone());
    let stream = LineStream::new(path, source, Box::new(handler), emitter)
        .with_normalizer(Arc::new(RecordNormalizer::new(
            FieldTypeTable::liquid_staking(),
        )))
        .with_options(options);
    engine.spawn_line_stream(stream);
    wait_and_stop(engine).await
}

async fn build_sink(config: &SinkConfig, table: &FieldTypeTable) -> Result<Arc<dyn Sink>> {
    Ok(match config {
        SinkConfig::Stdout => Arc::new(StdoutSink::new()),
        SinkConfig::Memory => Arc::new(MemorySink::new()),
        SinkConfig::Elasticsearch {
            config,
            ensure_index,
        } => {
            let sink = ElasticsearchSink::new(config.clone())?;
            if *ensure_index {
                let created = sink
                    .ensure_index(table)
                    .await
                    .with_context(|| format!("provision index '{}'", config.index))?;
                info!(index = %config.index, created, "index ready");
            }
            Arc::new(sink)
        }
    })
}

fn spawn_stream(
    engine: &mut IngestEngine,
    stream: &StreamConfig,
    decoder: &DecoderConfig,
    sink: Arc<dyn Sink>,
    store: Arc<dyn CursorStore>,
    normalizer: Arc<RecordNormalizer>,
) -> Result<()> {
    let emitter = engine.emitter(sink);
    match stream {
        StreamConfig::Lines {
            name,
            path,
            profile,
            options,
        } => {
            let profile = profile.resolve()?;
            let handler = BlockLineHandler::new(&profile)
                .with_timestamp_field(options.timestamp_field.clone());
            let stream = line_stream(name, path, Box::new(handler), options, emitter)
                .with_normalizer(normalizer)
                .with_cursor_store(store);
            engine.spawn_line_stream(stream);
        }
        StreamConfig::TxLog {
            name,
            path,
            options,
        } => {
            let handler = TxLogLineHandler::new(decoder.clone());
            let stream = line_stream(name, path, Box::new(handler), options, emitter)
                .with_normalizer(normalizer)
                .with_cursor_store(store);
            engine.spawn_line_stream(stream);
        }
        StreamConfig::Websocket {
            name,
            url,
            reconnect,
            ..
        } => {
            let feed = CometWsFeed::new(url.clone(), stream.subscription_query()?).with_name(name);
            let stream = EventStream::new(
                Arc::new(feed),
                EventAttributeDecoder::new(decoder.clone()),
                emitter,
            )
            .with_normalizer(normalizer)
            .with_reconnect(reconnect.clone());
            engine.spawn_event_stream(name, stream);
        }
    }
    Ok(())
}

fn line_stream(
    name: &str,
    path: &std::path::Path,
    handler: Box<dyn LineHandler>,
    options: &LineStreamOptions,
    emitter: chainingest_core::Emitter,
) -> LineStream {
    let source = Arc::new(
        FileSource::new(path).with_poll_interval(Duration::from_millis(options.poll_interval_ms)),
    );
    LineStream::new(name, source, handler, emitter).with_options(options.clone())
}

async fn wait_and_stop(engine: IngestEngine) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    let metrics = engine.metrics_handle();
    engine.shutdown().await?;
    eprintln!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    Ok(())
}
