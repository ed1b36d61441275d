//! Pipeline runtime: JSONL in, routed JSONL out
//!
//! Reads raw collector envelopes from a file or stdin, runs them through the
//! normalizer and the two stateful engines, and writes routed events to
//! stdout one JSON object per line. All diagnostics go to stderr so stdout
//! stays a clean event stream.

use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use threatflow::pipeline::{run_pipeline, run_reader, PipelineConfig};
use threatflow::store::{RetryingStore, SqliteStateStore, StateStore};
use threatflow::{AggregationEngine, BlacklistDiffEngine, Config, SourcesConfig};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = Config::from_env();
    info!("Starting threatflow pipeline runtime");
    info!("  State db:  {}", config.db_path);
    info!("  Sources:   {}", config.sources_path);
    info!(
        "  Input:     {}{}",
        config.input_path.as_deref().unwrap_or("<stdin>"),
        if config.follow_input { " (follow)" } else { "" }
    );

    let sources = Arc::new(SourcesConfig::load(&config.sources_path)?);
    let sqlite = SqliteStateStore::new(&config.db_path)?;
    let store: Arc<dyn StateStore> =
        Arc::new(RetryingStore::new(sqlite, config.store_max_retries));

    let mut aggregator = AggregationEngine::new(store.clone(), sources.clone());
    let mut blacklist = BlacklistDiffEngine::new(store.clone(), sources.clone());

    // Full state reload before the first message is consumed
    let windows = aggregator.load_state().await?;
    let entries = blacklist.load_state().await?;
    info!(
        "Restored {} open aggregation windows and {} blacklist entries",
        windows, entries
    );

    let (tx_in, rx_in) = mpsc::channel(config.channel_buffer);
    let (tx_out, mut rx_out) = mpsc::channel(config.channel_buffer);

    let publisher = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx_out.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => {
                    if stdout.write_all(line.as_bytes()).await.is_err()
                        || stdout.write_all(b"\n").await.is_err()
                    {
                        error!("stdout closed, stopping publisher");
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize outbound event: {}", e),
            }
        }
        let _ = stdout.flush().await;
    });

    let input = config.input_path.clone().map(PathBuf::from);
    let reader = tokio::spawn(run_reader(input, config.follow_input, tx_in));

    run_pipeline(
        rx_in,
        tx_out,
        aggregator,
        blacklist,
        sources,
        PipelineConfig {
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            expire_interval: Duration::from_millis(config.expire_interval_ms),
        },
    )
    .await?;

    reader.await??;
    publisher.await?;
    info!("Pipeline runtime stopped");
    Ok(())
}
