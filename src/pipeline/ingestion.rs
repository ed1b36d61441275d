//! Unified ingestion loop
//!
//! One task owns both stateful engines, so every state mutation is serialized
//! without locks. The loop multiplexes the raw-record channel with the two
//! scheduled sweeps (aggregation flush, blacklist expiry) and routes each
//! normalized event through at most one engine.
//!
//! Error discipline: malformed records and per-event engine rejections are
//! logged and skipped; a state-store failure surfacing here has already been
//! retried and is fatal to the whole stage.

use crate::aggregator::{AggregationEngine, AggregationError};
use crate::blacklist::{BlacklistDiffEngine, DiffError};
use crate::event::normalizer::{normalize, SourceContext};
use crate::event::schema::NormalizedEvent;
use crate::pipeline::reader::InboundMessage;
use crate::pipeline::routing::{OutboundMessage, Stage};
use crate::sources::SourcesConfig;
use chrono::Utc;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct PipelineConfig {
    pub flush_interval: Duration,
    pub expire_interval: Duration,
}

/// Run the ingestion loop until the inbound channel closes.
///
/// On shutdown every open aggregation window is flushed; blacklist state
/// simply stays durable and picks up where it left off on the next run.
pub async fn run_pipeline(
    mut rx: mpsc::Receiver<InboundMessage>,
    tx: mpsc::Sender<OutboundMessage>,
    mut aggregator: AggregationEngine,
    mut blacklist: BlacklistDiffEngine,
    sources: Arc<SourcesConfig>,
    config: PipelineConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut flush_timer = tokio::time::interval(config.flush_interval);
    let mut expire_timer = tokio::time::interval(config.expire_interval);
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    expire_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Blacklist sources with an observation cycle currently open
    let mut open_runs: HashSet<String> = HashSet::new();
    let mut processed: u64 = 0;
    let mut skipped: u64 = 0;

    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(InboundMessage::Record { source, raw, arrival_time, alt_time }) => {
                        let cfg = match sources.get(&source) {
                            Some(cfg) => cfg,
                            None => {
                                warn!("Dropping record from unconfigured source {}", source);
                                skipped += 1;
                                continue;
                            }
                        };
                        let raw_map = match raw.as_object() {
                            Some(map) => map,
                            None => {
                                warn!("Dropping non-object raw record from {}", source);
                                skipped += 1;
                                continue;
                            }
                        };
                        let ctx = SourceContext {
                            source: source.clone(),
                            restriction: cfg.restriction,
                            confidence: cfg.confidence,
                            category: cfg.category,
                            policy: cfg.policy,
                            arrival_time,
                            alt_time_hint: alt_time,
                        };
                        let event = match normalize(raw_map, &ctx) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!("Dropping record from {}: {}", source, e);
                                skipped += 1;
                                continue;
                            }
                        };

                        if cfg.aggregate.is_some() {
                            match aggregator.ingest(&event).await {
                                Ok(Some(summary)) => {
                                    emit(&tx, Stage::Aggregated, summary).await?;
                                }
                                Ok(None) => {}
                                Err(AggregationError::Key(e)) => {
                                    warn!("Dropping record from {}: {}", source, e);
                                    skipped += 1;
                                    continue;
                                }
                                Err(AggregationError::Store(e)) => {
                                    error!("Aggregation state store failed: {}", e);
                                    return Err(e);
                                }
                            }
                        } else if cfg.blacklist.is_some() {
                            let source_label = source.to_string();
                            if open_runs.insert(source_label) {
                                blacklist.begin_run(&source);
                            }
                            match blacklist.compare(&event).await {
                                Ok(out) => emit(&tx, Stage::Diffed, out).await?,
                                Err(DiffError::Identity(e)) => {
                                    warn!("Dropping record from {}: {}", source, e);
                                    skipped += 1;
                                    continue;
                                }
                                Err(DiffError::Store(e)) => {
                                    error!("Blacklist state store failed: {}", e);
                                    return Err(e);
                                }
                            }
                        } else {
                            emit(&tx, Stage::Normalized, event).await?;
                        }
                        processed += 1;
                    }
                    Some(InboundMessage::EndOfFeed { source }) => {
                        open_runs.remove(&source.to_string());
                        match blacklist.finish_run(&source).await {
                            Ok(delisted) => {
                                if !delisted.is_empty() {
                                    info!("Delisting {} absent entries from {}", delisted.len(), source);
                                }
                                for event in delisted {
                                    emit(&tx, Stage::Diffed, event).await?;
                                }
                            }
                            Err(DiffError::Store(e)) => {
                                error!("Blacklist state store failed: {}", e);
                                return Err(e);
                            }
                            Err(e) => warn!("Run close failed for {}: {}", source, e),
                        }
                    }
                    None => {
                        // Input is gone; flush open windows before exiting so
                        // nothing waits for a restart to surface
                        info!(
                            "Input closed after {} records ({} skipped), flushing {} open windows",
                            processed, skipped, aggregator.pending()
                        );
                        match aggregator.flush_all().await {
                            Ok(flushed) => {
                                for event in flushed {
                                    emit(&tx, Stage::Aggregated, event).await?;
                                }
                            }
                            Err(AggregationError::Store(e)) => {
                                error!("Aggregation state store failed: {}", e);
                                return Err(e);
                            }
                            Err(e) => error!("Shutdown flush failed: {}", e),
                        }
                        return Ok(());
                    }
                }
            }
            _ = flush_timer.tick() => {
                match aggregator.flush_due(Utc::now()).await {
                    Ok(flushed) => {
                        if !flushed.is_empty() {
                            info!(
                                "Flushed {} idle windows, {} still open, {} records so far",
                                flushed.len(), aggregator.pending(), processed
                            );
                        }
                        for event in flushed {
                            emit(&tx, Stage::Aggregated, event).await?;
                        }
                    }
                    Err(AggregationError::Store(e)) => {
                        error!("Aggregation state store failed: {}", e);
                        return Err(e);
                    }
                    Err(e) => error!("Scheduled flush failed: {}", e),
                }
            }
            _ = expire_timer.tick() => {
                match blacklist.expire_due(Utc::now()).await {
                    Ok(expired) => {
                        if !expired.is_empty() {
                            info!("Expired {} blacklist entries", expired.len());
                        }
                        for event in expired {
                            emit(&tx, Stage::Diffed, event).await?;
                        }
                    }
                    Err(DiffError::Store(e)) => {
                        error!("Blacklist state store failed: {}", e);
                        return Err(e);
                    }
                    Err(e) => error!("Expiry sweep failed: {}", e),
                }
            }
        }
    }
}

async fn emit(
    tx: &mpsc::Sender<OutboundMessage>,
    stage: Stage,
    event: NormalizedEvent,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tx.send(OutboundMessage::new(stage, event))
        .await
        .map_err(|_| "outbound channel closed".into())
}
