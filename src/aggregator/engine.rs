//! Stateful windowed deduplicator for high-frequency sources
//!
//! State machine per group: ABSENT -> ACTIVE -> (merging events) -> FLUSHED.
//! Every mutation is persisted before the engine reports the event as
//! processed, so at-least-once delivery never silently loses or
//! double-flushes a group across restarts.

use super::record::AggregationRecord;
use crate::event::schema::NormalizedEvent;
use crate::sources::SourcesConfig;
use crate::store::{StateKind, StateStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Separator between group-id components; a unit separator never occurs in
/// adjusted field values.
pub const GROUP_COMPONENT_SEPARATOR: &str = "\u{1f}";

/// Placeholder for a missing component, distinct from any real value.
pub const MISSING_COMPONENT: &str = "<none>";

/// All configured components were missing: the configuration does not fit
/// this source's data. Fatal per event, never retried.
#[derive(Debug)]
pub struct GroupKeyError {
    pub source: String,
    pub components: Vec<String>,
}

impl fmt::Display for GroupKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no group id component of {:?} present in event from {}",
            self.components, self.source
        )
    }
}

impl Error for GroupKeyError {}

/// Distinguishes per-event failures (skip and report) from store failures
/// (fatal to the stage).
#[derive(Debug)]
pub enum AggregationError {
    Key(GroupKeyError),
    Store(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationError::Key(e) => write!(f, "{}", e),
            AggregationError::Store(e) => write!(f, "state store failure: {}", e),
        }
    }
}

impl Error for AggregationError {}

/// Join the configured component values into a group id.
pub fn compute_group_id(
    event: &NormalizedEvent,
    components: &[String],
) -> Result<String, GroupKeyError> {
    let mut any_present = false;
    let mut parts = Vec::with_capacity(components.len());
    for name in components {
        match event.component_value(name) {
            Some(value) => {
                any_present = true;
                parts.push(value);
            }
            None => parts.push(MISSING_COMPONENT.to_string()),
        }
    }
    if !any_present || components.is_empty() {
        return Err(GroupKeyError {
            source: event.source.to_string(),
            components: components.to_vec(),
        });
    }
    Ok(parts.join(GROUP_COMPONENT_SEPARATOR))
}

pub struct AggregationEngine {
    records: HashMap<(String, String), AggregationRecord>,
    store: Arc<dyn StateStore>,
    sources: Arc<SourcesConfig>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn StateStore>, sources: Arc<SourcesConfig>) -> Self {
        Self {
            records: HashMap::new(),
            store,
            sources,
        }
    }

    /// Reload the full pending-group set from the durable store.
    ///
    /// Must complete before any message is consumed. Unreadable records are
    /// dropped with an error log rather than poisoning the whole stage.
    pub async fn load_state(&mut self) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let stored = self.store.load_all(StateKind::Aggregation).await?;
        let mut loaded = 0;
        for item in stored {
            match serde_json::from_str::<AggregationRecord>(&item.record) {
                Ok(record) => {
                    self.records.insert((item.source, item.key), record);
                    loaded += 1;
                }
                Err(e) => {
                    log::error!(
                        "discarding unreadable aggregation record {}/{}: {}",
                        item.source,
                        item.key,
                        e
                    );
                }
            }
        }
        Ok(loaded)
    }

    /// Number of open groups currently held.
    pub fn pending(&self) -> usize {
        self.records.len()
    }

    /// Take one event into its group.
    ///
    /// Returns `Some(summary)` when the event's time fell outside the group's
    /// tolerance window: the old group is flushed immediately and a new one
    /// opened from this event. Within tolerance the event merges silently.
    pub async fn ingest(
        &mut self,
        event: &NormalizedEvent,
    ) -> Result<Option<NormalizedEvent>, AggregationError> {
        let source_label = event.source.to_string();
        let aggregate = self
            .sources
            .get(&event.source)
            .and_then(|cfg| cfg.aggregate.as_ref())
            .ok_or_else(|| {
                AggregationError::Key(GroupKeyError {
                    source: source_label.clone(),
                    components: Vec::new(),
                })
            })?;

        let group_id = compute_group_id(event, &aggregate.group_id_components)
            .map_err(AggregationError::Key)?;
        let tolerance = self.sources.tolerance_for(aggregate);
        let key = (source_label.clone(), group_id.clone());

        let flushed = match self.records.get_mut(&key) {
            None => {
                let record = AggregationRecord::open(event.clone());
                self.persist(&source_label, &group_id, &record).await?;
                self.records.insert(key, record);
                None
            }
            Some(record) => {
                let gap = (event.time - record.last_time).num_seconds();
                if gap.abs() <= tolerance {
                    record.merge(event.time);
                    let snapshot = record.clone();
                    self.persist(&source_label, &group_id, &snapshot).await?;
                    None
                } else {
                    // Tolerance is a hard boundary: flush the stale group and
                    // open a fresh one from this event.
                    let summary = record.summarize();
                    let fresh = AggregationRecord::open(event.clone());
                    self.persist(&source_label, &group_id, &fresh).await?;
                    self.records.insert(key, fresh);
                    Some(summary)
                }
            }
        };
        Ok(flushed)
    }

    /// Scheduled sweep: flush every group whose last activity is older than
    /// its tolerance window.
    pub async fn flush_due(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<NormalizedEvent>, AggregationError> {
        let due: Vec<(String, String)> = self
            .records
            .iter()
            .filter(|((source_label, _), record)| {
                let tolerance = self.tolerance_of(source_label);
                (now - record.last_time).num_seconds() > tolerance
            })
            .map(|(key, _)| key.clone())
            .collect();

        self.flush_keys(due).await
    }

    /// Flush every held group (shutdown / checkpoint).
    pub async fn flush_all(&mut self) -> Result<Vec<NormalizedEvent>, AggregationError> {
        let keys: Vec<(String, String)> = self.records.keys().cloned().collect();
        self.flush_keys(keys).await
    }

    async fn flush_keys(
        &mut self,
        keys: Vec<(String, String)>,
    ) -> Result<Vec<NormalizedEvent>, AggregationError> {
        let mut flushed = Vec::with_capacity(keys.len());
        for key in keys {
            // Removal is persisted before the summary is handed downstream
            self.store
                .delete(StateKind::Aggregation, &key.0, &key.1)
                .await
                .map_err(AggregationError::Store)?;
            if let Some(record) = self.records.remove(&key) {
                flushed.push(record.summarize());
            }
        }
        Ok(flushed)
    }

    async fn persist(
        &self,
        source_label: &str,
        group_id: &str,
        record: &AggregationRecord,
    ) -> Result<(), AggregationError> {
        let blob = serde_json::to_string(record)
            .map_err(|e| AggregationError::Store(Box::new(e)))?;
        self.store
            .upsert(StateKind::Aggregation, source_label, group_id, &blob)
            .await
            .map_err(AggregationError::Store)
    }

    fn tolerance_of(&self, source_label: &str) -> i64 {
        self.sources
            .sources
            .get(source_label)
            .and_then(|cfg| cfg.aggregate.as_ref())
            .map(|a| self.sources.tolerance_for(a))
            .unwrap_or(self.sources.default_time_tolerance_secs)
    }
}
