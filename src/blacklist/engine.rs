//! Stateful comparator for blacklist feeds
//!
//! Per-identity state machine: UNSEEN -> ACTIVE -> (REFRESHED | SUPERSEDED)
//! -> DELISTED/EXPIRED. Delisting-by-absence applies only to sources
//! configured as full-snapshot feeds; incremental feeds never delist on
//! absence.

use super::record::BlacklistEntryRecord;
use crate::event::schema::{EntryStatus, EventType, NormalizedEvent, Source};
use crate::sources::{FeedShape, SourcesConfig};
use crate::store::{StateKind, StateStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// The event carries no usable identity indicator. Fatal per event.
#[derive(Debug)]
pub struct IdentityError {
    pub source: String,
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no identity indicator (url/fqdn/ip) in blacklist event from {}",
            self.source
        )
    }
}

impl Error for IdentityError {}

#[derive(Debug)]
pub enum DiffError {
    Identity(IdentityError),
    Store(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffError::Identity(e) => write!(f, "{}", e),
            DiffError::Store(e) => write!(f, "state store failure: {}", e),
        }
    }
}

impl Error for DiffError {}

/// Natural key of a blacklist entry within its source: the most specific
/// indicator present: url, then fqdn, then the first address ip.
pub fn identity_of(event: &NormalizedEvent) -> Option<String> {
    if let Some(ref url) = event.url {
        return Some(format!("url:{}", url));
    }
    if let Some(ref fqdn) = event.fqdn {
        return Some(format!("fqdn:{}", fqdn));
    }
    event
        .address
        .as_ref()
        .and_then(|a| a.first())
        .map(|a| format!("ip:{}", a.ip))
}

pub struct BlacklistDiffEngine {
    records: HashMap<(String, String), BlacklistEntryRecord>,
    /// Identities observed since the current run began, per source
    run_seen: HashMap<String, HashSet<String>>,
    store: Arc<dyn StateStore>,
    sources: Arc<SourcesConfig>,
}

impl BlacklistDiffEngine {
    pub fn new(store: Arc<dyn StateStore>, sources: Arc<SourcesConfig>) -> Self {
        Self {
            records: HashMap::new(),
            run_seen: HashMap::new(),
            store,
            sources,
        }
    }

    /// Reload all last-known entries from the durable store. Must complete
    /// before any message is consumed.
    pub async fn load_state(&mut self) -> Result<usize, Box<dyn Error + Send + Sync>> {
        let stored = self.store.load_all(StateKind::Blacklist).await?;
        let mut loaded = 0;
        for item in stored {
            match serde_json::from_str::<BlacklistEntryRecord>(&item.record) {
                Ok(record) => {
                    self.records.insert((item.source, item.key), record);
                    loaded += 1;
                }
                Err(e) => {
                    log::error!(
                        "discarding unreadable blacklist record {}/{}: {}",
                        item.source,
                        item.key,
                        e
                    );
                }
            }
        }
        Ok(loaded)
    }

    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    /// Start a new observation cycle for a source.
    pub fn begin_run(&mut self, source: &Source) {
        self.run_seen.insert(source.to_string(), HashSet::new());
    }

    /// Classify one currently-observed member and return the event to emit.
    pub async fn compare(
        &mut self,
        event: &NormalizedEvent,
    ) -> Result<NormalizedEvent, DiffError> {
        let source_label = event.source.to_string();
        let identity = identity_of(event).ok_or_else(|| {
            DiffError::Identity(IdentityError {
                source: source_label.clone(),
            })
        })?;

        self.run_seen
            .entry(source_label.clone())
            .or_default()
            .insert(identity.clone());

        let key = (source_label.clone(), identity.clone());
        let mut out = event.clone();
        out.status = Some(EntryStatus::Active);

        match self.records.get(&key) {
            None => {
                out.event_type = EventType::BlNew;
                out.id = out.compute_id();
            }
            Some(stored) if stored.event.diff_fingerprint() == out.diff_fingerprint() => {
                // Same substance: refresh the entry under its existing id
                // (covers both an expiry-only difference and a plain re-listing)
                out.event_type = EventType::BlUpdate;
                out.id = stored.id().to_string();
            }
            Some(stored) => {
                out.event_type = EventType::BlChange;
                out.replaces = Some(stored.id().to_string());
                out.id = out.compute_id();
            }
        }

        let record = BlacklistEntryRecord::new(out.clone());
        self.persist(&source_label, &identity, &record).await?;
        self.records.insert(key, record);
        Ok(out)
    }

    /// Close the current observation cycle for a source.
    ///
    /// For full-snapshot feeds, every active identity not observed during the
    /// run is delisted. For incremental feeds absence implies nothing and this
    /// only resets the run bookkeeping.
    pub async fn finish_run(
        &mut self,
        source: &Source,
    ) -> Result<Vec<NormalizedEvent>, DiffError> {
        let source_label = source.to_string();
        let seen = self.run_seen.remove(&source_label).unwrap_or_default();

        let shape = self
            .sources
            .get(source)
            .and_then(|cfg| cfg.blacklist.as_ref())
            .map(|bl| bl.feed_shape)
            .unwrap_or_default();
        if shape != FeedShape::FullSnapshot {
            return Ok(Vec::new());
        }

        let absent: Vec<(String, String)> = self
            .records
            .keys()
            .filter(|(src, identity)| *src == source_label && !seen.contains(identity))
            .cloned()
            .collect();

        let mut delisted = Vec::with_capacity(absent.len());
        for key in absent {
            self.store
                .delete(StateKind::Blacklist, &key.0, &key.1)
                .await
                .map_err(DiffError::Store)?;
            if let Some(record) = self.records.remove(&key) {
                let mut out = record.event;
                out.event_type = EventType::BlDelist;
                out.status = Some(EntryStatus::Delisted);
                delisted.push(out);
            }
        }
        Ok(delisted)
    }

    /// Scheduled sweep: emit exactly one expire event for every stored entry
    /// whose `expires` passed without being refreshed.
    pub async fn expire_due(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<NormalizedEvent>, DiffError> {
        let due: Vec<(String, String)> = self
            .records
            .iter()
            .filter(|(_, record)| record.expires.map_or(false, |e| e <= now))
            .map(|(key, _)| key.clone())
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for key in due {
            self.store
                .delete(StateKind::Blacklist, &key.0, &key.1)
                .await
                .map_err(DiffError::Store)?;
            if let Some(record) = self.records.remove(&key) {
                let mut out = record.event;
                out.event_type = EventType::BlExpire;
                out.status = Some(EntryStatus::Expired);
                expired.push(out);
            }
        }
        Ok(expired)
    }

    async fn persist(
        &self,
        source_label: &str,
        identity: &str,
        record: &BlacklistEntryRecord,
    ) -> Result<(), DiffError> {
        let blob =
            serde_json::to_string(record).map_err(|e| DiffError::Store(Box::new(e)))?;
        self.store
            .upsert(StateKind::Blacklist, source_label, identity, &blob)
            .await
            .map_err(DiffError::Store)
    }
}
