//! Durable key-value state store for the stateful engines
//!
//! Both engines persist every state mutation here before the triggering
//! message counts as processed, and reload their full working set at startup.
//! The store is the single serialization point of a process: one logical
//! writer per engine, atomic per-key upsert and delete.

pub mod retry;
pub mod sqlite;

use async_trait::async_trait;

pub use retry::RetryingStore;
pub use sqlite::SqliteStateStore;

/// Which engine's state a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Aggregation,
    Blacklist,
}

impl StateKind {
    pub fn table(&self) -> &'static str {
        match self {
            StateKind::Aggregation => "aggregation_state",
            StateKind::Blacklist => "blacklist_state",
        }
    }
}

/// One persisted record, as loaded at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub source: String,
    pub key: String,
    pub record: String,
}

/// Key -> record mapping keyed by `(source, key)`.
///
/// `record` is an opaque JSON blob owned by the engine. Implementations must
/// make upsert and delete atomic per key and `load_all` return a consistent
/// snapshot.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn upsert(
        &self,
        kind: StateKind,
        source: &str,
        key: &str,
        record: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn delete(
        &self,
        kind: StateKind,
        source: &str,
        key: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn load_all(
        &self,
        kind: StateKind,
    ) -> Result<Vec<StoredRecord>, Box<dyn std::error::Error + Send + Sync>>;
}
