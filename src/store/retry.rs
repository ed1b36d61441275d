//! Retry wrapper around a state store
//!
//! Transient store I/O errors are retried with exponential backoff; once the
//! budget is exhausted the error propagates, which the ingestion loop treats
//! as fatal to the stage.

use super::{StateKind, StateStore, StoredRecord};
use crate::backoff::ExponentialBackoff;
use async_trait::async_trait;

pub struct RetryingStore<S: StateStore> {
    inner: S,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
}

impl<S: StateStore> RetryingStore<S> {
    pub fn new(inner: S, max_retries: u32) -> Self {
        Self {
            inner,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            max_retries,
        }
    }

    #[cfg(test)]
    fn with_delays(mut self, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.initial_delay_ms, self.max_delay_ms, self.max_retries)
    }
}

#[async_trait]
impl<S: StateStore> StateStore for RetryingStore<S> {
    async fn upsert(
        &self,
        kind: StateKind,
        source: &str,
        key: &str,
        record: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut backoff = self.backoff();
        loop {
            match self.inner.upsert(kind, source, key, record).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("state store upsert failed ({}/{}): {}", source, key, e);
                    if backoff.sleep().await.is_err() {
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn delete(
        &self,
        kind: StateKind,
        source: &str,
        key: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut backoff = self.backoff();
        loop {
            match self.inner.delete(kind, source, key).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("state store delete failed ({}/{}): {}", source, key, e);
                    if backoff.sleep().await.is_err() {
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn load_all(
        &self,
        kind: StateKind,
    ) -> Result<Vec<StoredRecord>, Box<dyn std::error::Error + Send + Sync>> {
        let mut backoff = self.backoff();
        loop {
            match self.inner.load_all(kind).await {
                Ok(records) => return Ok(records),
                Err(e) => {
                    log::warn!("state store load failed: {}", e);
                    if backoff.sleep().await.is_err() {
                        return Err(e);
                    }
                }
            }
        }
    }
}
