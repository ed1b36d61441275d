//! Persisted state of one blacklist identity

use crate::event::schema::NormalizedEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last-known-emitted state of one blacklist identity.
///
/// At most one active record exists per `(source, identity)`; superseding it
/// always mints a new event id linked back through `replaces`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntryRecord {
    /// The full payload last emitted for this identity (carries the id)
    pub event: NormalizedEvent,
    /// Expiry deadline; entries past it are swept by `expire_due`
    pub expires: Option<DateTime<Utc>>,
}

impl BlacklistEntryRecord {
    pub fn new(event: NormalizedEvent) -> Self {
        let expires = event.expires;
        Self { event, expires }
    }

    pub fn id(&self) -> &str {
        &self.event.id
    }
}
