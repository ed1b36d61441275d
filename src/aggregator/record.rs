//! Persisted state of one high-frequency group

use crate::event::schema::NormalizedEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one open aggregation window.
///
/// `first_event` is the template for the eventual summarized output;
/// `first_time`/`last_time` track the min/max occurrence times seen, which is
/// what the conservation guarantee is stated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRecord {
    pub first_event: NormalizedEvent,
    pub count: u32,
    pub first_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
}

impl AggregationRecord {
    /// Open a new window from the first event of a group.
    pub fn open(event: NormalizedEvent) -> Self {
        let time = event.time;
        Self {
            first_event: event,
            count: 1,
            first_time: time,
            last_time: time,
        }
    }

    /// Merge one more in-tolerance event into the window.
    ///
    /// A late arrival may move `first_time` backward; `last_time` only ever
    /// grows.
    pub fn merge(&mut self, time: DateTime<Utc>) {
        self.count += 1;
        if time > self.last_time {
            self.last_time = time;
        }
        if time < self.first_time {
            self.first_time = time;
        }
    }

    /// Build the summarized output event for this window.
    ///
    /// Reuses the first event's payload, rewrites the time-derived attributes
    /// (`time` = first seen, `until` = last seen) and carries the merge
    /// count. The id is recomputed from content so an interrupted run and an
    /// uninterrupted one produce the same output.
    pub fn summarize(&self) -> NormalizedEvent {
        let mut event = self.first_event.clone();
        event.time = self.first_time;
        event.until = Some(self.last_time);
        event.count = Some(self.count);
        event.id = event.compute_id();
        event
    }
}
