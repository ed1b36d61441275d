//! Outbound routing keys
//!
//! Every emitted event carries a dotted routing key so downstream consumers
//! can bind on stage, event type, provider or channel without parsing the
//! payload.

use crate::event::schema::NormalizedEvent;
use serde::Serialize;

/// Which pipeline stage emitted the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Straight out of the normalizer, no stateful processing applied
    Normalized,
    /// Summarized window from the aggregation engine
    Aggregated,
    /// Lifecycle transition from the blacklist diff engine
    Diffed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Normalized => "normalized",
            Stage::Aggregated => "aggregated",
            Stage::Diffed => "diffed",
        }
    }
}

/// An event ready for publication, tagged with its routing key.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub routing_key: String,
    pub event: NormalizedEvent,
}

impl OutboundMessage {
    /// Build the `<stage>.<type>.<provider>.<channel>` key for an event.
    pub fn new(stage: Stage, event: NormalizedEvent) -> Self {
        let routing_key = format!(
            "{}.{}.{}.{}",
            stage.as_str(),
            event.event_type.as_str(),
            event.source.provider,
            event.source.channel
        );
        Self { routing_key, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::schema::{
        Category, Confidence, EventType, Restriction, Source,
    };
    use chrono::DateTime;
    use std::collections::BTreeMap;

    fn sample_event(event_type: EventType) -> NormalizedEvent {
        let mut event = NormalizedEvent {
            id: String::new(),
            event_type,
            source: Source::new("spamtrap", "mail"),
            restriction: Restriction::Public,
            confidence: Confidence::High,
            category: Category::Spam,
            time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            address: None,
            fqdn: Some("relay.example".to_string()),
            url: None,
            md5: None,
            sha1: None,
            sport: None,
            dport: None,
            proto: None,
            count: None,
            until: None,
            expires: None,
            status: None,
            replaces: None,
            extra: BTreeMap::new(),
        };
        event.id = event.compute_id();
        event
    }

    #[test]
    fn test_routing_key_shape() {
        let msg = OutboundMessage::new(Stage::Normalized, sample_event(EventType::Event));
        assert_eq!(msg.routing_key, "normalized.event.spamtrap.mail");

        let msg = OutboundMessage::new(Stage::Diffed, sample_event(EventType::BlChange));
        assert_eq!(msg.routing_key, "diffed.bl-change.spamtrap.mail");
    }

    #[test]
    fn test_serializes_event_inline() {
        let msg = OutboundMessage::new(Stage::Aggregated, sample_event(EventType::Event));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["routing_key"], "aggregated.event.spamtrap.mail");
        assert_eq!(json["event"]["fqdn"], "relay.example");
        assert_eq!(json["event"]["type"], "event");
    }
}
