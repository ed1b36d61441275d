//! Raw record -> NormalizedEvent conversion
//!
//! `normalize()` is a pure function of its inputs: the raw mapping from a
//! collector plus the per-source context (constant items, arrival time,
//! optional alternate time hint). A crashed stage can re-run normalization
//! of the same message and get a byte-identical event back.

use super::adjusters::registry;
use super::schema::{
    Address, Category, Confidence, EntryStatus, EventType, NormalizedEvent, Restriction, Source,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

/// What to do when an optional field fails its adjuster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NormalizationPolicy {
    /// Drop the offending field, keep the event (warn-level signal)
    #[serde(rename = "lenient")]
    #[default]
    Lenient,
    /// Any field failure is fatal to the event
    #[serde(rename = "strict")]
    Strict,
}

/// Fatal normalization failure; carries the offending key.
#[derive(Debug)]
pub struct NormalizationError {
    pub key: String,
    pub reason: String,
}

impl fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "normalization failed on {:?}: {}", self.key, self.reason)
    }
}

impl Error for NormalizationError {}

/// Per-source context supplied by the caller for every raw record.
///
/// The constant items (restriction, confidence, category) come from the
/// source configuration and always win over raw content; a raw record that
/// tries to set them itself is rejected.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub source: Source,
    pub restriction: Restriction,
    pub confidence: Confidence,
    pub category: Category,
    pub policy: NormalizationPolicy,
    pub arrival_time: DateTime<Utc>,
    /// E.g. a mail `Date` header or HTTP `Last-Modified`; used only when the
    /// record itself carries no `time`.
    pub alt_time_hint: Option<DateTime<Utc>>,
}

// Keys owned by the pipeline itself; their appearance in raw content is a
// collision, not data.
const RESERVED_KEYS: [&str; 6] = ["id", "type", "source", "restriction", "confidence", "category"];

/// Convert one raw collector mapping into a canonical event.
///
/// Mandatory-field failures (reserved-key collision, unparsable `time`) are
/// fatal per event. Optional-field failures follow the per-source policy:
/// lenient drops the field with a warning, strict rejects the event.
pub fn normalize(
    raw: &serde_json::Map<String, Value>,
    ctx: &SourceContext,
) -> Result<NormalizedEvent, NormalizationError> {
    for key in RESERVED_KEYS {
        if raw.contains_key(key) {
            return Err(NormalizationError {
                key: key.to_string(),
                reason: "collides with a caller-injected constant item".to_string(),
            });
        }
    }

    let table = registry();
    let mut adjusted: BTreeMap<String, Value> = BTreeMap::new();

    for (key, value) in raw {
        let outcome = match table.get(key.as_str()) {
            Some(adjuster) => adjuster(value),
            None => Err("no adjuster registered".to_string()),
        };
        match outcome {
            Ok(v) => {
                adjusted.insert(key.clone(), v);
            }
            Err(reason) if key == "time" => {
                // Occurrence time is mandatory once present; never guess past
                // an explicit but broken value.
                return Err(NormalizationError {
                    key: key.clone(),
                    reason,
                });
            }
            Err(reason) => match ctx.policy {
                NormalizationPolicy::Strict => {
                    return Err(NormalizationError {
                        key: key.clone(),
                        reason,
                    });
                }
                NormalizationPolicy::Lenient => {
                    log::warn!(
                        "dropping field {:?} from {} record: {}",
                        key,
                        ctx.source,
                        reason
                    );
                }
            },
        }
    }

    let time = match take_time(&mut adjusted, "time") {
        Some(t) => t,
        None => ctx.alt_time_hint.unwrap_or(ctx.arrival_time),
    };

    let mut event = NormalizedEvent {
        id: String::new(),
        event_type: EventType::Event,
        source: ctx.source.clone(),
        restriction: ctx.restriction,
        confidence: ctx.confidence,
        category: ctx.category,
        time,
        address: take_typed::<Vec<Address>>(&mut adjusted, "address")
            .or_else(|| take_typed::<Vec<Address>>(&mut adjusted, "ip")),
        fqdn: take_typed(&mut adjusted, "fqdn"),
        url: take_typed(&mut adjusted, "url"),
        md5: take_typed(&mut adjusted, "md5"),
        sha1: take_typed(&mut adjusted, "sha1"),
        sport: take_typed(&mut adjusted, "sport"),
        dport: take_typed(&mut adjusted, "dport"),
        proto: take_typed(&mut adjusted, "proto"),
        count: take_typed(&mut adjusted, "count"),
        until: take_time(&mut adjusted, "until"),
        expires: take_time(&mut adjusted, "expires"),
        status: take_typed::<EntryStatus>(&mut adjusted, "status"),
        replaces: None,
        extra: adjusted, // whatever remains is a category-specific attribute
    };
    event.id = event.compute_id();
    Ok(event)
}

fn take_time(adjusted: &mut BTreeMap<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    // Adjusters canonicalize times to RFC 3339, so this parse cannot fail for
    // values that passed adjustment.
    adjusted
        .remove(key)
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn take_typed<T: serde::de::DeserializeOwned>(
    adjusted: &mut BTreeMap<String, Value>,
    key: &str,
) -> Option<T> {
    adjusted
        .remove(key)
        .and_then(|v| serde_json::from_value(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(policy: NormalizationPolicy) -> SourceContext {
        SourceContext {
            source: Source::new("testprov", "scan"),
            restriction: Restriction::NeedToKnow,
            confidence: Confidence::High,
            category: Category::Scanning,
            policy,
            arrival_time: DateTime::from_timestamp(1_700_000_500, 0).unwrap(),
            alt_time_hint: None,
        }
    }

    fn raw(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_normalize_full_record() {
        let record = raw(json!({
            "time": 1700000000,
            "ip": "192.0.2.7",
            "dport": "22",
            "proto": "TCP",
            "name": "ssh scan"
        }));
        let event = normalize(&record, &ctx(NormalizationPolicy::Lenient)).unwrap();

        assert_eq!(event.event_type, EventType::Event);
        assert_eq!(event.source.to_string(), "testprov.scan");
        assert_eq!(event.time.timestamp(), 1_700_000_000);
        assert_eq!(event.address.as_ref().unwrap()[0].ip.to_string(), "192.0.2.7");
        assert_eq!(event.dport, Some(22));
        assert_eq!(event.proto.as_deref(), Some("tcp"));
        assert_eq!(event.extra.get("name"), Some(&json!("ssh scan")));
        assert_eq!(event.id.len(), 32);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let record = raw(json!({
            "time": "2023-11-14T22:13:20Z",
            "fqdn": "Evil.Example.",
            "url": "http://evil.example/x"
        }));
        let context = ctx(NormalizationPolicy::Lenient);
        let a = normalize(&record, &context).unwrap();
        let b = normalize(&record, &context).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_constant_item_collision_rejected() {
        let record = raw(json!({
            "time": 1700000000,
            "restriction": "public"
        }));
        let err = normalize(&record, &ctx(NormalizationPolicy::Lenient)).unwrap_err();
        assert_eq!(err.key, "restriction");
    }

    #[test]
    fn test_broken_time_is_fatal() {
        let record = raw(json!({ "time": "not a time", "fqdn": "ok.example" }));
        let err = normalize(&record, &ctx(NormalizationPolicy::Lenient)).unwrap_err();
        assert_eq!(err.key, "time");
    }

    #[test]
    fn test_lenient_drops_broken_optional_field() {
        let record = raw(json!({
            "time": 1700000000,
            "fqdn": "good.example",
            "dport": "not-a-port"
        }));
        let event = normalize(&record, &ctx(NormalizationPolicy::Lenient)).unwrap();
        assert_eq!(event.fqdn.as_deref(), Some("good.example"));
        assert!(event.dport.is_none());
    }

    #[test]
    fn test_strict_rejects_broken_optional_field() {
        let record = raw(json!({
            "time": 1700000000,
            "dport": "not-a-port"
        }));
        let err = normalize(&record, &ctx(NormalizationPolicy::Strict)).unwrap_err();
        assert_eq!(err.key, "dport");
    }

    #[test]
    fn test_unregistered_key_follows_policy() {
        let record = raw(json!({
            "time": 1700000000,
            "surprise": "value"
        }));
        let lenient = normalize(&record, &ctx(NormalizationPolicy::Lenient)).unwrap();
        assert!(!lenient.extra.contains_key("surprise"));

        let err = normalize(&record, &ctx(NormalizationPolicy::Strict)).unwrap_err();
        assert_eq!(err.key, "surprise");
    }

    #[test]
    fn test_time_fallback_order() {
        let record = raw(json!({ "fqdn": "late.example" }));

        // With a hint, the hint wins
        let mut with_hint = ctx(NormalizationPolicy::Lenient);
        with_hint.alt_time_hint = Some(DateTime::from_timestamp(1_699_999_999, 0).unwrap());
        let event = normalize(&record, &with_hint).unwrap();
        assert_eq!(event.time.timestamp(), 1_699_999_999);

        // Without one, arrival time is used
        let event = normalize(&record, &ctx(NormalizationPolicy::Lenient)).unwrap();
        assert_eq!(event.time.timestamp(), 1_700_000_500);
    }
}
