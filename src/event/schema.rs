//! Canonical event record and its closed vocabularies
//!
//! `NormalizedEvent` is the single schema shared by the normalizer, the
//! aggregation engine and the blacklist diff engine. Serialization is
//! deterministic (fixed field order, sorted `extra` map), which is what makes
//! content-derived ids and the normalization-idempotence guarantee work.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Two-part source identifier: `provider.channel`
///
/// Serialized as a single dotted string. The provider part must not contain
/// a dot; the channel part may.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Source {
    pub provider: String,
    pub channel: String,
}

impl Source {
    pub fn new(provider: &str, channel: &str) -> Self {
        Self {
            provider: provider.to_string(),
            channel: channel.to_string(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.provider, self.channel)
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((provider, channel)) if !provider.is_empty() && !channel.is_empty() => {
                Ok(Source::new(provider, channel))
            }
            _ => Err(format!("invalid source label: {:?}", s)),
        }
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Classification level of an event (who may see it downstream)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Restriction {
    #[serde(rename = "internal")]
    Internal,
    #[serde(rename = "need-to-know")]
    NeedToKnow,
    #[serde(rename = "public")]
    Public,
}

impl Restriction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Restriction::Internal => "internal",
            Restriction::NeedToKnow => "need-to-know",
            Restriction::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Closed set of threat categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "bots")]
    Bots,
    #[serde(rename = "cnc")]
    Cnc,
    #[serde(rename = "dos-attacker")]
    DosAttacker,
    #[serde(rename = "dos-victim")]
    DosVictim,
    #[serde(rename = "malurl")]
    Malurl,
    #[serde(rename = "phish")]
    Phish,
    #[serde(rename = "proxy")]
    Proxy,
    #[serde(rename = "scanning")]
    Scanning,
    #[serde(rename = "server-exploit")]
    ServerExploit,
    #[serde(rename = "spam")]
    Spam,
    #[serde(rename = "spam-url")]
    SpamUrl,
    #[serde(rename = "tor")]
    Tor,
    #[serde(rename = "vulnerable")]
    Vulnerable,
    #[serde(rename = "other")]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bots => "bots",
            Category::Cnc => "cnc",
            Category::DosAttacker => "dos-attacker",
            Category::DosVictim => "dos-victim",
            Category::Malurl => "malurl",
            Category::Phish => "phish",
            Category::Proxy => "proxy",
            Category::Scanning => "scanning",
            Category::ServerExploit => "server-exploit",
            Category::Spam => "spam",
            Category::SpamUrl => "spam-url",
            Category::Tor => "tor",
            Category::Vulnerable => "vulnerable",
            Category::Other => "other",
        }
    }
}

/// Pipeline-visible event type, carried end to end on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "event")]
    Event,
    #[serde(rename = "bl-new")]
    BlNew,
    #[serde(rename = "bl-update")]
    BlUpdate,
    #[serde(rename = "bl-change")]
    BlChange,
    #[serde(rename = "bl-delist")]
    BlDelist,
    #[serde(rename = "bl-expire")]
    BlExpire,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Event => "event",
            EventType::BlNew => "bl-new",
            EventType::BlUpdate => "bl-update",
            EventType::BlChange => "bl-change",
            EventType::BlDelist => "bl-delist",
            EventType::BlExpire => "bl-expire",
        }
    }
}

/// Blacklist membership status of an emitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "delisted")]
    Delisted,
    #[serde(rename = "expired")]
    Expired,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Delisted => "delisted",
            EntryStatus::Expired => "expired",
        }
    }
}

/// One network address observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub ip: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<u32>,
}

/// The canonical, validated event record
///
/// Created once by the normalizer; the stateful engines never mutate an event
/// in place, they clone and rewrite into a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: Source,
    pub restriction: Restriction,
    pub confidence: Confidence,
    pub category: Category,
    /// Occurrence time (UTC); for a summarized group this is the first time seen
    pub time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Vec<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sport: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dport: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,

    /// Merge count of a summarized group (>= 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Last time seen of a summarized group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,

    // Blacklist-only fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EntryStatus>,
    /// Id of the blacklist record this event supersedes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,

    /// Category-specific attributes (sorted keys, deterministic output)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl NormalizedEvent {
    /// Derive the content id: SHA-256 over the canonical content map,
    /// truncated to 32 hex chars.
    ///
    /// `type` and `replaces` are excluded so a controlled rewrite of the same
    /// content (summarization, delist emission) reproduces the same id across
    /// restarts.
    pub fn compute_id(&self) -> String {
        let mut content: BTreeMap<&'static str, Value> = BTreeMap::new();
        content.insert("source", json!(self.source.to_string()));
        content.insert("restriction", json!(self.restriction.as_str()));
        content.insert("confidence", json!(self.confidence.as_str()));
        content.insert("category", json!(self.category.as_str()));
        content.insert(
            "time",
            json!(self.time.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );

        if let Some(ref addrs) = self.address {
            let list: Vec<Value> = addrs
                .iter()
                .map(|a| json!({"ip": a.ip.to_string(), "cc": a.cc, "asn": a.asn}))
                .collect();
            content.insert("address", Value::Array(list));
        }
        if let Some(ref v) = self.fqdn {
            content.insert("fqdn", json!(v));
        }
        if let Some(ref v) = self.url {
            content.insert("url", json!(v));
        }
        if let Some(ref v) = self.md5 {
            content.insert("md5", json!(v));
        }
        if let Some(ref v) = self.sha1 {
            content.insert("sha1", json!(v));
        }
        if let Some(v) = self.sport {
            content.insert("sport", json!(v));
        }
        if let Some(v) = self.dport {
            content.insert("dport", json!(v));
        }
        if let Some(ref v) = self.proto {
            content.insert("proto", json!(v));
        }
        if let Some(v) = self.count {
            content.insert("count", json!(v));
        }
        if let Some(ref v) = self.until {
            content.insert("until", json!(v.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if let Some(ref v) = self.expires {
            content.insert(
                "expires",
                json!(v.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }
        if let Some(v) = self.status {
            content.insert("status", json!(v.as_str()));
        }
        if !self.extra.is_empty() {
            content.insert("extra", json!(self.extra));
        }

        let bytes = serde_json::to_vec(&content).expect("canonical content map serializes");
        let digest = Sha256::digest(&bytes);
        let mut hex = hex::encode(digest);
        hex.truncate(32);
        hex
    }

    /// Value of one group-id component, as configured per source.
    ///
    /// `ip` resolves to the first address; unknown names fall through to the
    /// `extra` map. Returns `None` when the field is absent.
    pub fn component_value(&self, name: &str) -> Option<String> {
        match name {
            "source" => Some(self.source.to_string()),
            "ip" => self
                .address
                .as_ref()
                .and_then(|a| a.first())
                .map(|a| a.ip.to_string()),
            "fqdn" => self.fqdn.clone(),
            "url" => self.url.clone(),
            "md5" => self.md5.clone(),
            "sha1" => self.sha1.clone(),
            "proto" => self.proto.clone(),
            "sport" => self.sport.map(|p| p.to_string()),
            "dport" => self.dport.map(|p| p.to_string()),
            "category" => Some(self.category.as_str().to_string()),
            other => self.extra.get(other).map(|v| match v {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            }),
        }
    }

    /// Attribute fingerprint used by the blacklist diff.
    ///
    /// Excludes the volatile fields (`time`, `expires`, `count`, `until`,
    /// `status`) and identity/linkage fields (`id`, `type`, `replaces`), so
    /// two observations of the same entry compare equal unless a substantive
    /// attribute changed.
    pub fn diff_fingerprint(&self) -> BTreeMap<&'static str, Value> {
        let mut fp: BTreeMap<&'static str, Value> = BTreeMap::new();
        fp.insert("source", json!(self.source.to_string()));
        fp.insert("restriction", json!(self.restriction.as_str()));
        fp.insert("confidence", json!(self.confidence.as_str()));
        fp.insert("category", json!(self.category.as_str()));
        if let Some(ref addrs) = self.address {
            let list: Vec<Value> = addrs
                .iter()
                .map(|a| json!({"ip": a.ip.to_string(), "cc": a.cc, "asn": a.asn}))
                .collect();
            fp.insert("address", Value::Array(list));
        }
        if let Some(ref v) = self.fqdn {
            fp.insert("fqdn", json!(v));
        }
        if let Some(ref v) = self.url {
            fp.insert("url", json!(v));
        }
        if let Some(ref v) = self.md5 {
            fp.insert("md5", json!(v));
        }
        if let Some(ref v) = self.sha1 {
            fp.insert("sha1", json!(v));
        }
        if let Some(v) = self.sport {
            fp.insert("sport", json!(v));
        }
        if let Some(v) = self.dport {
            fp.insert("dport", json!(v));
        }
        if let Some(ref v) = self.proto {
            fp.insert("proto", json!(v));
        }
        if !self.extra.is_empty() {
            fp.insert("extra", json!(self.extra));
        }
        fp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> NormalizedEvent {
        let mut event = NormalizedEvent {
            id: String::new(),
            event_type: EventType::Event,
            source: Source::new("testprov", "testchan"),
            restriction: Restriction::Public,
            confidence: Confidence::Medium,
            category: Category::Scanning,
            time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            address: Some(vec![Address {
                ip: "192.0.2.7".parse().unwrap(),
                cc: Some("DE".to_string()),
                asn: Some(64500),
            }]),
            fqdn: None,
            url: None,
            md5: None,
            sha1: None,
            sport: None,
            dport: Some(22),
            proto: Some("tcp".to_string()),
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
    fn test_source_roundtrip() {
        let source: Source = "provider.some-channel".parse().unwrap();
        assert_eq!(source.provider, "provider");
        assert_eq!(source.channel, "some-channel");
        assert_eq!(source.to_string(), "provider.some-channel");

        assert!("noseparator".parse::<Source>().is_err());
        assert!(".channel".parse::<Source>().is_err());
    }

    #[test]
    fn test_compute_id_is_deterministic() {
        let a = sample_event();
        let b = sample_event();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
        assert!(a.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_compute_id_ignores_type_and_replaces() {
        let base = sample_event();
        let mut rewritten = base.clone();
        rewritten.event_type = EventType::BlDelist;
        rewritten.replaces = Some("0123456789abcdef0123456789abcdef".to_string());
        assert_eq!(base.compute_id(), rewritten.compute_id());
    }

    #[test]
    fn test_compute_id_changes_with_content() {
        let base = sample_event();
        let mut changed = base.clone();
        changed.dport = Some(23);
        assert_ne!(base.compute_id(), changed.compute_id());
    }

    #[test]
    fn test_component_value_lookup() {
        let mut event = sample_event();
        event
            .extra
            .insert("name".to_string(), json!("mirai"));

        assert_eq!(event.component_value("ip").unwrap(), "192.0.2.7");
        assert_eq!(event.component_value("dport").unwrap(), "22");
        assert_eq!(event.component_value("proto").unwrap(), "tcp");
        assert_eq!(event.component_value("name").unwrap(), "mirai");
        assert!(event.component_value("fqdn").is_none());
        assert!(event.component_value("nonexistent").is_none());
    }

    #[test]
    fn test_diff_fingerprint_ignores_volatile_fields() {
        let base = sample_event();
        let mut refreshed = base.clone();
        refreshed.time = DateTime::from_timestamp(1_700_009_999, 0).unwrap();
        refreshed.expires = Some(DateTime::from_timestamp(1_700_100_000, 0).unwrap());
        refreshed.status = Some(EntryStatus::Active);
        assert_eq!(base.diff_fingerprint(), refreshed.diff_fingerprint());

        let mut changed = base.clone();
        changed.proto = Some("udp".to_string());
        assert_ne!(base.diff_fingerprint(), changed.diff_fingerprint());
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = sample_event();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("\"source\":\"testprov.testchan\""));
        // Absent optionals must not appear in the wire form
        assert!(!json.contains("\"fqdn\""));
        assert!(!json.contains("\"replaces\""));

        let back: NormalizedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
