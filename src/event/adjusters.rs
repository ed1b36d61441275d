//! Static field-name -> adjuster registry
//!
//! Every optional event field has exactly one registered adjuster that
//! validates and canonicalizes the raw value before it is accepted. The
//! table is resolved once at first use; a raw key with no entry here is
//! rejected by the normalizer.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::OnceLock;

/// A validator/normalizer for one raw field value.
///
/// Returns the canonical value on success, a human-readable reason on
/// failure. Adjusters are pure functions so normalization stays retryable.
pub type Adjuster = fn(&Value) -> Result<Value, String>;

static REGISTRY: OnceLock<HashMap<&'static str, Adjuster>> = OnceLock::new();

/// The closed adjuster table, built once at startup.
pub fn registry() -> &'static HashMap<&'static str, Adjuster> {
    REGISTRY.get_or_init(|| {
        let mut table: HashMap<&'static str, Adjuster> = HashMap::new();
        table.insert("time", adjust_time);
        table.insert("expires", adjust_time);
        table.insert("until", adjust_time);
        table.insert("address", adjust_address);
        table.insert("ip", adjust_ip);
        table.insert("fqdn", adjust_fqdn);
        table.insert("url", adjust_url);
        table.insert("md5", adjust_md5);
        table.insert("sha1", adjust_sha1);
        table.insert("sport", adjust_port);
        table.insert("dport", adjust_port);
        table.insert("proto", adjust_proto);
        table.insert("count", adjust_count);
        table.insert("status", adjust_status);
        table.insert("name", adjust_text);
        table.insert("target", adjust_text);
        table.insert("origin", adjust_text);
        table
    })
}

/// Parse a timestamp from unix seconds, RFC 3339, or `YYYY-MM-DD HH:MM:SS`
/// (assumed UTC). Canonical form is an RFC 3339 string in UTC.
pub fn adjust_time(value: &Value) -> Result<Value, String> {
    let parsed: DateTime<Utc> = match value {
        Value::Number(n) => {
            let secs = n
                .as_i64()
                .ok_or_else(|| format!("non-integer timestamp: {}", n))?;
            DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| format!("timestamp out of range: {}", secs))?
        }
        Value::String(s) => parse_time_str(s)?,
        other => return Err(format!("unsupported time value: {}", other)),
    };
    Ok(json!(parsed.to_rfc3339_opts(SecondsFormat::Secs, true)))
}

fn parse_time_str(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(format!("unparsable time: {:?}", s))
}

/// Accept an address list: either plain ip strings or objects with
/// `ip` (required), `cc` and `asn`. Canonical form is a list of objects.
pub fn adjust_address(value: &Value) -> Result<Value, String> {
    let items = value
        .as_array()
        .ok_or_else(|| "address must be a list".to_string())?;
    if items.is_empty() {
        return Err("empty address list".to_string());
    }
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) => {
                let ip = parse_ip(s)?;
                out.push(json!({ "ip": ip }));
            }
            Value::Object(map) => {
                let ip_raw = map
                    .get("ip")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "address entry missing ip".to_string())?;
                let ip = parse_ip(ip_raw)?;
                let mut entry = serde_json::Map::new();
                entry.insert("ip".to_string(), json!(ip));
                if let Some(cc) = map.get("cc") {
                    entry.insert("cc".to_string(), adjust_cc(cc)?);
                }
                if let Some(asn) = map.get("asn") {
                    entry.insert("asn".to_string(), adjust_asn(asn)?);
                }
                out.push(Value::Object(entry));
            }
            other => return Err(format!("invalid address entry: {}", other)),
        }
    }
    Ok(Value::Array(out))
}

/// A single ip becomes a one-element address list.
pub fn adjust_ip(value: &Value) -> Result<Value, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("ip must be a string: {}", value))?;
    let ip = parse_ip(s)?;
    Ok(json!([{ "ip": ip }]))
}

fn parse_ip(s: &str) -> Result<String, String> {
    s.trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| format!("invalid ip address: {:?}", s))
}

fn adjust_cc(value: &Value) -> Result<Value, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("cc must be a string: {}", value))?;
    let cc = s.trim().to_ascii_uppercase();
    if cc.len() == 2 && cc.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(json!(cc))
    } else {
        Err(format!("invalid country code: {:?}", s))
    }
}

fn adjust_asn(value: &Value) -> Result<Value, String> {
    let asn = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("invalid asn: {}", value))?;
    if asn == 0 || asn > u32::MAX as u64 {
        return Err(format!("asn out of range: {}", asn));
    }
    Ok(json!(asn as u32))
}

/// Lowercase, strip a trailing dot, validate the label charset.
pub fn adjust_fqdn(value: &Value) -> Result<Value, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("fqdn must be a string: {}", value))?;
    let fqdn = s.trim().trim_end_matches('.').to_ascii_lowercase();
    if fqdn.is_empty() || fqdn.len() > 253 {
        return Err(format!("invalid fqdn length: {:?}", s));
    }
    let valid = fqdn.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    if valid {
        Ok(json!(fqdn))
    } else {
        Err(format!("invalid fqdn: {:?}", s))
    }
}

/// Require a scheme; lowercase it, leave the rest untouched.
pub fn adjust_url(value: &Value) -> Result<Value, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("url must be a string: {}", value))?
        .trim();
    let (scheme, rest) = s
        .split_once("://")
        .ok_or_else(|| format!("url without scheme: {:?}", s))?;
    if scheme.is_empty()
        || rest.is_empty()
        || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
    {
        return Err(format!("invalid url: {:?}", s));
    }
    Ok(json!(format!("{}://{}", scheme.to_ascii_lowercase(), rest)))
}

pub fn adjust_md5(value: &Value) -> Result<Value, String> {
    adjust_hex_digest(value, 32, "md5")
}

pub fn adjust_sha1(value: &Value) -> Result<Value, String> {
    adjust_hex_digest(value, 40, "sha1")
}

fn adjust_hex_digest(value: &Value, len: usize, what: &str) -> Result<Value, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("{} must be a string: {}", what, value))?;
    let digest = s.trim().to_ascii_lowercase();
    if digest.len() == len && digest.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(json!(digest))
    } else {
        Err(format!("invalid {} digest: {:?}", what, s))
    }
}

pub fn adjust_port(value: &Value) -> Result<Value, String> {
    let port = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("invalid port: {}", value))?;
    if port > u16::MAX as u64 {
        return Err(format!("port out of range: {}", port));
    }
    Ok(json!(port as u16))
}

pub fn adjust_proto(value: &Value) -> Result<Value, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("proto must be a string: {}", value))?;
    let proto = s.trim().to_ascii_lowercase();
    match proto.as_str() {
        "tcp" | "udp" | "icmp" => Ok(json!(proto)),
        _ => Err(format!("unknown protocol: {:?}", s)),
    }
}

pub fn adjust_count(value: &Value) -> Result<Value, String> {
    let count = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("invalid count: {}", value))?;
    if count == 0 || count > u32::MAX as u64 {
        return Err(format!("count out of range: {}", count));
    }
    Ok(json!(count as u32))
}

pub fn adjust_status(value: &Value) -> Result<Value, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("status must be a string: {}", value))?;
    let status = s.trim().to_ascii_lowercase();
    match status.as_str() {
        "active" | "delisted" | "expired" => Ok(json!(status)),
        _ => Err(format!("unknown status: {:?}", s)),
    }
}

/// Free-text attribute: trimmed, non-empty.
pub fn adjust_text(value: &Value) -> Result<Value, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("expected a string: {}", value))?
        .trim();
    if s.is_empty() {
        Err("empty text value".to_string())
    } else {
        Ok(json!(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_closed() {
        let table = registry();
        assert!(table.contains_key("time"));
        assert!(table.contains_key("address"));
        assert!(table.contains_key("dport"));
        assert!(!table.contains_key("restriction"));
        assert!(!table.contains_key("arbitrary"));
    }

    #[test]
    fn test_adjust_time_formats() {
        let from_unix = adjust_time(&json!(1700000000)).unwrap();
        let from_rfc = adjust_time(&json!("2023-11-14T22:13:20Z")).unwrap();
        let from_naive = adjust_time(&json!("2023-11-14 22:13:20")).unwrap();
        assert_eq!(from_unix, from_rfc);
        assert_eq!(from_unix, from_naive);

        assert!(adjust_time(&json!("yesterday")).is_err());
        assert!(adjust_time(&json!(true)).is_err());
    }

    #[test]
    fn test_adjust_address_variants() {
        let mixed = json!(["192.0.2.1", {"ip": "2001:db8::1", "cc": "pl", "asn": "64500"}]);
        let adjusted = adjust_address(&mixed).unwrap();
        let list = adjusted.as_array().unwrap();
        assert_eq!(list[0], json!({"ip": "192.0.2.1"}));
        assert_eq!(list[1]["cc"], json!("PL"));
        assert_eq!(list[1]["asn"], json!(64500));

        assert!(adjust_address(&json!([])).is_err());
        assert!(adjust_address(&json!([{"cc": "PL"}])).is_err());
        assert!(adjust_address(&json!(["999.0.0.1"])).is_err());
    }

    #[test]
    fn test_adjust_ip_wraps_into_address_list() {
        let adjusted = adjust_ip(&json!("198.51.100.3")).unwrap();
        assert_eq!(adjusted, json!([{"ip": "198.51.100.3"}]));
        assert!(adjust_ip(&json!("not-an-ip")).is_err());
    }

    #[test]
    fn test_adjust_fqdn() {
        assert_eq!(
            adjust_fqdn(&json!("WWW.Example.COM.")).unwrap(),
            json!("www.example.com")
        );
        assert!(adjust_fqdn(&json!("bad domain.example")).is_err());
        assert!(adjust_fqdn(&json!("")).is_err());
    }

    #[test]
    fn test_adjust_url() {
        assert_eq!(
            adjust_url(&json!("HTTP://evil.example/path?q=1")).unwrap(),
            json!("http://evil.example/path?q=1")
        );
        assert!(adjust_url(&json!("evil.example/no-scheme")).is_err());
    }

    #[test]
    fn test_adjust_digests() {
        let md5 = "D41D8CD98F00B204E9800998ECF8427E";
        assert_eq!(adjust_md5(&json!(md5)).unwrap(), json!(md5.to_lowercase()));
        assert!(adjust_md5(&json!("tooshort")).is_err());
        assert!(adjust_sha1(&json!(md5)).is_err()); // wrong length for sha1
    }

    #[test]
    fn test_adjust_port_and_count() {
        assert_eq!(adjust_port(&json!("443")).unwrap(), json!(443));
        assert!(adjust_port(&json!(70000)).is_err());
        assert_eq!(adjust_count(&json!(17)).unwrap(), json!(17));
        assert!(adjust_count(&json!(0)).is_err());
    }

    #[test]
    fn test_adjust_proto_and_status() {
        assert_eq!(adjust_proto(&json!("TCP")).unwrap(), json!("tcp"));
        assert!(adjust_proto(&json!("gre")).is_err());
        assert_eq!(adjust_status(&json!("Active")).unwrap(), json!("active"));
        assert!(adjust_status(&json!("listed")).is_err());
    }
}
