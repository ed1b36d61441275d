//! Per-source configuration table
//!
//! Loaded once at startup from a JSON file. Each entry keys on the dotted
//! `provider.channel` label and carries the constant items injected into
//! every event of that source, the normalization policy, and either the
//! aggregation window or the blacklist feed shape, depending on the kind.
//!
//! Example file:
//!
//! ```json
//! {
//!   "default_time_tolerance_secs": 600,
//!   "sources": {
//!     "scanprov.hifreq": {
//!       "restriction": "need-to-know",
//!       "confidence": "medium",
//!       "category": "scanning",
//!       "aggregate": { "group_id_components": ["ip", "dport", "proto"] }
//!     },
//!     "blprov.urls": {
//!       "restriction": "public",
//!       "confidence": "high",
//!       "category": "malurl",
//!       "blacklist": { "feed_shape": "full-snapshot" }
//!     }
//!   }
//! }
//! ```

use crate::event::normalizer::NormalizationPolicy;
use crate::event::schema::{Category, Confidence, Restriction, Source};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Whether a blacklist feed delivers complete membership each cycle.
///
/// Misclassifying one as the other silently corrupts delist semantics, so
/// there is no guessing here: the default is `incremental`, which can delay
/// delists but never fabricate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FeedShape {
    #[serde(rename = "full-snapshot")]
    FullSnapshot,
    #[serde(rename = "incremental")]
    #[default]
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// Ordered field names joined into the group id
    pub group_id_components: Vec<String>,
    /// Per-source override of the global default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_tolerance_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistConfig {
    #[serde(default)]
    pub feed_shape: FeedShape,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub restriction: Restriction,
    pub confidence: Confidence,
    pub category: Category,
    #[serde(default)]
    pub policy: NormalizationPolicy,
    /// Present for high-frequency sources routed through aggregation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateConfig>,
    /// Present for blacklist sources routed through diffing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklist: Option<BlacklistConfig>,
}

fn default_tolerance() -> i64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_tolerance")]
    pub default_time_tolerance_secs: i64,
    pub sources: HashMap<String, SourceConfig>,
}

impl SourcesConfig {
    pub fn load<P: AsRef<Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let json = fs::read_to_string(path.as_ref())?;
        let config: SourcesConfig = serde_json::from_str(&json)?;
        log::info!(
            "Loaded {} source definitions from {}",
            config.sources.len(),
            path.as_ref().display()
        );
        Ok(config)
    }

    pub fn get(&self, source: &Source) -> Option<&SourceConfig> {
        self.sources.get(&source.to_string())
    }

    /// Effective tolerance window for a source's aggregation config.
    pub fn tolerance_for(&self, aggregate: &AggregateConfig) -> i64 {
        aggregate
            .time_tolerance_secs
            .unwrap_or(self.default_time_tolerance_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_sources_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "sources": {{
                    "scanprov.hifreq": {{
                        "restriction": "need-to-know",
                        "confidence": "medium",
                        "category": "scanning",
                        "aggregate": {{
                            "group_id_components": ["ip", "dport", "proto"],
                            "time_tolerance_secs": 300
                        }}
                    }},
                    "blprov.urls": {{
                        "restriction": "public",
                        "confidence": "high",
                        "category": "malurl",
                        "policy": "strict",
                        "blacklist": {{ "feed_shape": "full-snapshot" }}
                    }}
                }}
            }}"#
        )
        .unwrap();

        let config = SourcesConfig::load(file.path()).unwrap();
        assert_eq!(config.default_time_tolerance_secs, 600);

        let hifreq = config.get(&Source::new("scanprov", "hifreq")).unwrap();
        assert_eq!(hifreq.policy, NormalizationPolicy::Lenient);
        let aggregate = hifreq.aggregate.as_ref().unwrap();
        assert_eq!(aggregate.group_id_components, ["ip", "dport", "proto"]);
        assert_eq!(config.tolerance_for(aggregate), 300);

        let urls = config.get(&Source::new("blprov", "urls")).unwrap();
        assert_eq!(urls.policy, NormalizationPolicy::Strict);
        assert_eq!(
            urls.blacklist.as_ref().unwrap().feed_shape,
            FeedShape::FullSnapshot
        );

        assert!(config.get(&Source::new("unknown", "feed")).is_none());
    }

    #[test]
    fn test_feed_shape_defaults_to_incremental() {
        let json = r#"{
            "restriction": "public",
            "confidence": "low",
            "category": "spam-url",
            "blacklist": {}
        }"#;
        let config: SourceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.blacklist.unwrap().feed_shape,
            FeedShape::Incremental
        );
    }
}
