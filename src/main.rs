pub mod backoff;
pub mod config;
pub mod sources;

pub mod event;
pub mod aggregator;
pub mod blacklist;
pub mod store;
pub mod pipeline;

// Re-export commonly used types
pub use config::Config;
pub use event::normalizer::{normalize, NormalizationError, NormalizationPolicy, SourceContext};
pub use event::schema::{Address, Category, Confidence, EventType, NormalizedEvent, Restriction, Source};
pub use aggregator::engine::AggregationEngine;
pub use blacklist::engine::BlacklistDiffEngine;
pub use pipeline::routing::{OutboundMessage, Stage};
pub use sources::{FeedShape, SourceConfig, SourcesConfig};
pub use store::{StateKind, StateStore};
