//! Canonical event schema and normalization
//!
//! Every downstream stage (aggregation, blacklist diffing, distribution)
//! consumes the `NormalizedEvent` defined here. Raw collector output enters
//! through `normalizer::normalize()` and nothing else.

pub mod adjusters;
pub mod normalizer;
pub mod schema;

pub use normalizer::{normalize, NormalizationError, NormalizationPolicy, SourceContext};
pub use schema::{Address, Category, Confidence, EntryStatus, EventType, NormalizedEvent, Restriction, Source};
