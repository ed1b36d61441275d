//! Windowed aggregation of high-frequency sources
//!
//! Bursts of near-identical events collapse into one summarized record per
//! `(source, group_id)`. Working state is persisted after every mutation so a
//! restart resumes with the exact pending-group set.

pub mod engine;
pub mod record;

pub use engine::{AggregationEngine, AggregationError, GroupKeyError};
pub use record::AggregationRecord;
