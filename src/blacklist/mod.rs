//! Blacklist differencing across observation cycles
//!
//! Tracks one record per `(source, identity)` and classifies every new
//! observation as a lifecycle transition: `bl-new`, `bl-update`, `bl-change`,
//! `bl-delist` or `bl-expire`. State is durable; expiry runs on a wall-clock
//! schedule independent of feed activity.

pub mod engine;
pub mod record;

pub use engine::{identity_of, BlacklistDiffEngine, DiffError, IdentityError};
pub use record::BlacklistEntryRecord;
