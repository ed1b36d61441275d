//! Pipeline wiring: collector boundary, routing, and the ingestion loop
//!
//! One logical consumer per pipeline owns both stateful engines; raw
//! envelopes come in over an mpsc channel and emitted events go out tagged
//! with a stage routing key for downstream consumers.

pub mod ingestion;
pub mod reader;
pub mod routing;

pub use ingestion::{run_pipeline, PipelineConfig};
pub use reader::{run_reader, InboundMessage, RawEnvelope};
pub use routing::{OutboundMessage, Stage};
