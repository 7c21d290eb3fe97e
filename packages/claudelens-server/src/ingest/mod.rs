//! The Ingestion Pipeline (§4.4).

pub mod pipeline;
pub mod sanitize;
pub mod validation;

pub use pipeline::{IngestOutcome, IngestRecord, IngestRequest, IngestStats, IngestionPipeline};
