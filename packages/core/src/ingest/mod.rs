//! Incident ingestion: domain types, collaborator traits and the
//! per-location cycle that ties them together.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod types;

pub use config::{DedupPolicy, PipelineConfig};
pub use error::{IngestError, IngestResult};
pub use pipeline::{CycleReport, CycleStage, IngestionPipeline};
pub use provider::{Classifier, IncidentSource, Summarizer};
pub use types::*;
