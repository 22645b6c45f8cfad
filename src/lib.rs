//! uplift: a resumable, multi-phase ingestion pipeline.
//!
//! Sources move through discovery, collection, distillation, packaging and
//! bundling. Every record's progress lives in a single [`registry::Registry`]
//! snapshot, so any phase can be resumed after a crash or a partial failure.

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod filter;
pub mod gates;
pub mod logging;
pub mod orchestrator;
pub mod pipeline_config;
pub mod registry;
pub mod retry;
pub mod stats;
pub mod util;

pub use uplift_common::{PipelinePhase, SourceRecord, SourceStatus};
