//! Shared domain types for the uplift ingestion pipeline.
//!
//! - [`SourceRecord`] and [`SourcePatch`]: the tracked unit of work and the
//!   field changes phases apply to it
//! - [`SourceStatus`]: the per-record status machine
//! - [`PipelinePhase`]: the five phases and the statuses they consume and produce
//! - [`PhaseMetadata`]: phase-tagged payloads attached to records

pub mod metadata;
pub mod phase;
pub mod record;
pub mod status;

pub use metadata::{
    BundlingMetadata, CollectionMetadata, DiscoveryMetadata, DistillationMetadata,
    PackagingMetadata, PhaseMetadata, PhaseMetadataSet, Provenance,
};
pub use phase::{ParseNameError, PipelinePhase};
pub use record::{
    ErrorKind, ErrorPatch, LoaderType, Priority, SourceError, SourcePatch, SourceRecord,
    SourceType, TransitionError,
};
pub use status::SourceStatus;
