//! Pipeline phases and the statuses each one consumes and produces.

use serde::{Deserialize, Serialize};

use crate::status::SourceStatus;

/// One stage of the ingestion pipeline, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Discovery,
    Collection,
    Distillation,
    Packaging,
    Bundling,
}

impl PipelinePhase {
    /// All phases in strict execution order.
    pub const ALL: [PipelinePhase; 5] = [
        PipelinePhase::Discovery,
        PipelinePhase::Collection,
        PipelinePhase::Distillation,
        PipelinePhase::Packaging,
        PipelinePhase::Bundling,
    ];

    /// Status a record must hold to be picked up by this phase.
    ///
    /// Discovery creates records and therefore has no entry status.
    pub fn entry_status(self) -> Option<SourceStatus> {
        match self {
            PipelinePhase::Discovery => None,
            PipelinePhase::Collection => Some(SourceStatus::Discovered),
            PipelinePhase::Distillation => Some(SourceStatus::Collected),
            PipelinePhase::Packaging => Some(SourceStatus::Distilled),
            PipelinePhase::Bundling => Some(SourceStatus::Packaged),
        }
    }

    /// Status a record holds while this phase works on it.
    ///
    /// Only the per-record, network-bound phases have one.
    pub fn in_progress_status(self) -> Option<SourceStatus> {
        match self {
            PipelinePhase::Collection => Some(SourceStatus::Collecting),
            PipelinePhase::Distillation => Some(SourceStatus::Distilling),
            _ => None,
        }
    }

    /// Status a record holds once this phase finished it successfully.
    pub fn success_status(self) -> SourceStatus {
        match self {
            PipelinePhase::Discovery => SourceStatus::Discovered,
            PipelinePhase::Collection => SourceStatus::Collected,
            PipelinePhase::Distillation => SourceStatus::Distilled,
            PipelinePhase::Packaging => SourceStatus::Packaged,
            PipelinePhase::Bundling => SourceStatus::Bundled,
        }
    }

    /// Whether the phase processes records one by one through the retrying executor.
    pub fn is_per_record(self) -> bool {
        self.in_progress_status().is_some()
    }

    /// The phase that runs after this one, if any.
    pub fn next(self) -> Option<PipelinePhase> {
        let idx = Self::ALL.iter().position(|p| *p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelinePhase::Discovery => "discovery",
            PipelinePhase::Collection => "collection",
            PipelinePhase::Distillation => "distillation",
            PipelinePhase::Packaging => "packaging",
            PipelinePhase::Bundling => "bundling",
        }
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown phase or status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind} '{value}'. Valid values: {valid}")]
pub struct ParseNameError {
    pub kind: &'static str,
    pub value: String,
    pub valid: &'static str,
}

impl std::str::FromStr for PipelinePhase {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discovery" | "discover" => Ok(PipelinePhase::Discovery),
            "collection" | "collect" => Ok(PipelinePhase::Collection),
            "distillation" | "distill" => Ok(PipelinePhase::Distillation),
            "packaging" | "package" => Ok(PipelinePhase::Packaging),
            "bundling" | "bundle" => Ok(PipelinePhase::Bundling),
            _ => Err(ParseNameError {
                kind: "phase",
                value: s.to_string(),
                valid: "discovery, collection, distillation, packaging, bundling",
            }),
        }
    }
}
