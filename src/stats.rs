//! Per-phase outcome reporting.
//!
//! A [`PhaseReport`] is what a phase hands back to the orchestrator; the
//! validation gate reads it, and its condensed [`PhaseStats`] form is stored in
//! the registry's run context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uplift_common::PipelinePhase;

/// One item a phase failed to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Source URL, or the phase name for whole-phase collaborator failures
    pub id: String,
    pub message: String,
}

/// Result of executing a single phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: PipelinePhase,
    /// Items the phase attempted
    pub considered: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedItem>,
    /// Records left out because an out-of-band producer already finalized them
    #[serde(default)]
    pub excluded_external: usize,
    /// Phase was skipped on request
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl PhaseReport {
    pub fn new(phase: PipelinePhase) -> Self {
        Self {
            phase,
            considered: 0,
            succeeded: Vec::new(),
            failed: Vec::new(),
            excluded_external: 0,
            skipped: false,
            warnings: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn skipped(phase: PipelinePhase) -> Self {
        Self {
            skipped: true,
            ..Self::new(phase)
        }
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.id.as_str()).collect()
    }

    /// Failed over considered; zero when nothing was considered.
    pub fn failure_ratio(&self) -> f64 {
        if self.considered == 0 {
            return 0.0;
        }
        self.failed.len() as f64 / self.considered as f64
    }

    pub fn to_stats(&self) -> PhaseStats {
        PhaseStats {
            phase: self.phase,
            finished_at: Utc::now(),
            considered: self.considered,
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            excluded_external: self.excluded_external,
            skipped: self.skipped,
            duration_ms: self.duration.as_millis() as u64,
            failed_urls: self.failed.iter().map(|f| f.id.clone()).collect(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Last-run statistics for a phase, as persisted in the snapshot context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub phase: PipelinePhase,
    pub finished_at: DateTime<Utc>,
    pub considered: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(default)]
    pub excluded_external: usize,
    #[serde(default)]
    pub skipped: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Serde helpers for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
