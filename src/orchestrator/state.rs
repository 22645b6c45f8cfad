//! Per-invocation run state: options in, summary out, and the run lock.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uplift_common::PipelinePhase;

use crate::errors::PipelineError;
use crate::filter::FilterCriteria;
use crate::stats::PhaseReport;

/// Caller choices for one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Phases to skip; each must already have produced output
    pub skip: BTreeSet<PipelinePhase>,
    /// Turn blocking errors (gates and failed-record checks) into warnings
    pub force_proceed: bool,
    /// Record selection, including whether failed records are resumed
    pub criteria: FilterCriteria,
}

impl RunOptions {
    pub fn with_skip(mut self, phase: PipelinePhase) -> Self {
        self.skip.insert(phase);
        self
    }

    pub fn with_force_proceed(mut self, force: bool) -> Self {
        self.force_proceed = force;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.criteria.resume = resume;
        self
    }

    pub fn with_criteria(mut self, criteria: FilterCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn resume(&self) -> bool {
        self.criteria.resume
    }
}

/// What one invocation did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub phases: Vec<PhaseReport>,
    /// Overridden blocking errors and other non-fatal findings
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            phases: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn report(&self, phase: PipelinePhase) -> Option<&PhaseReport> {
        self.phases.iter().find(|r| r.phase == phase)
    }

    pub fn total_failed(&self) -> usize {
        self.phases.iter().map(|r| r.failed.len()).sum()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// Who holds the run lock; written into the lock file for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    run_id: String,
    started_at: DateTime<Utc>,
}

/// Exclusive advisory lock held for the duration of a run.
///
/// Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path, run_id: &str) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Precondition(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                PipelineError::Precondition(format!("cannot open lock {}: {e}", path.display()))
            })?;

        if file.try_lock_exclusive().is_err() {
            let holder = std::fs::read_to_string(path).unwrap_or_default();
            return Err(PipelineError::Precondition(format!(
                "another uplift run holds {} ({})",
                path.display(),
                holder.trim()
            )));
        }

        let holder = LockHolder {
            pid: std::process::id(),
            run_id: run_id.to_string(),
            started_at: Utc::now(),
        };
        // Diagnostics only; the OS lock is what matters.
        if let Ok(json) = serde_json::to_string(&holder) {
            let _ = file.set_len(0);
            let _ = file.write_all(json.as_bytes());
        }
        debug!(path = %path.display(), run_id, "Acquired run lock");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_lock_fails_until_released() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".uplift/sources.lock");

        let first = RunLock::acquire(&path, "run-1").unwrap();
        let err = RunLock::acquire(&path, "run-2").unwrap_err();
        assert!(matches!(err, PipelineError::Precondition(_)));
        assert!(err.to_string().contains("run-1"));

        drop(first);
        let again = RunLock::acquire(&path, "run-3").unwrap();
        assert!(again.path().ends_with("sources.lock"));
    }

    #[test]
    fn test_options_builders() {
        let options = RunOptions::default()
            .with_skip(PipelinePhase::Discovery)
            .with_force_proceed(true)
            .with_resume(true);
        assert!(options.skip.contains(&PipelinePhase::Discovery));
        assert!(options.force_proceed);
        assert!(options.resume());
    }

    #[test]
    fn test_summary_serializes() {
        let mut summary = RunSummary::new("r-1");
        summary.phases.push(PhaseReport::skipped(PipelinePhase::Discovery));
        summary.warnings.push("collection: 1 failed".into());
        summary.finish();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["run_id"], "r-1");
        assert_eq!(json["phases"][0]["phase"], "discovery");
        assert!(summary.report(PipelinePhase::Discovery).is_some());
        assert_eq!(summary.total_failed(), 0);
    }
}
