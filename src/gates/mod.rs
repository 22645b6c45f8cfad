//! Validation gate between phases.
//!
//! After a phase finishes, its failure ratio is compared against the phase's
//! tolerance. Exceeding it produces a [`BlockingError`]: a structured report
//! that halts the run unless the caller explicitly forces progression.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uplift_common::PipelinePhase;

use crate::stats::PhaseReport;

/// How many failed URLs a blocking error lists by name.
pub const SAMPLE_LIMIT: usize = 5;

/// What raised a blocking error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingTrigger {
    /// Post-phase failure ratio over tolerance
    ValidationGate,
    /// Failed records present before a phase that would silently drop them
    FailedRecordCheck,
}

/// Fatal, structured report that a phase may not be followed by the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockingError {
    pub phase: PipelinePhase,
    pub trigger: BlockingTrigger,
    pub failed_count: usize,
    pub considered_count: usize,
    /// First failed URLs in sorted order
    pub sample_failed_urls: Vec<String>,
    pub remaining_failed_count: usize,
    pub failure_ratio: f64,
    pub threshold: f64,
    pub impact: String,
    pub resolution_hint: String,
}

impl BlockingError {
    fn build(
        phase: PipelinePhase,
        trigger: BlockingTrigger,
        considered_count: usize,
        mut failed_urls: Vec<String>,
        threshold: f64,
    ) -> Self {
        failed_urls.sort();
        failed_urls.dedup();
        let failed_count = failed_urls.len();
        let sample_failed_urls: Vec<String> =
            failed_urls.into_iter().take(SAMPLE_LIMIT).collect();
        let remaining_failed_count = failed_count - sample_failed_urls.len();
        let failure_ratio = if considered_count == 0 {
            0.0
        } else {
            failed_count as f64 / considered_count as f64
        };

        let (impact, resolution_hint) = match trigger {
            BlockingTrigger::ValidationGate => gate_texts(phase, failed_count),
            BlockingTrigger::FailedRecordCheck => precheck_texts(phase, failed_count),
        };

        Self {
            phase,
            trigger,
            failed_count,
            considered_count,
            sample_failed_urls,
            remaining_failed_count,
            failure_ratio,
            threshold,
            impact,
            resolution_hint,
        }
    }

    /// Gate verdict for a finished phase.
    pub fn from_report(report: &PhaseReport, threshold: f64) -> Self {
        Self::build(
            report.phase,
            BlockingTrigger::ValidationGate,
            report.considered,
            report.failed.iter().map(|f| f.id.clone()).collect(),
            threshold,
        )
    }

    /// Failed records found before `phase` starts.
    pub fn failed_records(
        phase: PipelinePhase,
        total_records: usize,
        failed_urls: Vec<String>,
    ) -> Self {
        Self::build(
            phase,
            BlockingTrigger::FailedRecordCheck,
            total_records,
            failed_urls,
            0.0,
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the JSON form to `<dir>/blocking-<phase>.json`.
    pub fn write_report(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("blocking-{}.json", self.phase));
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// One line, for run warnings when the error was overridden.
    pub fn summary(&self) -> String {
        match self.trigger {
            BlockingTrigger::ValidationGate => format!(
                "{}: {}/{} records failed (tolerance {:.0}%)",
                self.phase,
                self.failed_count,
                self.considered_count,
                self.threshold * 100.0
            ),
            BlockingTrigger::FailedRecordCheck => format!(
                "{}: {} failed records excluded",
                self.phase, self.failed_count
            ),
        }
    }
}

fn gate_texts(phase: PipelinePhase, failed: usize) -> (String, String) {
    match phase {
        PipelinePhase::Discovery => (
            "Discovery did not complete; the registry may be missing sources".to_string(),
            "Check the seed list in .uplift/seeds.toml and rerun `uplift discover`".to_string(),
        ),
        PipelinePhase::Collection => (
            format!("{failed} sources have no collected content and will not be distilled, packaged or bundled"),
            "Inspect the errors with `uplift status`, then retry with `uplift collect --resume` or continue with `--force-proceed`".to_string(),
        ),
        PipelinePhase::Distillation => (
            format!("{failed} sources have no distilled output and will be missing from the package"),
            "Inspect the errors with `uplift status`, then retry with `uplift distill --resume` or continue with `--force-proceed`".to_string(),
        ),
        PipelinePhase::Packaging => (
            "The package was not produced; bundling has nothing to consume".to_string(),
            "Check the package output directory and rerun `uplift package`".to_string(),
        ),
        PipelinePhase::Bundling => (
            "The bundle was not produced".to_string(),
            "Check the bundle output directory and rerun `uplift bundle`".to_string(),
        ),
    }
}

fn precheck_texts(phase: PipelinePhase, failed: usize) -> (String, String) {
    (
        format!("{failed} failed records would be silently left out of {phase}"),
        "Resume the phase they failed in (e.g. `uplift collect --resume`) or rerun with `--force-proceed` to continue without them".to_string(),
    )
}

impl fmt::Display for BlockingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.trigger {
            BlockingTrigger::ValidationGate => writeln!(
                f,
                "Blocking error in {} phase: {} of {} records failed ({:.1}%, tolerance {:.1}%)",
                self.phase,
                self.failed_count,
                self.considered_count,
                self.failure_ratio * 100.0,
                self.threshold * 100.0
            )?,
            BlockingTrigger::FailedRecordCheck => writeln!(
                f,
                "Blocking error before {} phase: {} of {} records are in failed state",
                self.phase, self.failed_count, self.considered_count
            )?,
        }
        if !self.sample_failed_urls.is_empty() {
            writeln!(f, "  Failed sources:")?;
            for url in &self.sample_failed_urls {
                writeln!(f, "    - {url}")?;
            }
            if self.remaining_failed_count > 0 {
                writeln!(f, "    ... and {} more", self.remaining_failed_count)?;
            }
        }
        writeln!(f, "  Impact: {}", self.impact)?;
        write!(f, "  Resolution: {}", self.resolution_hint)
    }
}

impl std::error::Error for BlockingError {}

/// Non-fatal gate verdicts.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Passed,
    /// Allowed to proceed, with something worth recording
    Warning(String),
}

/// Per-phase failure tolerance check.
#[derive(Debug, Clone, Default)]
pub struct ValidationGate {
    /// Maximum tolerated failed/considered ratio; absent means zero tolerance
    thresholds: BTreeMap<PipelinePhase, f64>,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, phase: PipelinePhase, max_failure_ratio: f64) -> Self {
        self.thresholds.insert(phase, max_failure_ratio.clamp(0.0, 1.0));
        self
    }

    pub fn threshold(&self, phase: PipelinePhase) -> f64 {
        self.thresholds.get(&phase).copied().unwrap_or(0.0)
    }

    pub fn validate(&self, report: &PhaseReport) -> Result<GateOutcome, BlockingError> {
        if report.skipped {
            return Ok(GateOutcome::Passed);
        }

        if report.considered == 0 {
            let message = format!("{}: no records were eligible", report.phase);
            info!(phase = %report.phase, "Gate passed with nothing to validate");
            return Ok(GateOutcome::Warning(message));
        }

        let threshold = self.threshold(report.phase);
        let ratio = report.failure_ratio();
        if ratio > threshold {
            warn!(
                phase = %report.phase,
                failed = report.failed.len(),
                considered = report.considered,
                ratio,
                threshold,
                "Validation gate blocked"
            );
            return Err(BlockingError::from_report(report, threshold));
        }

        if report.failed.is_empty() {
            Ok(GateOutcome::Passed)
        } else {
            Ok(GateOutcome::Warning(format!(
                "{}: {}/{} records failed within tolerance {:.0}%",
                report.phase,
                report.failed.len(),
                report.considered,
                threshold * 100.0
            )))
        }
    }
}
