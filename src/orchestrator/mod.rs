//! Phase orchestration.
//!
//! The orchestrator owns the [`Registry`] and drives the five phases in order.
//! Around every phase it applies the same sequence: skip precondition or
//! failed-record pre-check, execution, `record_phase_stats`, `save`, then the
//! validation gate. Blocking errors stop the run unless `force_proceed` is set,
//! in which case they are downgraded to warnings in the [`RunSummary`].

pub mod state;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uplift_common::{
    BundlingMetadata, PackagingMetadata, PhaseMetadata, PipelinePhase, SourcePatch, SourceRecord,
    SourceStatus,
};
use uuid::Uuid;

use crate::collaborators::{
    ArtifactOutcome, Collaborators, CollectionOperation, ContentLayout, DistillationOperation,
};
use crate::errors::PipelineError;
use crate::filter;
use crate::gates::{BlockingError, GateOutcome, ValidationGate};
use crate::registry::Registry;
use crate::retry::{PhaseExecutor, RecordOperation};
use crate::stats::{ExecutionTimer, FailedItem, PhaseReport};

pub use state::{RunLock, RunOptions, RunSummary};

/// Everything the orchestrator needs besides the registry and collaborators.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub collection: PhaseExecutor,
    pub distillation: PhaseExecutor,
    pub gate: ValidationGate,
    pub layout: ContentLayout,
    /// Where blocking error reports are written; `None` keeps them in memory
    pub errors_dir: Option<PathBuf>,
    /// Run lock file; `None` disables locking
    pub lock_file: Option<PathBuf>,
    /// Legacy per-phase outputs absorbed at the start of every run
    pub legacy_dir: Option<PathBuf>,
}

pub struct Orchestrator {
    registry: Registry,
    collaborators: Collaborators,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        registry: Registry,
        collaborators: Collaborators,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            collaborators,
            settings,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn into_registry(self) -> Registry {
        self.registry
    }

    /// Run every phase in order, honoring `options.skip`.
    pub async fn run(&mut self, options: &RunOptions) -> Result<RunSummary, PipelineError> {
        let planned: Vec<PipelinePhase> = PipelinePhase::ALL
            .into_iter()
            .filter(|p| !options.skip.contains(p))
            .collect();
        self.execute(&PipelinePhase::ALL, &planned, options).await
    }

    /// Run a single phase with the same checks as a full run.
    pub async fn run_phase(
        &mut self,
        phase: PipelinePhase,
        options: &RunOptions,
    ) -> Result<RunSummary, PipelineError> {
        self.execute(&[phase], &[phase], options).await
    }

    async fn execute(
        &mut self,
        phases: &[PipelinePhase],
        planned: &[PipelinePhase],
        options: &RunOptions,
    ) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let _lock = match self.settings.lock_file {
            Some(ref path) => Some(RunLock::acquire(path, &run_id)?),
            None => None,
        };

        // The registry may have been loaded before the lock was ours.
        if self.registry.reload_if_changed()? {
            info!(run_id = %run_id, "Continuing from the snapshot saved by a previous run");
        }
        if let Some(ref dir) = self.settings.legacy_dir {
            let migration = self.registry.migrate_legacy(dir)?;
            if migration.changed() {
                info!(
                    imported = migration.imported,
                    upgraded = migration.upgraded,
                    "Migrated legacy phase outputs"
                );
            }
        }

        let mut summary = RunSummary::new(&run_id);
        self.registry
            .annotate("last_run_id", serde_json::json!(run_id))?;
        info!(
            run_id = %run_id,
            phases = ?planned,
            resume = options.resume(),
            force_proceed = options.force_proceed,
            "Starting pipeline run"
        );

        for &phase in phases {
            if !planned.contains(&phase) {
                self.check_skippable(phase)?;
                info!(phase = %phase, "Skipping phase");
                let report = PhaseReport::skipped(phase);
                self.registry.record_phase_stats(phase, report.to_stats())?;
                self.registry.save()?;
                summary.phases.push(report);
                continue;
            }

            let precheck_warning = self.check_failed_records(phase, planned, options)?;
            let mut report = self.run_single(phase, options).await?;
            if let Some(message) = precheck_warning {
                report.warnings.insert(0, message);
            }
            self.finish_phase(report, options, &mut summary)?;
        }

        summary.finish();
        info!(
            run_id = %summary.run_id,
            failed = summary.total_failed(),
            warnings = summary.warnings.len(),
            "Pipeline run finished"
        );
        Ok(summary)
    }

    /// A skipped phase must already have produced output for the next one.
    /// A phase may be skipped once at least one record has reached its entry
    /// status (any record at all for discovery).
    fn check_skippable(&self, phase: PipelinePhase) -> Result<(), PipelineError> {
        let Some(entry) = phase.entry_status() else {
            if self.registry.is_empty()? {
                return Err(PipelineError::Precondition(
                    "cannot skip discovery: the registry holds no sources".to_string(),
                ));
            }
            return Ok(());
        };

        if self.registry.count_at_or_beyond(entry)? == 0 {
            return Err(PipelineError::Precondition(format!(
                "cannot skip {phase}: no sources are {entry} or further along"
            )));
        }
        Ok(())
    }

    /// Failed records would silently drop out of collection, packaging and
    /// bundling. Records this invocation resumes later on are not counted.
    fn check_failed_records(
        &self,
        phase: PipelinePhase,
        planned: &[PipelinePhase],
        options: &RunOptions,
    ) -> Result<Option<String>, PipelineError> {
        if !matches!(
            phase,
            PipelinePhase::Collection | PipelinePhase::Packaging | PipelinePhase::Bundling
        ) {
            return Ok(None);
        }

        let failed: Vec<String> = self
            .registry
            .failed_sources()?
            .into_iter()
            .filter(|r| {
                let retried_here = options.resume()
                    && r.failed_phase()
                        .is_some_and(|p| p >= phase && planned.contains(&p));
                !retried_here
            })
            .map(|r| r.url)
            .collect();
        if failed.is_empty() {
            return Ok(None);
        }

        let total = self.registry.len()?;
        let blocking = BlockingError::failed_records(phase, total, failed);
        if options.force_proceed {
            warn!(phase = %phase, failed = blocking.failed_count, "Proceeding past failed records");
            return Ok(Some(format!("forced: {}", blocking.summary())));
        }
        self.persist_blocking(&blocking);
        Err(blocking.into())
    }

    async fn run_single(
        &mut self,
        phase: PipelinePhase,
        options: &RunOptions,
    ) -> Result<PhaseReport, PipelineError> {
        info!(phase = %phase, "Running phase");
        match phase {
            PipelinePhase::Discovery => self.run_discovery().await,
            PipelinePhase::Collection => {
                let operation: Arc<dyn RecordOperation> = Arc::new(CollectionOperation::new(
                    Arc::clone(&self.collaborators.collector),
                    self.settings.layout.clone(),
                ));
                let executor = self.settings.collection.clone();
                self.run_per_record(phase, &executor, operation, options).await
            }
            PipelinePhase::Distillation => {
                let operation: Arc<dyn RecordOperation> = Arc::new(DistillationOperation::new(
                    Arc::clone(&self.collaborators.distiller),
                    self.settings.layout.clone(),
                ));
                let executor = self.settings.distillation.clone();
                self.run_per_record(phase, &executor, operation, options).await
            }
            PipelinePhase::Packaging | PipelinePhase::Bundling => {
                self.run_artifact(phase, options).await
            }
        }
    }

    async fn run_discovery(&mut self) -> Result<PhaseReport, PipelineError> {
        let timer = ExecutionTimer::start();
        let mut report = PhaseReport::new(PipelinePhase::Discovery);

        match self.collaborators.discoverer.discover().await {
            Ok(output) => {
                report.considered = output.sources.len();
                for url in output.sources.keys() {
                    if self.registry.get(url)?.is_none() {
                        report.succeeded.push(url.clone());
                    }
                }
                let added = self.registry.add_sources(output.sources.into_values())?;
                if output.stats.rejected > 0 || output.stats.duplicates > 0 {
                    report.warnings.push(format!(
                        "discovery: {} rejected, {} duplicate candidates",
                        output.stats.rejected, output.stats.duplicates
                    ));
                }
                info!(
                    candidates = output.stats.candidates,
                    added,
                    rejected = output.stats.rejected,
                    duplicates = output.stats.duplicates,
                    "Discovery finished"
                );
            }
            Err(e) => {
                error!(error = %e, "Discovery failed");
                report.considered = 1;
                report.failed.push(FailedItem {
                    id: PipelinePhase::Discovery.to_string(),
                    message: e.to_string(),
                });
            }
        }

        report.duration = timer.elapsed();
        Ok(report)
    }

    async fn run_per_record(
        &mut self,
        phase: PipelinePhase,
        executor: &PhaseExecutor,
        operation: Arc<dyn RecordOperation>,
        options: &RunOptions,
    ) -> Result<PhaseReport, PipelineError> {
        let state = self.registry.snapshot()?;
        let selection = filter::select(&state, phase, &options.criteria);
        if selection.excluded_external > 0 {
            debug!(
                phase = %phase,
                excluded = selection.excluded_external,
                "Records with external output left out"
            );
        }

        let updater = self.registry.updater();
        let mut report = executor
            .run(phase, selection.records, &updater, operation)
            .await;
        report.excluded_external = selection.excluded_external;
        Ok(report)
    }

    /// Packaging and bundling run once over every eligible record.
    async fn run_artifact(
        &mut self,
        phase: PipelinePhase,
        options: &RunOptions,
    ) -> Result<PhaseReport, PipelineError> {
        let timer = ExecutionTimer::start();
        let mut report = PhaseReport::new(phase);

        let state = self.registry.snapshot()?;
        let criteria = filter::FilterCriteria::default().with_resume(options.resume());
        let selection = filter::select(&state, phase, &criteria);
        report.excluded_external = selection.excluded_external;
        if selection.records.is_empty() {
            debug!(phase = %phase, "Nothing new to {}", phase);
            report.duration = timer.elapsed();
            return Ok(report);
        }

        // The artifact covers everything already past this phase's entry too,
        // so re-running after new sources never drops earlier ones.
        let entry = phase.entry_status().unwrap_or(SourceStatus::Discovered);
        let contents: Vec<SourceRecord> = state
            .sources
            .values()
            .filter(|r| r.status.is_at_or_beyond(entry))
            .cloned()
            .collect();

        report.considered = 1;
        let layout = &self.settings.layout;
        let outcome = match phase {
            PipelinePhase::Packaging => self.collaborators.packager.package(&contents, layout).await,
            _ => self.collaborators.bundler.bundle(&contents, layout).await,
        };

        match outcome {
            Ok(artifact) => {
                let metadata = artifact_metadata(phase, &artifact);
                for record in &selection.records {
                    self.registry.update_source(
                        &record.url,
                        SourcePatch::completed(phase, Some(metadata.clone())),
                    )?;
                }
                info!(
                    phase = %phase,
                    path = %artifact.path.display(),
                    records = selection.records.len(),
                    "Artifact produced"
                );
                report.succeeded.push(artifact.path.display().to_string());
            }
            Err(e) => {
                error!(phase = %phase, error = %e, "Artifact step failed");
                report.failed.push(FailedItem {
                    id: phase.to_string(),
                    message: e.to_string(),
                });
            }
        }

        report.duration = timer.elapsed();
        Ok(report)
    }

    fn finish_phase(
        &mut self,
        mut report: PhaseReport,
        options: &RunOptions,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let phase = report.phase;
        summary.warnings.extend(report.warnings.iter().cloned());
        self.registry.record_phase_stats(phase, report.to_stats())?;
        self.registry.save()?;

        let verdict = self.settings.gate.validate(&report);
        let warning = match verdict {
            Ok(GateOutcome::Passed) => None,
            Ok(GateOutcome::Warning(message)) => Some(message),
            Err(blocking) if options.force_proceed => {
                warn!(
                    phase = %phase,
                    failed = blocking.failed_count,
                    "Proceeding past blocking validation error"
                );
                Some(format!("forced: {}", blocking.summary()))
            }
            Err(blocking) => {
                self.persist_blocking(&blocking);
                summary.phases.push(report);
                return Err(blocking.into());
            }
        };

        if let Some(message) = warning {
            report.warnings.push(message.clone());
            summary.warnings.push(message);
            self.registry.record_phase_stats(phase, report.to_stats())?;
            self.registry.save()?;
        }
        summary.phases.push(report);
        Ok(())
    }

    fn persist_blocking(&self, blocking: &BlockingError) {
        let Some(ref dir) = self.settings.errors_dir else {
            return;
        };
        match blocking.write_report(dir) {
            Ok(path) => info!(path = %path.display(), "Blocking error report written"),
            Err(e) => warn!(error = %e, "Failed to write blocking error report"),
        }
    }
}

fn artifact_metadata(phase: PipelinePhase, artifact: &ArtifactOutcome) -> PhaseMetadata {
    let path = artifact.path.display().to_string();
    match phase {
        PipelinePhase::Bundling => PhaseMetadata::Bundling(BundlingMetadata {
            bundle_path: path,
            bundle_id: artifact.id.clone().unwrap_or_default(),
        }),
        _ => PhaseMetadata::Packaging(PackagingMetadata { package_path: path }),
    }
}
