//! Phase execution: `uplift discover|collect|distill|package|bundle|run`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use console::style;
use std::path::Path;
use std::sync::Arc;
use uplift::collaborators::{
    Collaborators, CommandDistiller, DirectoryPackager, Distiller, HttpCollector, ManifestBundler,
    SeedListDiscoverer,
};
use uplift::config::Config;
use uplift::errors::{OperationError, PipelineError};
use uplift::filter::FilterCriteria;
use uplift::orchestrator::{Orchestrator, OrchestratorSettings, RunOptions, RunSummary};
use uplift::pipeline_config::ENV_DISTILL_CMD;
use uplift::registry::Registry;
use uplift_common::{PipelinePhase, SourceRecord};

use super::super::Cli;

/// Stands in when no distill command is configured and distillation is not
/// part of the invocation.
struct UnconfiguredDistiller;

#[async_trait]
impl Distiller for UnconfiguredDistiller {
    async fn distill(
        &self,
        _record: &SourceRecord,
        _content: &str,
    ) -> Result<serde_json::Value, OperationError> {
        Err(OperationError::Processing(format!(
            "no distill command configured; set [distillation] command or {ENV_DISTILL_CMD}"
        )))
    }
}

fn build_orchestrator(config: &Config, runs_distillation: bool) -> Result<Orchestrator> {
    config.ensure_directories()?;

    // Re-read under the run lock; legacy outputs are migrated there too.
    let registry = Registry::load(&config.state_file)
        .with_context(|| format!("Failed to load {}", config.state_file.display()))?;

    let distiller: Arc<dyn Distiller> = match config.toml.distill_command() {
        Some(command) => Arc::new(
            CommandDistiller::new(command, config.toml.distillation.args.clone())
                .with_working_dir(config.project_dir.clone()),
        ),
        None if runs_distillation => anyhow::bail!(
            "No distill command configured. Set [distillation] command in {} or {}.",
            config.config_file.display(),
            ENV_DISTILL_CMD
        ),
        None => Arc::new(UnconfiguredDistiller),
    };

    let collector = HttpCollector::new(&config.toml.user_agent())
        .context("Failed to build HTTP client")?;

    let collaborators = Collaborators {
        discoverer: Arc::new(SeedListDiscoverer::new(&config.seeds_file)),
        collector: Arc::new(collector),
        distiller,
        packager: Arc::new(DirectoryPackager),
        bundler: Arc::new(ManifestBundler),
    };

    let settings = OrchestratorSettings {
        collection: config.toml.collection.execution().executor(),
        distillation: config.toml.distillation.execution().executor(),
        gate: config.toml.gate(),
        layout: config.layout(),
        errors_dir: Some(config.errors_dir.clone()),
        lock_file: Some(config.lock_file.clone()),
        legacy_dir: Some(config.legacy_dir.clone()),
    };

    Ok(Orchestrator::new(registry, collaborators, settings))
}

/// `uplift <phase>`: one phase with the same checks as a full run.
pub async fn run_phase(
    cli: &Cli,
    project_dir: &Path,
    phase: PipelinePhase,
    criteria: FilterCriteria,
) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, cli.force_proceed)?;
    let mut orchestrator =
        build_orchestrator(&config, phase == PipelinePhase::Distillation)?;
    let options = RunOptions::default()
        .with_force_proceed(config.force_proceed)
        .with_criteria(criteria);

    let result = orchestrator.run_phase(phase, &options).await;
    finish(&config, result)
}

/// `uplift run`: every phase not skipped.
pub async fn run_all(
    cli: &Cli,
    project_dir: &Path,
    skip: Vec<PipelinePhase>,
    criteria: FilterCriteria,
) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose, cli.force_proceed)?;
    let mut orchestrator =
        build_orchestrator(&config, !skip.contains(&PipelinePhase::Distillation))?;
    let options = skip
        .into_iter()
        .fold(RunOptions::default(), |options, phase| options.with_skip(phase))
        .with_force_proceed(config.force_proceed)
        .with_criteria(criteria);

    let result = orchestrator.run(&options).await;
    finish(&config, result)
}

fn finish(config: &Config, result: Result<RunSummary, PipelineError>) -> Result<()> {
    match result {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(err) => {
            if let Some(blocking) = err.as_blocking() {
                eprintln!();
                eprintln!("{}", style("Pipeline halted").red().bold());
                eprintln!();
                eprintln!(
                    "Report: {}",
                    config
                        .errors_dir
                        .join(format!("blocking-{}.json", blocking.phase))
                        .display()
                );
                eprintln!();
            }
            Err(err.into())
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run {}", style(&summary.run_id).dim());
    println!();
    println!(
        "{:<14} {:>10} {:>10} {:>8} {:>10}",
        "Phase", "Considered", "Succeeded", "Failed", "Duration"
    );
    println!(
        "{:<14} {:>10} {:>10} {:>8} {:>10}",
        "-------------", "----------", "---------", "------", "--------"
    );
    for report in &summary.phases {
        if report.skipped {
            println!("{:<14} {}", report.phase.as_str(), style("skipped").dim());
            continue;
        }
        let failed = if report.failed.is_empty() {
            style(report.failed.len().to_string()).green()
        } else {
            style(report.failed.len().to_string()).red()
        };
        println!(
            "{:<14} {:>10} {:>10} {:>8} {:>9}ms",
            report.phase.as_str(),
            report.considered,
            report.succeeded.len(),
            failed,
            report.duration.as_millis()
        );
    }

    if !summary.warnings.is_empty() {
        println!();
        println!("{}", style("Warnings:").yellow());
        for warning in &summary.warnings {
            println!("  - {warning}");
        }
    }
    println!();
}
