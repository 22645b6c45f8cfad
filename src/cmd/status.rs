//! Registry inspection and maintenance: `uplift status` and `uplift migrate`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use uplift::config::Config;
use uplift::orchestrator::RunLock;
use uplift::registry::Registry;
use uplift::stats::PhaseStats;
use uplift_common::{ErrorKind, PipelinePhase, SourceStatus};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct FailedSource {
    url: String,
    phase: PipelinePhase,
    kind: ErrorKind,
    message: String,
    retry_count: u32,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    total_sources: usize,
    phase_counts: BTreeMap<SourceStatus, usize>,
    completion_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
    failed: Vec<FailedSource>,
    phase_stats: BTreeMap<PipelinePhase, PhaseStats>,
}

fn load_report(config: &Config) -> Result<StatusReport> {
    let registry = Registry::load(&config.state_file)
        .with_context(|| format!("Failed to load {}", config.state_file.display()))?;
    let state = registry.snapshot()?;

    let failed = state
        .sources
        .values()
        .filter(|r| r.status == SourceStatus::Failed)
        .filter_map(|r| {
            r.error.as_ref().map(|e| FailedSource {
                url: r.url.clone(),
                phase: e.phase,
                kind: e.kind,
                message: e.message.clone(),
                retry_count: e.retry_count,
            })
        })
        .collect();

    Ok(StatusReport {
        total_sources: state.metadata.total_sources,
        phase_counts: state.metadata.phase_counts,
        completion_percentage: state.metadata.completion_percentage,
        last_updated: state.metadata.last_updated,
        failed,
        phase_stats: state.context.phase_stats,
    })
}

pub fn cmd_status(project_dir: &Path, json: bool) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false, false)?;
    let report = load_report(&config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("uplift status: {}", style(config.project_name()).bold());
    println!();

    if report.total_sources == 0 {
        println!("No sources tracked yet. Add seeds to {} and run 'uplift discover'.", config.seeds_file.display());
        println!();
        return Ok(());
    }

    println!("{:<12} {:>6}", "Status", "Count");
    println!("{:<12} {:>6}", "-----------", "-----");
    for status in SourceStatus::ALL {
        let count = report.phase_counts.get(&status).copied().unwrap_or(0);
        if count == 0 {
            continue;
        }
        let label = if status == SourceStatus::Failed {
            style(status.as_str()).red()
        } else {
            style(status.as_str())
        };
        println!("{:<12} {:>6}", label, count);
    }
    println!("{:<12} {:>6}", "total", report.total_sources);
    println!();
    println!("Completion: {:.1}%", report.completion_percentage);
    if let Some(updated) = report.last_updated {
        println!("Last updated: {}", updated.to_rfc3339());
    }

    if !report.failed.is_empty() {
        println!();
        println!("{}", style("Failed sources:").red());
        for failed in &report.failed {
            println!(
                "  - {} [{} {}] {} (attempts: {})",
                failed.url,
                failed.phase,
                style(format!("{:?}", failed.kind)).dim(),
                failed.message,
                failed.retry_count
            );
        }
        println!();
        println!("Retry with the failing phase and --resume, e.g. 'uplift collect --resume'.");
    }
    println!();
    Ok(())
}

pub fn cmd_migrate(project_dir: &Path) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false, false)?;
    config.ensure_directories()?;
    let _lock = RunLock::acquire(&config.lock_file, &Uuid::new_v4().to_string())?;

    let mut registry = Registry::load(&config.state_file)
        .with_context(|| format!("Failed to load {}", config.state_file.display()))?;
    let report = registry.migrate_legacy(&config.legacy_dir)?;

    println!();
    if report.changed() {
        registry.save()?;
        println!(
            "Migrated {} legacy file(s): {} imported, {} upgraded.",
            report.files_read, report.imported, report.upgraded
        );
    } else {
        println!(
            "Nothing to migrate from {} ({} file(s) read).",
            config.legacy_dir.display(),
            report.files_read
        );
    }
    for skipped in &report.skipped_files {
        println!("  {} {}", style("skipped:").yellow(), skipped);
    }
    println!();
    Ok(())
}
