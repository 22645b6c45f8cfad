//! Snapshot format and crash-safe persistence.
//!
//! The snapshot is a single JSON document. Writes go through a temp file in the
//! same directory, are fsynced, then renamed over the target, so a reader sees
//! either the previous complete snapshot or the new one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use uplift_common::{PipelinePhase, SourceRecord, SourceStatus};

use super::legacy::MigrationReport;
use crate::errors::RegistryError;
use crate::stats::PhaseStats;

/// Everything the pipeline persists between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(default)]
    pub sources: BTreeMap<String, SourceRecord>,
    #[serde(default)]
    pub metadata: StateMetadata,
    #[serde(default)]
    pub context: RunContext,
}

/// Aggregates derived from `sources`. Recomputed on load and on every save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub total_sources: usize,
    pub phase_counts: BTreeMap<SourceStatus, usize>,
    pub completion_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl StateMetadata {
    /// Fresh tally of `sources` by status.
    pub fn tally(sources: &BTreeMap<String, SourceRecord>) -> Self {
        let mut phase_counts: BTreeMap<SourceStatus, usize> =
            SourceStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for record in sources.values() {
            *phase_counts.entry(record.status).or_default() += 1;
        }

        let total_sources = sources.len();
        let complete = sources.values().filter(|r| r.status.is_complete()).count();
        let completion_percentage = if total_sources == 0 {
            0.0
        } else {
            complete as f64 / total_sources as f64 * 100.0
        };

        Self {
            total_sources,
            phase_counts,
            completion_percentage,
            last_updated: None,
        }
    }

    pub fn count(&self, status: SourceStatus) -> usize {
        self.phase_counts.get(&status).copied().unwrap_or(0)
    }
}

/// Free-form per-run annotations plus the typed entries the pipeline writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    /// Last run's statistics per phase
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub phase_stats: BTreeMap<PipelinePhase, PhaseStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_migration: Option<MigrationReport>,
    #[serde(flatten)]
    pub annotations: BTreeMap<String, serde_json::Value>,
}

impl PipelineState {
    pub fn refresh_metadata(&mut self) {
        let last_updated = self.metadata.last_updated;
        self.metadata = StateMetadata::tally(&self.sources);
        self.metadata.last_updated = last_updated;
    }
}

/// Read a snapshot. `Ok(None)` when the file does not exist.
pub fn read_snapshot(path: &Path) -> Result<Option<PipelineState>, RegistryError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut state: PipelineState =
        serde_json::from_str(&content).map_err(|e| RegistryError::SnapshotCorrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    for (key, record) in &state.sources {
        if key != &record.url {
            return Err(RegistryError::SnapshotCorrupted {
                path: path.to_path_buf(),
                reason: format!("entry '{}' holds record for '{}'", key, record.url),
            });
        }
    }

    state.refresh_metadata();
    Ok(Some(state))
}

/// Temp file used while writing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Content hash of the snapshot file, `Ok(None)` when it does not exist.
///
/// Used to tell whether another process rewrote the snapshot since it was
/// last read or written here.
pub fn snapshot_fingerprint(path: &Path) -> Result<Option<String>, RegistryError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(fingerprint(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RegistryError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Write a snapshot atomically and return the fingerprint of what was written.
///
/// 1. Write to a temporary file in the same directory
/// 2. fsync the temporary file
/// 3. Rename (atomic on POSIX) over the target
pub fn write_snapshot(path: &Path, state: &PipelineState) -> Result<String, RegistryError> {
    let io_err = |source: std::io::Error| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_vec_pretty(state).map_err(RegistryError::Serialize)?;
    let tmp = temp_path(path);

    {
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }

    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(fingerprint(&json))
}
