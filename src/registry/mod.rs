//! Source registry: the single durable source of truth for a pipeline run.
//!
//! The registry owns the in-memory [`PipelineState`] and its snapshot file.
//! Phase executors never see the registry itself; they get a
//! [`SourceUpdater`] that can read and patch records but cannot persist.
//! Only the owner of the `Registry` (the orchestrator) calls [`Registry::save`].

pub mod legacy;
pub mod snapshot;

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use uplift_common::{PipelinePhase, SourcePatch, SourceRecord, SourceStatus};

use crate::errors::RegistryError;
use crate::stats::PhaseStats;

pub use legacy::MigrationReport;
pub use snapshot::{PipelineState, RunContext, StateMetadata};

fn lock_state(
    state: &Arc<Mutex<PipelineState>>,
) -> Result<MutexGuard<'_, PipelineState>, RegistryError> {
    state.lock().map_err(|_| RegistryError::LockPoisoned)
}

fn apply_patch(
    state: &mut PipelineState,
    url: &str,
    patch: SourcePatch,
) -> Result<SourceRecord, RegistryError> {
    let record = state
        .sources
        .get_mut(url)
        .ok_or_else(|| RegistryError::UnknownSource {
            url: url.to_string(),
        })?;
    record.apply(patch)?;
    Ok(record.clone())
}

pub struct Registry {
    path: PathBuf,
    state: Arc<Mutex<PipelineState>>,
    /// Fingerprint of the snapshot as last read or written by this registry
    disk_fingerprint: Option<String>,
}

impl Registry {
    /// Load the snapshot at `path`.
    ///
    /// A missing file yields an empty registry. A malformed file is a fatal
    /// error: the pipeline never runs on partially recovered state.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let disk_fingerprint = snapshot::snapshot_fingerprint(&path)?;
        let state = match snapshot::read_snapshot(&path)? {
            Some(state) => {
                debug!(
                    path = %path.display(),
                    sources = state.metadata.total_sources,
                    "Loaded snapshot"
                );
                state
            }
            None => {
                debug!(path = %path.display(), "No snapshot found, starting empty");
                PipelineState::default()
            }
        };

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
            disk_fingerprint,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the snapshot if another process rewrote it since this registry
    /// last loaded or saved it. Unsaved in-memory changes are discarded in
    /// that case. Returns whether the state was replaced.
    ///
    /// Call this while holding the run lock, before mutating anything.
    pub fn reload_if_changed(&mut self) -> Result<bool, RegistryError> {
        let current = snapshot::snapshot_fingerprint(&self.path)?;
        if current.is_none() || current == self.disk_fingerprint {
            return Ok(false);
        }

        let fresh = snapshot::read_snapshot(&self.path)?.unwrap_or_default();
        warn!(
            path = %self.path.display(),
            sources = fresh.metadata.total_sources,
            "Snapshot changed on disk since it was loaded, reloading"
        );
        *lock_state(&self.state)? = fresh;
        self.disk_fingerprint = current;
        Ok(true)
    }

    /// Absorb legacy per-phase output files from `legacy_dir`. Safe to call on
    /// every startup.
    pub fn migrate_legacy(&self, legacy_dir: &Path) -> Result<MigrationReport, RegistryError> {
        let mut state = lock_state(&self.state)?;
        let mut report = legacy::migrate(&mut state, legacy_dir);
        if report.changed() {
            report.migrated_at = Some(Utc::now());
            state.context.legacy_migration = Some(report.clone());
        }
        Ok(report)
    }

    /// Merge newly discovered records by URL. Existing entries are never
    /// overwritten. Returns how many records were added.
    pub fn add_sources(
        &self,
        sources: impl IntoIterator<Item = SourceRecord>,
    ) -> Result<usize, RegistryError> {
        let mut state = lock_state(&self.state)?;
        let mut added = 0;
        for record in sources {
            if record.status != SourceStatus::Discovered {
                warn!(
                    url = %record.url,
                    status = %record.status,
                    "Ignoring discovered record with non-discovered status"
                );
                continue;
            }
            if state.sources.contains_key(&record.url) {
                continue;
            }
            state.sources.insert(record.url.clone(), record);
            added += 1;
        }
        Ok(added)
    }

    /// Merge `patch` into the record at `url`.
    pub fn update_source(
        &self,
        url: &str,
        patch: SourcePatch,
    ) -> Result<SourceRecord, RegistryError> {
        let mut state = lock_state(&self.state)?;
        apply_patch(&mut state, url, patch)
    }

    /// Store the last run's statistics for `phase`.
    pub fn record_phase_stats(
        &self,
        phase: PipelinePhase,
        stats: PhaseStats,
    ) -> Result<(), RegistryError> {
        let mut state = lock_state(&self.state)?;
        state.context.phase_stats.insert(phase, stats);
        Ok(())
    }

    /// Set a free-form run annotation.
    pub fn annotate(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), RegistryError> {
        let mut state = lock_state(&self.state)?;
        state.context.annotations.insert(key.into(), value);
        Ok(())
    }

    /// Recompute derived metadata and write the snapshot atomically.
    pub fn save(&mut self) -> Result<(), RegistryError> {
        let mut state = lock_state(&self.state)?;
        state.refresh_metadata();
        state.metadata.last_updated = Some(Utc::now());
        let fingerprint = snapshot::write_snapshot(&self.path, &state)?;
        debug!(
            path = %self.path.display(),
            sources = state.metadata.total_sources,
            "Saved snapshot"
        );
        drop(state);
        self.disk_fingerprint = Some(fingerprint);
        Ok(())
    }

    /// Clone of the current state with freshly tallied metadata.
    pub fn snapshot(&self) -> Result<PipelineState, RegistryError> {
        let state = lock_state(&self.state)?;
        let mut copy = state.clone();
        copy.refresh_metadata();
        Ok(copy)
    }

    pub fn get(&self, url: &str) -> Result<Option<SourceRecord>, RegistryError> {
        Ok(lock_state(&self.state)?.sources.get(url).cloned())
    }

    pub fn len(&self) -> Result<usize, RegistryError> {
        Ok(lock_state(&self.state)?.sources.len())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }

    /// Records currently in `failed`, sorted by URL.
    pub fn failed_sources(&self) -> Result<Vec<SourceRecord>, RegistryError> {
        let state = lock_state(&self.state)?;
        Ok(state
            .sources
            .values()
            .filter(|r| r.status == SourceStatus::Failed)
            .cloned()
            .collect())
    }

    /// Number of records at or past `status` on the forward chain.
    pub fn count_at_or_beyond(&self, status: SourceStatus) -> Result<usize, RegistryError> {
        let state = lock_state(&self.state)?;
        Ok(state
            .sources
            .values()
            .filter(|r| r.status.is_at_or_beyond(status))
            .count())
    }

    /// Handle for phase executors: read and patch, never persist.
    pub fn updater(&self) -> SourceUpdater {
        SourceUpdater {
            state: Arc::clone(&self.state),
        }
    }
}

/// Cloneable, save-less view of the registry used by phase executors.
#[derive(Clone)]
pub struct SourceUpdater {
    state: Arc<Mutex<PipelineState>>,
}

impl SourceUpdater {
    pub fn update_source(
        &self,
        url: &str,
        patch: SourcePatch,
    ) -> Result<SourceRecord, RegistryError> {
        let mut state = lock_state(&self.state)?;
        apply_patch(&mut state, url, patch)
    }

    pub fn get(&self, url: &str) -> Result<Option<SourceRecord>, RegistryError> {
        Ok(lock_state(&self.state)?.sources.get(url).cloned())
    }
}
