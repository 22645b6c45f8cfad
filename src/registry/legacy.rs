//! Absorption of older, phase-siloed output files into the unified snapshot.
//!
//! Earlier releases wrote one file per phase. Each file is either
//! `{ "sources": { url: record } }` or a bare array of records, with
//! camelCase or snake_case field names. Migration is additive and idempotent:
//! a URL already in the snapshot is only ever moved forward, never replaced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use uplift_common::{
    LoaderType, PipelinePhase, Priority, SourceRecord, SourceStatus, SourceType,
};

use super::snapshot::PipelineState;

/// Legacy file names and the phase that wrote each one, oldest phase first.
pub const LEGACY_FILES: [(&str, PipelinePhase); 3] = [
    ("discovered-sources.json", PipelinePhase::Discovery),
    ("collected-sources.json", PipelinePhase::Collection),
    ("distilled-sources.json", PipelinePhase::Distillation),
];

/// Outcome of a migration pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub files_read: usize,
    /// URLs that were not in the snapshot before
    pub imported: usize,
    /// Existing records moved forward to a more advanced legacy status
    pub upgraded: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
}

impl MigrationReport {
    pub fn changed(&self) -> bool {
        self.imported > 0 || self.upgraded > 0
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyFile {
    Keyed {
        sources: BTreeMap<String, LegacyRecord>,
    },
    List(Vec<LegacyRecord>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyRecord {
    url: Option<String>,
    status: Option<String>,
    #[serde(alias = "sourceType", alias = "type")]
    source_type: Option<String>,
    #[serde(alias = "loaderType", alias = "loader")]
    loader_type: Option<String>,
    #[serde(alias = "minecraftVersion")]
    minecraft_version: Option<String>,
    priority: Option<String>,
    #[serde(alias = "relevanceScore", alias = "relevance")]
    relevance_score: Option<f64>,
    title: Option<String>,
    tags: Vec<String>,
    #[serde(alias = "discoveredAt")]
    discovered_at: Option<DateTime<Utc>>,
    #[serde(alias = "collectedAt")]
    collected_at: Option<DateTime<Utc>>,
    #[serde(alias = "distilledAt")]
    distilled_at: Option<DateTime<Utc>>,
    #[serde(alias = "parentSource")]
    parent_source: Option<String>,
}

impl LegacyRecord {
    /// Convert into a record. Statuses that cannot be trusted after an
    /// interrupted legacy run (in-flight, failed) fall back to the entry status
    /// of the phase that wrote the file so the work is redone.
    fn into_record(self, url: String, phase: PipelinePhase) -> SourceRecord {
        let implied = phase.success_status();
        let status = match self.status.as_deref().map(str::parse::<SourceStatus>) {
            Some(Ok(status)) if status.is_in_flight() || status == SourceStatus::Failed => {
                phase.entry_status().unwrap_or(SourceStatus::Discovered)
            }
            Some(Ok(status)) => status,
            _ => implied,
        };

        let source_type = self
            .source_type
            .and_then(|s| s.parse::<SourceType>().ok())
            .unwrap_or_default();

        let mut record = SourceRecord::discovered(url, source_type);
        record.status = status;
        record.loader_type = self.loader_type.and_then(|s| s.parse::<LoaderType>().ok());
        record.minecraft_version = self.minecraft_version;
        record.priority = self
            .priority
            .and_then(|s| s.parse::<Priority>().ok())
            .unwrap_or_default();
        record.relevance_score = self.relevance_score.unwrap_or(0.0);
        record.title = self.title;
        record.tags = self.tags;
        if let Some(at) = self.discovered_at {
            record.discovered_at = at;
        }
        record.collected_at = self.collected_at;
        record.distilled_at = self.distilled_at;
        record.parent_source = self.parent_source;
        record
    }
}

fn parse_legacy_file(content: &str, phase: PipelinePhase) -> serde_json::Result<Vec<SourceRecord>> {
    let records = match serde_json::from_str::<LegacyFile>(content)? {
        LegacyFile::Keyed { sources } => sources
            .into_iter()
            .map(|(key, rec)| {
                let url = rec.url.clone().unwrap_or(key);
                rec.into_record(url, phase)
            })
            .collect(),
        LegacyFile::List(items) => items
            .into_iter()
            .filter_map(|rec| {
                let url = rec.url.clone()?;
                Some(rec.into_record(url, phase))
            })
            .collect(),
    };
    Ok(records)
}

/// Merge legacy files found in `legacy_dir` into `state`.
///
/// Files are processed oldest phase first. Unreadable or unparsable files are
/// skipped with a warning; the unified snapshot stays the source of truth.
pub fn migrate(state: &mut PipelineState, legacy_dir: &Path) -> MigrationReport {
    let mut report = MigrationReport::default();

    for (file_name, phase) in LEGACY_FILES {
        let path = legacy_dir.join(file_name);
        if !path.exists() {
            continue;
        }

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| parse_legacy_file(&content, phase).map_err(|e| e.to_string()));

        let records = match parsed {
            Ok(records) => records,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable legacy file");
                report.skipped_files.push(file_name.to_string());
                continue;
            }
        };
        report.files_read += 1;

        for imported in records {
            match state.sources.get_mut(&imported.url) {
                None => {
                    debug!(url = %imported.url, status = %imported.status, "Imported legacy source");
                    state.sources.insert(imported.url.clone(), imported);
                    report.imported += 1;
                }
                Some(existing) => {
                    // Import is not a phase transition: it only ever moves a
                    // healthy record forward and keeps everything else.
                    let advances = match (existing.status.rank(), imported.status.rank()) {
                        (Some(current), Some(legacy)) => legacy > current,
                        _ => false,
                    };
                    if advances && !existing.status.is_in_flight() {
                        existing.status = imported.status;
                        existing.collected_at = existing.collected_at.or(imported.collected_at);
                        existing.distilled_at = existing.distilled_at.or(imported.distilled_at);
                        report.upgraded += 1;
                    }
                }
            }
        }
    }

    if report.files_read > 0 {
        info!(
            files = report.files_read,
            imported = report.imported,
            upgraded = report.upgraded,
            "Legacy migration finished"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DISCOVERED: &str = r#"{
        "sources": {
            "https://fabricmc.net/blog/1.21": {"sourceType": "blog_post", "loaderType": "fabric", "minecraftVersion": "1.21"},
            "https://neoforged.net/news/21.0": {"type": "blog", "loader": "neoforge", "priority": "high"}
        }
    }"#;

    const COLLECTED: &str = r#"[
        {"url": "https://fabricmc.net/blog/1.21", "status": "collected", "collectedAt": "2024-06-01T10:00:00Z"},
        {"url": "https://example.com/in-flight", "status": "collecting"},
        {"status": "collected"}
    ]"#;

    fn write_legacy(dir: &Path) {
        std::fs::write(dir.join("discovered-sources.json"), DISCOVERED).unwrap();
        std::fs::write(dir.join("collected-sources.json"), COLLECTED).unwrap();
    }

    #[test]
    fn test_migrate_imports_and_dedups() {
        let dir = tempdir().unwrap();
        write_legacy(dir.path());
        let mut state = PipelineState::default();

        let report = migrate(&mut state, dir.path());
        assert_eq!(report.files_read, 2);
        assert_eq!(report.imported, 3);
        assert_eq!(report.upgraded, 1);

        let fabric = &state.sources["https://fabricmc.net/blog/1.21"];
        assert_eq!(fabric.status, SourceStatus::Collected);
        assert_eq!(fabric.loader_type, Some(LoaderType::Fabric));
        assert!(fabric.collected_at.is_some());

        let neo = &state.sources["https://neoforged.net/news/21.0"];
        assert_eq!(neo.source_type, SourceType::BlogPost);
        assert_eq!(neo.priority, Priority::High);

        // Interrupted legacy work is redone from the phase's entry status.
        let in_flight = &state.sources["https://example.com/in-flight"];
        assert_eq!(in_flight.status, SourceStatus::Discovered);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempdir().unwrap();
        write_legacy(dir.path());
        let mut state = PipelineState::default();
        migrate(&mut state, dir.path());
        let after_first = state.sources.clone();

        let second = migrate(&mut state, dir.path());
        assert!(!second.changed());
        assert_eq!(state.sources, after_first);
    }

    #[test]
    fn test_migrate_never_moves_records_backward() {
        let dir = tempdir().unwrap();
        write_legacy(dir.path());
        let mut state = PipelineState::default();
        let mut distilled =
            SourceRecord::discovered("https://fabricmc.net/blog/1.21", SourceType::BlogPost);
        distilled.status = SourceStatus::Distilled;
        state.sources.insert(distilled.url.clone(), distilled);

        migrate(&mut state, dir.path());
        assert_eq!(
            state.sources["https://fabricmc.net/blog/1.21"].status,
            SourceStatus::Distilled
        );
    }

    #[test]
    fn test_unparsable_legacy_file_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("distilled-sources.json"), "not json").unwrap();
        let mut state = PipelineState::default();
        let report = migrate(&mut state, dir.path());
        assert_eq!(report.files_read, 0);
        assert_eq!(report.skipped_files, vec!["distilled-sources.json".to_string()]);
        assert!(state.sources.is_empty());
    }

    #[test]
    fn test_missing_legacy_dir_is_noop() {
        let dir = tempdir().unwrap();
        let mut state = PipelineState::default();
        let report = migrate(&mut state, &dir.path().join("nope"));
        assert_eq!(report, MigrationReport::default());
    }
}
