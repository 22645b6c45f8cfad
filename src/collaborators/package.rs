//! Shipped packaging and bundling.
//!
//! The package is a directory: one JSON file per distilled source plus an
//! `index.json`. A bundle is an immutable copy of the package under
//! `<bundle_dir>/<bundle_id>/` with a `manifest.json` of SHA-256 checksums.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use uplift_common::{LoaderType, Priority, SourceRecord, SourceType};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{ArtifactOutcome, Bundler, ContentLayout, Packager, content_key, sha256_hex};
use crate::errors::OperationError;

pub const INDEX_FILE: &str = "index.json";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_type: Option<LoaderType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minecraft_version: Option<String>,
    pub priority: Priority,
    /// Path relative to the package directory
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageIndex {
    pub created_at: DateTime<Utc>,
    pub sources: Vec<IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub bundle_id: String,
    pub created_at: DateTime<Utc>,
    /// URLs of the sources the bundle was built from
    pub sources: Vec<String>,
    pub files: Vec<ManifestFile>,
}

fn io_context(path: &Path, err: std::io::Error) -> OperationError {
    OperationError::Processing(format!("{}: {err}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), OperationError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| OperationError::Processing(format!("cannot encode {}: {e}", path.display())))?;
    std::fs::write(path, json).map_err(|e| io_context(path, e))
}

fn distilled_output(record: &SourceRecord, layout: &ContentLayout) -> PathBuf {
    match record.metadata.distillation() {
        Some(meta) if !meta.output_path.is_empty() => layout.content_dir.join(&meta.output_path),
        _ => layout
            .distilled_dir()
            .join(format!("{}.json", content_key(&record.url))),
    }
}

/// Writes distilled outputs and an index into the package directory.
#[derive(Debug, Default)]
pub struct DirectoryPackager;

#[async_trait]
impl Packager for DirectoryPackager {
    async fn package(
        &self,
        records: &[SourceRecord],
        layout: &ContentLayout,
    ) -> Result<ArtifactOutcome, OperationError> {
        let package_dir = &layout.package_dir;
        let sources_dir = package_dir.join("sources");
        if sources_dir.exists() {
            std::fs::remove_dir_all(&sources_dir).map_err(|e| io_context(&sources_dir, e))?;
        }
        std::fs::create_dir_all(&sources_dir).map_err(|e| io_context(&sources_dir, e))?;

        let mut sorted: Vec<&SourceRecord> = records.iter().collect();
        sorted.sort_by(|a, b| a.url.cmp(&b.url));

        let mut entries = Vec::with_capacity(sorted.len());
        for record in sorted {
            let from = distilled_output(record, layout);
            let file = format!("sources/{}.json", content_key(&record.url));
            std::fs::copy(&from, package_dir.join(&file)).map_err(|e| {
                OperationError::Processing(format!(
                    "missing distilled output for {} ({}): {e}",
                    record.url,
                    from.display()
                ))
            })?;
            entries.push(IndexEntry {
                url: record.url.clone(),
                title: record.title.clone(),
                source_type: record.source_type,
                loader_type: record.loader_type,
                minecraft_version: record.minecraft_version.clone(),
                priority: record.priority,
                file,
            });
        }

        let index = PackageIndex {
            created_at: Utc::now(),
            sources: entries,
        };
        write_json(&package_dir.join(INDEX_FILE), &index)?;
        info!(path = %package_dir.display(), sources = index.sources.len(), "Package written");

        Ok(ArtifactOutcome {
            path: package_dir.clone(),
            id: None,
        })
    }
}

/// Copies the package into a fresh bundle directory with a checksum manifest.
#[derive(Debug, Default)]
pub struct ManifestBundler;

#[async_trait]
impl Bundler for ManifestBundler {
    async fn bundle(
        &self,
        records: &[SourceRecord],
        layout: &ContentLayout,
    ) -> Result<ArtifactOutcome, OperationError> {
        let package_dir = &layout.package_dir;
        if !package_dir.join(INDEX_FILE).exists() {
            return Err(OperationError::Processing(format!(
                "no package found in {}; run packaging first",
                package_dir.display()
            )));
        }

        let bundle_id = Uuid::new_v4().to_string();
        let dest = layout.bundle_dir.join(&bundle_id);
        std::fs::create_dir_all(&dest).map_err(|e| io_context(&dest, e))?;

        let mut files = Vec::new();
        for entry in WalkDir::new(package_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| OperationError::Processing(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(package_dir)
                .map_err(|e| OperationError::Processing(e.to_string()))?;
            let bytes = std::fs::read(entry.path()).map_err(|e| io_context(entry.path(), e))?;

            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_context(parent, e))?;
            }
            std::fs::write(&target, &bytes).map_err(|e| io_context(&target, e))?;

            files.push(ManifestFile {
                path: relative.to_string_lossy().replace('\\', "/"),
                sha256: sha256_hex(&bytes),
                bytes: bytes.len() as u64,
            });
        }

        let mut sources: Vec<String> = records.iter().map(|r| r.url.clone()).collect();
        sources.sort();
        let manifest = BundleManifest {
            bundle_id: bundle_id.clone(),
            created_at: Utc::now(),
            sources,
            files,
        };
        write_json(&dest.join(MANIFEST_FILE), &manifest)?;
        info!(bundle_id = %bundle_id, files = manifest.files.len(), "Bundle written");

        Ok(ArtifactOutcome {
            path: dest,
            id: Some(bundle_id),
        })
    }
}
