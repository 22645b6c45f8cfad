//! Contracts for the external work each phase delegates, and the shipped
//! implementations.
//!
//! The orchestrator only ever talks to these traits. Per-record phases are
//! wrapped in a [`crate::retry::RecordOperation`] adapter (see [`operations`])
//! so the executor can retry them; discovery, packaging and bundling run once.

pub mod command;
pub mod http;
pub mod operations;
pub mod package;
pub mod seeds;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use uplift_common::SourceRecord;

use crate::errors::OperationError;

pub use command::CommandDistiller;
pub use http::HttpCollector;
pub use operations::{CollectionOperation, DistillationOperation};
pub use package::{DirectoryPackager, ManifestBundler};
pub use seeds::SeedListDiscoverer;

/// Where phase outputs live on disk.
#[derive(Debug, Clone)]
pub struct ContentLayout {
    /// Holds `raw/` and `distilled/`
    pub content_dir: PathBuf,
    pub package_dir: PathBuf,
    pub bundle_dir: PathBuf,
}

impl ContentLayout {
    pub fn raw_dir(&self) -> PathBuf {
        self.content_dir.join("raw")
    }

    pub fn distilled_dir(&self) -> PathBuf {
        self.content_dir.join("distilled")
    }
}

/// Stable file stem for a source: hex SHA-256 of its URL.
pub fn content_key(url: &str) -> String {
    sha256_hex(url.as_bytes())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    /// Entries the discoverer looked at
    pub candidates: usize,
    pub duplicates: usize,
    /// Entries dropped as invalid
    pub rejected: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutput {
    /// New records, all with status `discovered`
    pub sources: BTreeMap<String, SourceRecord>,
    pub stats: DiscoveryStats,
}

/// Finds candidate sources.
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self) -> Result<DiscoveryOutput, OperationError>;
}

/// Body and response metadata of one fetch.
#[derive(Debug, Clone, Default)]
pub struct CollectedContent {
    pub content: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Fetches a source's raw content.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, url: &str) -> Result<CollectedContent, OperationError>;
}

/// Turns raw content into structured JSON.
#[async_trait]
pub trait Distiller: Send + Sync {
    async fn distill(
        &self,
        record: &SourceRecord,
        content: &str,
    ) -> Result<serde_json::Value, OperationError>;
}

/// Result of a packaging or bundling invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactOutcome {
    pub path: PathBuf,
    /// Identifier of the produced artifact, when it has one
    pub id: Option<String>,
}

/// Assembles distilled records into a package.
#[async_trait]
pub trait Packager: Send + Sync {
    async fn package(
        &self,
        records: &[SourceRecord],
        layout: &ContentLayout,
    ) -> Result<ArtifactOutcome, OperationError>;
}

/// Produces the distributable bundle from packaged records.
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(
        &self,
        records: &[SourceRecord],
        layout: &ContentLayout,
    ) -> Result<ArtifactOutcome, OperationError>;
}

/// The full set of collaborators one orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub discoverer: Arc<dyn Discoverer>,
    pub collector: Arc<dyn Collector>,
    pub distiller: Arc<dyn Distiller>,
    pub packager: Arc<dyn Packager>,
    pub bundler: Arc<dyn Bundler>,
}
