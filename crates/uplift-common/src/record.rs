//! Source records: the unit of work tracked through every phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::{PhaseMetadata, PhaseMetadataSet};
use crate::phase::{ParseNameError, PipelinePhase};
use crate::status::SourceStatus;

/// Kind of publication a source points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Changelog,
    BlogPost,
    Documentation,
    GithubRelease,
    GithubRepository,
    RssFeed,
    MavenIndex,
    #[default]
    #[serde(other)]
    Other,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Changelog => "changelog",
            SourceType::BlogPost => "blog_post",
            SourceType::Documentation => "documentation",
            SourceType::GithubRelease => "github_release",
            SourceType::GithubRepository => "github_repository",
            SourceType::RssFeed => "rss_feed",
            SourceType::MavenIndex => "maven_index",
            SourceType::Other => "other",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "changelog" => Ok(SourceType::Changelog),
            "blog_post" | "blog" => Ok(SourceType::BlogPost),
            "documentation" | "docs" => Ok(SourceType::Documentation),
            "github_release" => Ok(SourceType::GithubRelease),
            "github_repository" | "github_repo" => Ok(SourceType::GithubRepository),
            "rss_feed" | "rss" => Ok(SourceType::RssFeed),
            "maven_index" | "maven" => Ok(SourceType::MavenIndex),
            "other" => Ok(SourceType::Other),
            _ => Err(ParseNameError {
                kind: "source type",
                value: s.to_string(),
                valid: "changelog, blog_post, documentation, github_release, github_repository, rss_feed, maven_index, other",
            }),
        }
    }
}

/// Mod loader a source is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderType {
    Fabric,
    Forge,
    NeoForge,
    Quilt,
    Vanilla,
}

impl LoaderType {
    pub fn as_str(self) -> &'static str {
        match self {
            LoaderType::Fabric => "fabric",
            LoaderType::Forge => "forge",
            LoaderType::NeoForge => "neoforge",
            LoaderType::Quilt => "quilt",
            LoaderType::Vanilla => "vanilla",
        }
    }
}

impl std::fmt::Display for LoaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoaderType {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fabric" => Ok(LoaderType::Fabric),
            "forge" => Ok(LoaderType::Forge),
            "neoforge" | "neo_forge" | "neo-forge" => Ok(LoaderType::NeoForge),
            "quilt" => Ok(LoaderType::Quilt),
            "vanilla" => Ok(LoaderType::Vanilla),
            _ => Err(ParseNameError {
                kind: "loader",
                value: s.to_string(),
                valid: "fabric, forge, neoforge, quilt, vanilla",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Priority {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(ParseNameError {
                kind: "priority",
                value: s.to_string(),
                valid: "low, medium, high, critical",
            }),
        }
    }
}

/// Classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    HttpStatus,
    Processing,
    Io,
}

/// Last failure recorded on a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceError {
    pub kind: ErrorKind,
    pub message: String,
    /// Phase whose operation failed; decides where a resume re-enters
    pub phase: PipelinePhase,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl SourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, phase: PipelinePhase) -> Self {
        Self {
            kind,
            message: message.into(),
            phase,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// A single trackable unit of ingested content, identified by URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub status: SourceStatus,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_type: Option<LoaderType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minecraft_version: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub discovered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distilled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SourceError>,
    #[serde(default, skip_serializing_if = "PhaseMetadataSet::is_empty")]
    pub metadata: PhaseMetadataSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_sources: Vec<String>,
}

impl SourceRecord {
    /// Create a freshly discovered record.
    pub fn discovered(url: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            url: url.into(),
            status: SourceStatus::Discovered,
            source_type,
            loader_type: None,
            minecraft_version: None,
            priority: Priority::default(),
            relevance_score: 0.0,
            title: None,
            tags: Vec::new(),
            discovered_at: Utc::now(),
            collected_at: None,
            distilled_at: None,
            packaged_at: None,
            bundled_at: None,
            error: None,
            metadata: PhaseMetadataSet::new(),
            parent_source: None,
            related_sources: Vec::new(),
        }
    }

    pub fn with_loader(mut self, loader: LoaderType) -> Self {
        self.loader_type = Some(loader);
        self
    }

    pub fn with_minecraft_version(mut self, version: impl Into<String>) -> Self {
        self.minecraft_version = Some(version.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_relevance(mut self, relevance_score: f64) -> Self {
        self.relevance_score = relevance_score;
        self
    }

    /// Phase recorded on the current error, if the record failed.
    pub fn failed_phase(&self) -> Option<PipelinePhase> {
        self.error.as_ref().map(|e| e.phase)
    }

    /// Completion timestamp for `phase`.
    pub fn completed_at(&self, phase: PipelinePhase) -> Option<DateTime<Utc>> {
        match phase {
            PipelinePhase::Discovery => Some(self.discovered_at),
            PipelinePhase::Collection => self.collected_at,
            PipelinePhase::Distillation => self.distilled_at,
            PipelinePhase::Packaging => self.packaged_at,
            PipelinePhase::Bundling => self.bundled_at,
        }
    }

    fn stamp(&mut self, phase: PipelinePhase, at: DateTime<Utc>) {
        match phase {
            PipelinePhase::Discovery => self.discovered_at = at,
            PipelinePhase::Collection => self.collected_at = Some(at),
            PipelinePhase::Distillation => self.distilled_at = Some(at),
            PipelinePhase::Packaging => self.packaged_at = Some(at),
            PipelinePhase::Bundling => self.bundled_at = Some(at),
        }
    }

    /// Apply a patch in place, rejecting illegal status moves and metadata
    /// that does not match the resulting status. On error the record is left
    /// untouched.
    pub fn apply(&mut self, patch: SourcePatch) -> Result<(), TransitionError> {
        let next_status = patch.status.unwrap_or(self.status);
        if !self.status.can_transition_to(next_status, self.failed_phase()) {
            return Err(TransitionError::IllegalStatus {
                url: self.url.clone(),
                from: self.status,
                to: next_status,
            });
        }

        if let Some(ref metadata) = patch.metadata {
            let phase = metadata.phase();
            if !metadata.is_external() && !next_status.is_at_or_beyond(phase.success_status()) {
                return Err(TransitionError::MetadataMismatch {
                    url: self.url.clone(),
                    phase,
                    status: next_status,
                });
            }
        }

        if next_status == SourceStatus::Failed && patch.error.is_none() && self.error.is_none() {
            return Err(TransitionError::MissingError {
                url: self.url.clone(),
            });
        }

        self.status = next_status;
        if let Some(metadata) = patch.metadata {
            self.metadata.insert(metadata);
        }
        match patch.error {
            Some(ErrorPatch::Set(error)) => self.error = Some(error),
            Some(ErrorPatch::Clear) => self.error = None,
            None => {}
        }
        if let Some((phase, at)) = patch.completed {
            self.stamp(phase, at);
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(score) = patch.relevance_score {
            self.relevance_score = score;
        }
        if let Some(parent) = patch.parent_source {
            self.parent_source = Some(parent);
        }
        for related in patch.related_sources {
            if related != self.url && !self.related_sources.contains(&related) {
                self.related_sources.push(related);
            }
        }
        Ok(())
    }
}

/// How a patch changes the record's error field.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPatch {
    Set(SourceError),
    Clear,
}

/// Field changes merged into an existing record by the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePatch {
    pub status: Option<SourceStatus>,
    pub error: Option<ErrorPatch>,
    pub metadata: Option<PhaseMetadata>,
    /// Phase completion timestamp to stamp
    pub completed: Option<(PipelinePhase, DateTime<Utc>)>,
    pub priority: Option<Priority>,
    pub relevance_score: Option<f64>,
    pub parent_source: Option<String>,
    /// Appended to the existing list, deduplicated
    pub related_sources: Vec<String>,
}

impl SourcePatch {
    pub fn status(status: SourceStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Mark `phase` as finished: success status, metadata, timestamp, error cleared.
    pub fn completed(phase: PipelinePhase, metadata: Option<PhaseMetadata>) -> Self {
        Self {
            status: Some(phase.success_status()),
            error: Some(ErrorPatch::Clear),
            metadata,
            completed: Some((phase, Utc::now())),
            ..Default::default()
        }
    }

    pub fn failed(error: SourceError) -> Self {
        Self {
            status: Some(SourceStatus::Failed),
            error: Some(ErrorPatch::Set(error)),
            ..Default::default()
        }
    }

    pub fn metadata(metadata: PhaseMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..Default::default()
        }
    }
}

/// A patch that would break the record's status machine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("Illegal status transition for {url}: {from} -> {to}")]
    IllegalStatus {
        url: String,
        from: SourceStatus,
        to: SourceStatus,
    },

    #[error("Metadata for phase {phase} does not fit status {status} on {url}")]
    MetadataMismatch {
        url: String,
        phase: PipelinePhase,
        status: SourceStatus,
    },

    #[error("Cannot mark {url} failed without an error")]
    MissingError { url: String },
}
