//! Discovery from a hand-maintained seed list (`.uplift/seeds.toml`).
//!
//! ```toml
//! [[sources]]
//! url = "https://fabricmc.net/2024/05/31/121.html"
//! type = "blog_post"
//! loader = "fabric"
//! minecraft_version = "1.21"
//! priority = "high"
//! relevance = 0.9
//! tags = ["porting"]
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};
use uplift_common::{
    DiscoveryMetadata, LoaderType, PhaseMetadata, Priority, SourceRecord, SourceType,
};

use super::{DiscoveryOutput, Discoverer};
use crate::errors::OperationError;

#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    sources: Vec<SeedEntry>,
}

#[derive(Debug, Deserialize)]
struct SeedEntry {
    url: String,
    #[serde(default, rename = "type")]
    source_type: Option<String>,
    #[serde(default)]
    loader: Option<String>,
    #[serde(default)]
    minecraft_version: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    relevance: Option<f64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    parent: Option<String>,
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.starts_with('/'))
}

impl SeedEntry {
    fn into_record(self, seed_file: &str) -> Result<SourceRecord, String> {
        let url = self.url.trim().to_string();
        if !is_http_url(&url) {
            return Err(format!("not an http(s) URL: '{url}'"));
        }

        let source_type = match self.source_type {
            Some(ref s) => s.parse::<SourceType>().map_err(|e| e.to_string())?,
            None => SourceType::default(),
        };
        let mut record = SourceRecord::discovered(url, source_type);

        if let Some(ref loader) = self.loader {
            record = record.with_loader(loader.parse::<LoaderType>().map_err(|e| e.to_string())?);
        }
        if let Some(version) = self.minecraft_version {
            record = record.with_minecraft_version(version);
        }
        if let Some(ref priority) = self.priority {
            record = record.with_priority(priority.parse::<Priority>().map_err(|e| e.to_string())?);
        }
        if let Some(relevance) = self.relevance {
            if !(0.0..=1.0).contains(&relevance) {
                return Err(format!("relevance {relevance} outside 0.0..=1.0"));
            }
            record = record.with_relevance(relevance);
        }
        record.title = self.title;
        record.tags = self.tags;
        record.parent_source = self.parent;
        record.metadata.insert(PhaseMetadata::Discovery(DiscoveryMetadata {
            discovered_by: "seed_list".to_string(),
            found_on: Some(seed_file.to_string()),
            published_at: None,
        }));
        Ok(record)
    }
}

/// Reads candidate sources from a TOML seed list.
pub struct SeedListDiscoverer {
    path: PathBuf,
}

impl SeedListDiscoverer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Discoverer for SeedListDiscoverer {
    async fn discover(&self) -> Result<DiscoveryOutput, OperationError> {
        let mut output = DiscoveryOutput::default();
        if !tokio::fs::try_exists(&self.path).await? {
            warn!(path = %self.path.display(), "No seed list found; nothing to discover");
            return Ok(output);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let seeds: SeedFile = toml::from_str(&content).map_err(|e| {
            OperationError::Processing(format!("invalid seed list {}: {e}", self.path.display()))
        })?;

        let seed_file = self.path.display().to_string();
        for entry in seeds.sources {
            output.stats.candidates += 1;
            match entry.into_record(&seed_file) {
                Ok(record) => {
                    if output.sources.contains_key(&record.url) {
                        output.stats.duplicates += 1;
                        continue;
                    }
                    debug!(url = %record.url, "Seed accepted");
                    output.sources.insert(record.url.clone(), record);
                }
                Err(reason) => {
                    warn!(reason = %reason, "Rejected seed entry");
                    output.stats.rejected += 1;
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use uplift_common::{PipelinePhase, SourceStatus};

    const SEEDS: &str = r#"
[[sources]]
url = "https://fabricmc.net/2024/05/31/121.html"
type = "blog"
loader = "fabric"
minecraft_version = "1.21"
priority = "high"
relevance = 0.9

[[sources]]
url = "https://fabricmc.net/2024/05/31/121.html"

[[sources]]
url = "ftp://example.com/file"

[[sources]]
url = "https://docs.neoforged.net/"
loader = "paper"

[[sources]]
url = "https://docs.neoforged.net/docs/gettingstarted"
type = "documentation"
"#;

    #[tokio::test]
    async fn test_seed_list_parsed_and_filtered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seeds.toml");
        std::fs::write(&path, SEEDS).unwrap();

        let output = SeedListDiscoverer::new(&path).discover().await.unwrap();
        assert_eq!(output.stats.candidates, 5);
        assert_eq!(output.stats.duplicates, 1);
        assert_eq!(output.stats.rejected, 2);
        assert_eq!(output.sources.len(), 2);

        let fabric = &output.sources["https://fabricmc.net/2024/05/31/121.html"];
        assert_eq!(fabric.status, SourceStatus::Discovered);
        assert_eq!(fabric.source_type, SourceType::BlogPost);
        assert_eq!(fabric.loader_type, Some(LoaderType::Fabric));
        assert_eq!(fabric.priority, Priority::High);
        assert!(fabric.metadata.get(PipelinePhase::Discovery).is_some());
    }

    #[tokio::test]
    async fn test_missing_seed_list_is_empty() {
        let dir = tempdir().unwrap();
        let output = SeedListDiscoverer::new(dir.path().join("seeds.toml"))
            .discover()
            .await
            .unwrap();
        assert!(output.sources.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_seed_list_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seeds.toml");
        std::fs::write(&path, "[[sources]]\nurl = ").unwrap();
        let err = SeedListDiscoverer::new(&path).discover().await.unwrap_err();
        assert!(matches!(err, OperationError::Processing(_)));
    }

    #[test]
    fn test_http_url_check() {
        assert!(is_http_url("https://a.b"));
        assert!(is_http_url("http://localhost:8080/x"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("file:///etc/passwd"));
    }
}
