//! Adapters that run a collaborator call as one retryable record operation
//! and persist its output under the content directory.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uplift_common::{CollectionMetadata, DistillationMetadata, PhaseMetadata, Provenance, SourceRecord};

use super::{Collector, ContentLayout, Distiller, content_key, sha256_hex};
use crate::errors::OperationError;
use crate::retry::RecordOperation;

async fn write_file(path: PathBuf, bytes: &[u8]) -> Result<(), OperationError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, bytes).await?;
    Ok(())
}

/// Collection: fetch, store the body as `raw/<key>.txt`, describe it.
pub struct CollectionOperation {
    collector: Arc<dyn Collector>,
    layout: ContentLayout,
}

impl CollectionOperation {
    pub fn new(collector: Arc<dyn Collector>, layout: ContentLayout) -> Self {
        Self { collector, layout }
    }
}

#[async_trait]
impl RecordOperation for CollectionOperation {
    async fn execute(&self, record: &SourceRecord) -> Result<PhaseMetadata, OperationError> {
        let collected = self.collector.collect(&record.url).await?;

        let file_name = format!("{}.txt", content_key(&record.url));
        let bytes = collected.content.as_bytes();
        write_file(self.layout.raw_dir().join(&file_name), bytes).await?;
        debug!(url = %record.url, bytes = bytes.len(), "Stored raw content");

        Ok(PhaseMetadata::Collection(CollectionMetadata {
            status_code: collected.status_code,
            content_type: collected.content_type,
            content_length: bytes.len() as u64,
            etag: collected.etag,
            last_modified: collected.last_modified,
            content_hash: sha256_hex(bytes),
            content_path: format!("raw/{file_name}"),
            provenance: Provenance::Pipeline,
        }))
    }
}

/// Distillation: read stored content, distill, store `distilled/<key>.json`.
pub struct DistillationOperation {
    distiller: Arc<dyn Distiller>,
    layout: ContentLayout,
}

impl DistillationOperation {
    pub fn new(distiller: Arc<dyn Distiller>, layout: ContentLayout) -> Self {
        Self { distiller, layout }
    }

    fn raw_path(&self, record: &SourceRecord) -> PathBuf {
        match record.metadata.collection() {
            Some(meta) if !meta.content_path.is_empty() => {
                self.layout.content_dir.join(&meta.content_path)
            }
            _ => self
                .layout
                .raw_dir()
                .join(format!("{}.txt", content_key(&record.url))),
        }
    }
}

fn item_count(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => items.len(),
        serde_json::Value::Object(fields) => fields.len(),
        serde_json::Value::Null => 0,
        _ => 1,
    }
}

#[async_trait]
impl RecordOperation for DistillationOperation {
    async fn execute(&self, record: &SourceRecord) -> Result<PhaseMetadata, OperationError> {
        let raw_path = self.raw_path(record);
        let content = tokio::fs::read_to_string(&raw_path).await.map_err(|e| {
            OperationError::Processing(format!(
                "cannot read collected content {}: {e}",
                raw_path.display()
            ))
        })?;

        let start = Instant::now();
        let output = self.distiller.distill(record, &content).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let json = serde_json::to_vec_pretty(&output)
            .map_err(|e| OperationError::Processing(format!("unserializable output: {e}")))?;
        let file_name = format!("{}.json", content_key(&record.url));
        write_file(self.layout.distilled_dir().join(&file_name), &json).await?;

        Ok(PhaseMetadata::Distillation(DistillationMetadata {
            output_path: format!("distilled/{file_name}"),
            output_bytes: json.len() as u64,
            item_count: item_count(&output),
            duration_ms,
            provenance: Provenance::Pipeline,
            producer: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollectedContent;
    use tempfile::tempdir;
    use uplift_common::SourceType;

    struct StaticCollector;

    #[async_trait]
    impl Collector for StaticCollector {
        async fn collect(&self, _url: &str) -> Result<CollectedContent, OperationError> {
            Ok(CollectedContent {
                content: "Fabric 1.21 changes".into(),
                status_code: 200,
                content_type: Some("text/html".into()),
                etag: Some("\"abc\"".into()),
                last_modified: None,
            })
        }
    }

    struct EchoDistiller;

    #[async_trait]
    impl Distiller for EchoDistiller {
        async fn distill(
            &self,
            record: &SourceRecord,
            content: &str,
        ) -> Result<serde_json::Value, OperationError> {
            Ok(serde_json::json!({"url": record.url, "summary": content}))
        }
    }

    fn layout(root: &std::path::Path) -> ContentLayout {
        ContentLayout {
            content_dir: root.join("content"),
            package_dir: root.join("package"),
            bundle_dir: root.join("bundle"),
        }
    }

    #[tokio::test]
    async fn test_collect_then_distill_writes_files() {
        let dir = tempdir().unwrap();
        let layout = layout(dir.path());
        let mut record = SourceRecord::discovered("https://fabricmc.net/1.21", SourceType::BlogPost);

        let collect = CollectionOperation::new(Arc::new(StaticCollector), layout.clone());
        let meta = collect.execute(&record).await.unwrap();
        let PhaseMetadata::Collection(ref collection) = meta else {
            panic!("expected collection metadata");
        };
        assert_eq!(collection.content_length, 19);
        assert_eq!(collection.etag.as_deref(), Some("\"abc\""));
        assert!(layout.content_dir.join(&collection.content_path).exists());
        record.metadata.insert(meta);

        let distill = DistillationOperation::new(Arc::new(EchoDistiller), layout.clone());
        let PhaseMetadata::Distillation(distilled) = distill.execute(&record).await.unwrap() else {
            panic!("expected distillation metadata");
        };
        assert_eq!(distilled.item_count, 2);
        let written = std::fs::read_to_string(layout.content_dir.join(&distilled.output_path)).unwrap();
        assert!(written.contains("Fabric 1.21 changes"));
    }

    #[tokio::test]
    async fn test_distill_without_content_is_processing_error() {
        let dir = tempdir().unwrap();
        let record = SourceRecord::discovered("https://missing", SourceType::Other);
        let distill = DistillationOperation::new(Arc::new(EchoDistiller), layout(dir.path()));
        let err = distill.execute(&record).await.unwrap_err();
        assert!(matches!(err, OperationError::Processing(_)));
    }
}
