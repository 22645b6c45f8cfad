//! Phase-specific metadata attached to source records.
//!
//! Each phase contributes one payload, tagged with the phase that produced it.
//! A record holds at most one payload per phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::phase::PipelinePhase;

/// Who produced a metadata payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Produced by this pipeline's own phase executor.
    #[default]
    Pipeline,
    /// Produced out of band (imported, hand-curated, another tool).
    External,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscoveryMetadata {
    /// Name of the discoverer that found the source
    pub discovered_by: String,
    /// Feed, index or listing page the source was found on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Size of the stored body in bytes
    pub content_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// SHA-256 of the stored body, hex encoded
    #[serde(default)]
    pub content_hash: String,
    /// Path of the stored body, relative to the content directory
    #[serde(default)]
    pub content_path: String,
    #[serde(default)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DistillationMetadata {
    /// Path of the structured output, relative to the content directory
    #[serde(default)]
    pub output_path: String,
    #[serde(default)]
    pub output_bytes: u64,
    /// Number of top-level entries in the structured output
    #[serde(default)]
    pub item_count: usize,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub provenance: Provenance,
    /// Name of the out-of-band producer when `provenance` is external
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackagingMetadata {
    pub package_path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BundlingMetadata {
    pub bundle_path: String,
    pub bundle_id: String,
}

/// A metadata payload, discriminated by the phase that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseMetadata {
    Discovery(DiscoveryMetadata),
    Collection(CollectionMetadata),
    Distillation(DistillationMetadata),
    Packaging(PackagingMetadata),
    Bundling(BundlingMetadata),
}

impl PhaseMetadata {
    pub fn phase(&self) -> PipelinePhase {
        match self {
            PhaseMetadata::Discovery(_) => PipelinePhase::Discovery,
            PhaseMetadata::Collection(_) => PipelinePhase::Collection,
            PhaseMetadata::Distillation(_) => PipelinePhase::Distillation,
            PhaseMetadata::Packaging(_) => PipelinePhase::Packaging,
            PhaseMetadata::Bundling(_) => PipelinePhase::Bundling,
        }
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            PhaseMetadata::Collection(m) => m.provenance,
            PhaseMetadata::Distillation(m) => m.provenance,
            _ => Provenance::Pipeline,
        }
    }

    pub fn is_external(&self) -> bool {
        self.provenance() == Provenance::External
    }
}

/// Metadata payloads of one record, at most one per phase.
///
/// Serialized as a list of tagged payloads; a list naming the same phase twice
/// is rejected when deserializing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<PhaseMetadata>", into = "Vec<PhaseMetadata>")]
pub struct PhaseMetadataSet(BTreeMap<PipelinePhase, PhaseMetadata>);

impl PhaseMetadataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, phase: PipelinePhase) -> Option<&PhaseMetadata> {
        self.0.get(&phase)
    }

    /// Insert a payload, replacing any earlier payload for the same phase.
    pub fn insert(&mut self, metadata: PhaseMetadata) -> Option<PhaseMetadata> {
        self.0.insert(metadata.phase(), metadata)
    }

    /// The payload for `phase` came from an out-of-band producer.
    pub fn is_external(&self, phase: PipelinePhase) -> bool {
        self.get(phase).is_some_and(PhaseMetadata::is_external)
    }

    pub fn collection(&self) -> Option<&CollectionMetadata> {
        match self.get(PipelinePhase::Collection) {
            Some(PhaseMetadata::Collection(m)) => Some(m),
            _ => None,
        }
    }

    pub fn distillation(&self) -> Option<&DistillationMetadata> {
        match self.get(PipelinePhase::Distillation) {
            Some(PhaseMetadata::Distillation(m)) => Some(m),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhaseMetadata> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<PhaseMetadata>> for PhaseMetadataSet {
    type Error = String;

    fn try_from(items: Vec<PhaseMetadata>) -> Result<Self, Self::Error> {
        let mut set = BTreeMap::new();
        for item in items {
            let phase = item.phase();
            if set.insert(phase, item).is_some() {
                return Err(format!("duplicate metadata for phase '{}'", phase));
            }
        }
        Ok(Self(set))
    }
}

impl From<PhaseMetadataSet> for Vec<PhaseMetadata> {
    fn from(set: PhaseMetadataSet) -> Self {
        set.0.into_values().collect()
    }
}
