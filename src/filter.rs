//! Phase filter: which records a phase should process.
//!
//! Selection is a pure function of the state snapshot, the phase and the
//! caller's criteria. It never mutates state, so invoking a phase again with
//! nothing eligible does no work.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uplift_common::{
    LoaderType, PipelinePhase, Priority, SourceRecord, SourceStatus, SourceType,
};

use crate::registry::PipelineState;

/// Caller-supplied selection criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Also select records that failed in this phase
    #[serde(default)]
    pub resume: bool,
    /// Restrict to these source types (empty = all)
    #[serde(default)]
    pub source_types: Vec<SourceType>,
    /// Restrict to these loaders (empty = all)
    #[serde(default)]
    pub loader_types: Vec<LoaderType>,
    #[serde(default)]
    pub min_priority: Option<Priority>,
    #[serde(default)]
    pub min_relevance: Option<f64>,
    #[serde(default)]
    pub minecraft_version: Option<String>,
    /// Cap on selected records, applied after ordering
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FilterCriteria {
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_source_types(mut self, types: Vec<SourceType>) -> Self {
        self.source_types = types;
        self
    }

    pub fn with_loader_types(mut self, loaders: Vec<LoaderType>) -> Self {
        self.loader_types = loaders;
        self
    }

    pub fn with_min_priority(mut self, priority: Priority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    pub fn with_min_relevance(mut self, relevance: f64) -> Self {
        self.min_relevance = Some(relevance);
        self
    }

    pub fn with_minecraft_version(mut self, version: impl Into<String>) -> Self {
        self.minecraft_version = Some(version.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Caller criteria only; says nothing about status.
    pub fn matches(&self, record: &SourceRecord) -> bool {
        if !self.source_types.is_empty() && !self.source_types.contains(&record.source_type) {
            return false;
        }
        if !self.loader_types.is_empty()
            && !record
                .loader_type
                .is_some_and(|l| self.loader_types.contains(&l))
        {
            return false;
        }
        if let Some(min) = self.min_priority
            && record.priority < min
        {
            return false;
        }
        if let Some(min) = self.min_relevance
            && record.relevance_score < min
        {
            return false;
        }
        if let Some(ref version) = self.minecraft_version
            && record.minecraft_version.as_deref() != Some(version.as_str())
        {
            return false;
        }
        true
    }
}

/// Whether `record`'s status makes it a candidate for `phase`.
///
/// Entry status always qualifies; under resume, records that failed in this
/// same phase qualify too.
pub fn status_eligible(record: &SourceRecord, phase: PipelinePhase, resume: bool) -> bool {
    let Some(entry) = phase.entry_status() else {
        return false;
    };
    if record.status == entry {
        return true;
    }
    resume && record.status == SourceStatus::Failed && record.failed_phase() == Some(phase)
}

/// Outcome of a selection pass.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Eligible records, in processing order
    pub records: Vec<SourceRecord>,
    /// Status-eligible records dropped because an out-of-band producer
    /// already supplied this phase's output
    pub excluded_external: usize,
}

fn processing_order(a: &SourceRecord, b: &SourceRecord) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.url.cmp(&b.url))
}

/// Select the records `phase` should process: priority first, then relevance,
/// then URL.
pub fn select(state: &PipelineState, phase: PipelinePhase, criteria: &FilterCriteria) -> Selection {
    let mut selection = Selection::default();

    for record in state.sources.values() {
        if !status_eligible(record, phase, criteria.resume) || !criteria.matches(record) {
            continue;
        }
        if record.metadata.is_external(phase) {
            selection.excluded_external += 1;
            continue;
        }
        selection.records.push(record.clone());
    }

    selection.records.sort_by(processing_order);
    if let Some(limit) = criteria.limit {
        selection.records.truncate(limit);
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplift_common::{
        DistillationMetadata, ErrorKind, PhaseMetadata, Provenance, SourceError,
    };

    fn rec(url: &str, status: SourceStatus) -> SourceRecord {
        let mut r = SourceRecord::discovered(url, SourceType::Changelog);
        r.status = status;
        r
    }

    fn failed_in(url: &str, phase: PipelinePhase) -> SourceRecord {
        let mut r = rec(url, SourceStatus::Failed);
        r.error = Some(SourceError::new(ErrorKind::Network, "boom", phase));
        r
    }

    fn state_of(records: Vec<SourceRecord>) -> PipelineState {
        let mut state = PipelineState::default();
        for r in records {
            state.sources.insert(r.url.clone(), r);
        }
        state
    }

    fn urls(selection: &Selection) -> Vec<&str> {
        selection.records.iter().map(|r| r.url.as_str()).collect()
    }

    #[test]
    fn test_selects_entry_status_only() {
        let state = state_of(vec![
            rec("https://a", SourceStatus::Discovered),
            rec("https://b", SourceStatus::Collected),
            failed_in("https://c", PipelinePhase::Collection),
        ]);
        let sel = select(&state, PipelinePhase::Collection, &FilterCriteria::default());
        assert_eq!(urls(&sel), vec!["https://a"]);
    }

    #[test]
    fn test_resume_adds_failed_of_same_phase() {
        let state = state_of(vec![
            rec("https://a", SourceStatus::Discovered),
            failed_in("https://c", PipelinePhase::Collection),
            failed_in("https://d", PipelinePhase::Distillation),
        ]);
        let criteria = FilterCriteria::default().with_resume(true);
        let sel = select(&state, PipelinePhase::Collection, &criteria);
        assert_eq!(urls(&sel), vec!["https://a", "https://c"]);

        let sel = select(&state, PipelinePhase::Distillation, &criteria);
        assert_eq!(urls(&sel), vec!["https://d"]);
    }

    #[test]
    fn test_external_provenance_excluded() {
        let mut external = rec("https://ext", SourceStatus::Collected);
        external
            .metadata
            .insert(PhaseMetadata::Distillation(DistillationMetadata {
                provenance: Provenance::External,
                ..Default::default()
            }));
        let state = state_of(vec![external, rec("https://own", SourceStatus::Collected)]);
        let sel = select(&state, PipelinePhase::Distillation, &FilterCriteria::default());
        assert_eq!(urls(&sel), vec!["https://own"]);
        assert_eq!(sel.excluded_external, 1);
    }

    #[test]
    fn test_caller_criteria_applied() {
        let fabric = rec("https://f", SourceStatus::Discovered)
            .with_loader(LoaderType::Fabric)
            .with_priority(Priority::High)
            .with_relevance(0.9)
            .with_minecraft_version("1.21");
        let forge = rec("https://g", SourceStatus::Discovered)
            .with_loader(LoaderType::Forge)
            .with_priority(Priority::Low)
            .with_relevance(0.2);
        let state = state_of(vec![fabric, forge]);

        let by_loader = FilterCriteria::default().with_loader_types(vec![LoaderType::Fabric]);
        assert_eq!(
            urls(&select(&state, PipelinePhase::Collection, &by_loader)),
            vec!["https://f"]
        );

        let by_priority = FilterCriteria::default().with_min_priority(Priority::Medium);
        assert_eq!(
            urls(&select(&state, PipelinePhase::Collection, &by_priority)),
            vec!["https://f"]
        );

        let by_relevance = FilterCriteria::default().with_min_relevance(0.5);
        assert_eq!(
            urls(&select(&state, PipelinePhase::Collection, &by_relevance)),
            vec!["https://f"]
        );

        let by_version = FilterCriteria::default().with_minecraft_version("1.20.6");
        assert!(select(&state, PipelinePhase::Collection, &by_version)
            .records
            .is_empty());

        let by_type = FilterCriteria::default().with_source_types(vec![SourceType::RssFeed]);
        assert!(select(&state, PipelinePhase::Collection, &by_type)
            .records
            .is_empty());
    }

    #[test]
    fn test_ordering_and_limit() {
        let state = state_of(vec![
            rec("https://b", SourceStatus::Discovered).with_relevance(0.5),
            rec("https://a", SourceStatus::Discovered).with_relevance(0.5),
            rec("https://c", SourceStatus::Discovered).with_relevance(0.9),
            rec("https://z", SourceStatus::Discovered).with_priority(Priority::Critical),
        ]);
        let sel = select(&state, PipelinePhase::Collection, &FilterCriteria::default());
        assert_eq!(
            urls(&sel),
            vec!["https://z", "https://c", "https://a", "https://b"]
        );

        let limited = select(
            &state,
            PipelinePhase::Collection,
            &FilterCriteria::default().with_limit(2),
        );
        assert_eq!(urls(&limited), vec!["https://z", "https://c"]);
    }

    #[test]
    fn test_select_does_not_mutate_state() {
        let state = state_of(vec![rec("https://a", SourceStatus::Discovered)]);
        let before = serde_json::to_string(&state).unwrap();
        let _ = select(&state, PipelinePhase::Collection, &FilterCriteria::default());
        assert_eq!(serde_json::to_string(&state).unwrap(), before);
    }

    #[test]
    fn test_discovery_selects_nothing() {
        let state = state_of(vec![rec("https://a", SourceStatus::Discovered)]);
        assert!(select(&state, PipelinePhase::Discovery, &FilterCriteria::default())
            .records
            .is_empty());
    }
}
