//! Per-record status machine.
//!
//! Records move forward along
//! `discovered → collecting → collected → distilling → distilled → packaged → bundled`.
//! `failed` is entered only from an in-flight status and left only by a resume
//! of the phase that failed.

use serde::{Deserialize, Serialize};

use crate::phase::{ParseNameError, PipelinePhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Discovered,
    Collecting,
    Collected,
    Distilling,
    Distilled,
    Packaged,
    Bundled,
    Failed,
}

impl SourceStatus {
    /// Every status, in chain order with `Failed` last.
    pub const ALL: [SourceStatus; 8] = [
        SourceStatus::Discovered,
        SourceStatus::Collecting,
        SourceStatus::Collected,
        SourceStatus::Distilling,
        SourceStatus::Distilled,
        SourceStatus::Packaged,
        SourceStatus::Bundled,
        SourceStatus::Failed,
    ];

    /// Position on the forward chain. `Failed` is off-chain.
    pub fn rank(self) -> Option<u8> {
        match self {
            SourceStatus::Discovered => Some(0),
            SourceStatus::Collecting => Some(1),
            SourceStatus::Collected => Some(2),
            SourceStatus::Distilling => Some(3),
            SourceStatus::Distilled => Some(4),
            SourceStatus::Packaged => Some(5),
            SourceStatus::Bundled => Some(6),
            SourceStatus::Failed => None,
        }
    }

    /// A phase is actively working on the record.
    pub fn is_in_flight(self) -> bool {
        matches!(self, SourceStatus::Collecting | SourceStatus::Distilling)
    }

    /// The record made it through the last per-record phase.
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            SourceStatus::Distilled | SourceStatus::Packaged | SourceStatus::Bundled
        )
    }

    /// `self` sits at or past `other` on the forward chain.
    pub fn is_at_or_beyond(self, other: SourceStatus) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// Whether a record may move from `self` to `next`.
    ///
    /// `failed_phase` is the phase recorded on the record's error and decides
    /// where a failed record may resume.
    pub fn can_transition_to(self, next: SourceStatus, failed_phase: Option<PipelinePhase>) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (from, SourceStatus::Failed) => from.is_in_flight(),
            (SourceStatus::Failed, to) => match failed_phase {
                Some(phase) => {
                    Some(to) == phase.entry_status() || Some(to) == phase.in_progress_status()
                }
                None => false,
            },
            (from, to) => match (from.rank(), to.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Discovered => "discovered",
            SourceStatus::Collecting => "collecting",
            SourceStatus::Collected => "collected",
            SourceStatus::Distilling => "distilling",
            SourceStatus::Distilled => "distilled",
            SourceStatus::Packaged => "packaged",
            SourceStatus::Bundled => "bundled",
            SourceStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseNameError {
                kind: "status",
                value: s.to_string(),
                valid: "discovered, collecting, collected, distilling, distilled, packaged, bundled, failed",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(SourceStatus::Discovered.can_transition_to(SourceStatus::Collecting, None));
        assert!(SourceStatus::Collecting.can_transition_to(SourceStatus::Collected, None));
        assert!(SourceStatus::Collected.can_transition_to(SourceStatus::Distilled, None));
        assert!(SourceStatus::Packaged.can_transition_to(SourceStatus::Bundled, None));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(!SourceStatus::Collected.can_transition_to(SourceStatus::Discovered, None));
        assert!(!SourceStatus::Bundled.can_transition_to(SourceStatus::Packaged, None));
        assert!(!SourceStatus::Distilling.can_transition_to(SourceStatus::Collecting, None));
    }

    #[test]
    fn test_failed_only_from_in_flight() {
        for status in SourceStatus::ALL {
            let allowed = status.can_transition_to(SourceStatus::Failed, None);
            assert_eq!(
                allowed,
                status.is_in_flight() || status == SourceStatus::Failed,
                "unexpected result for {status}"
            );
        }
    }

    #[test]
    fn test_failed_resumes_only_into_its_phase() {
        let collection = Some(PipelinePhase::Collection);
        assert!(SourceStatus::Failed.can_transition_to(SourceStatus::Collecting, collection));
        assert!(SourceStatus::Failed.can_transition_to(SourceStatus::Discovered, collection));
        assert!(!SourceStatus::Failed.can_transition_to(SourceStatus::Distilling, collection));
        assert!(!SourceStatus::Failed.can_transition_to(SourceStatus::Collected, collection));

        let distillation = Some(PipelinePhase::Distillation);
        assert!(SourceStatus::Failed.can_transition_to(SourceStatus::Distilling, distillation));
        assert!(!SourceStatus::Failed.can_transition_to(SourceStatus::Collecting, distillation));

        assert!(!SourceStatus::Failed.can_transition_to(SourceStatus::Collecting, None));
    }

    #[test]
    fn test_at_or_beyond_ignores_failed() {
        assert!(SourceStatus::Distilled.is_at_or_beyond(SourceStatus::Collected));
        assert!(SourceStatus::Collected.is_at_or_beyond(SourceStatus::Collected));
        assert!(!SourceStatus::Failed.is_at_or_beyond(SourceStatus::Discovered));
        assert!(!SourceStatus::Discovered.is_at_or_beyond(SourceStatus::Failed));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in SourceStatus::ALL {
            assert_eq!(status.as_str().parse::<SourceStatus>().unwrap(), status);
        }
        assert!("pending".parse::<SourceStatus>().is_err());
    }
}
