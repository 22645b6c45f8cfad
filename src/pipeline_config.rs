//! Pipeline configuration read from `.uplift/uplift.toml`.
//!
//! Every field is optional in the file and falls back to a default.
//! Settings are layered file → environment → CLI; the environment layer
//! is applied by the accessors here, the CLI layer by [`crate::config::Config`].
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "fabric-1.21-notes"
//! user_agent = "uplift/0.1 (+https://example.com/bot)"
//!
//! [collection]
//! max_attempts = 3
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! timeout_secs = 30
//! max_concurrency = 4
//!
//! [distillation]
//! command = "distill-tool"
//! args = ["--format", "json"]
//! max_concurrency = 1
//! timeout_secs = 120
//!
//! [validation.max_failure_ratio]
//! collection = 0.1
//!
//! [output]
//! package_dir = "dist/package"
//! bundle_dir = "dist/bundle"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uplift_common::PipelinePhase;

use crate::gates::ValidationGate;
use crate::retry::{PhaseExecutor, RetryPolicy};

pub const CONFIG_FILE: &str = "uplift.toml";
pub const ENV_DISTILL_CMD: &str = "UPLIFT_DISTILL_CMD";
pub const ENV_USER_AGENT: &str = "UPLIFT_USER_AGENT";

/// Project-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (optional, defaults to directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// User-Agent sent by the HTTP collector
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_max_attempts() -> u32 {
    crate::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    crate::retry::DEFAULT_BASE_DELAY.as_millis() as u64
}

fn default_collection_timeout_secs() -> u64 {
    30
}

fn default_collection_concurrency() -> usize {
    4
}

fn default_distillation_timeout_secs() -> u64 {
    120
}

fn default_distillation_concurrency() -> usize {
    1
}

/// Retry and concurrency settings resolved for one per-record phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: Option<u64>,
    pub timeout_secs: u64,
    pub max_concurrency: usize,
}

impl ExecutionSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms));
        match self.max_delay_ms {
            Some(ms) => policy.with_max_delay(Duration::from_millis(ms)),
            None => policy,
        }
    }

    pub fn executor(&self) -> PhaseExecutor {
        PhaseExecutor::new(
            self.retry_policy(),
            Duration::from_secs(self.timeout_secs),
            self.max_concurrency,
        )
    }

    fn warnings(&self, section: &str) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_attempts == 0 {
            warnings.push(format!(
                "[{section}] max_attempts is 0: every record is attempted once"
            ));
        }
        if self.max_concurrency == 0 {
            warnings.push(format!(
                "[{section}] max_concurrency is 0: records are processed one at a time"
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push(format!(
                "[{section}] timeout_secs is 0: every attempt times out immediately"
            ));
        }
        if let Some(max) = self.max_delay_ms
            && max < self.base_delay_ms
        {
            warnings.push(format!(
                "[{section}] max_delay_ms ({max}) is below base_delay_ms ({})",
                self.base_delay_ms
            ));
        }
        warnings
    }
}

/// `[collection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    /// Per-attempt timeout
    #[serde(default = "default_collection_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_collection_concurrency")]
    pub max_concurrency: usize,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
            timeout_secs: default_collection_timeout_secs(),
            max_concurrency: default_collection_concurrency(),
        }
    }
}

impl CollectionSection {
    pub fn execution(&self) -> ExecutionSettings {
        ExecutionSettings {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            timeout_secs: self.timeout_secs,
            max_concurrency: self.max_concurrency,
        }
    }
}

/// `[distillation]` section. The distillation service rate-limits, hence
/// the single-slot default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillationSection {
    /// External command that turns raw content into structured JSON
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default = "default_distillation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_distillation_concurrency")]
    pub max_concurrency: usize,
}

impl Default for DistillationSection {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
            timeout_secs: default_distillation_timeout_secs(),
            max_concurrency: default_distillation_concurrency(),
        }
    }
}

impl DistillationSection {
    pub fn execution(&self) -> ExecutionSettings {
        ExecutionSettings {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            timeout_secs: self.timeout_secs,
            max_concurrency: self.max_concurrency,
        }
    }
}

/// `[validation]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSection {
    /// Tolerated failed/considered ratio per phase; unlisted phases tolerate none
    #[serde(default)]
    pub max_failure_ratio: BTreeMap<PipelinePhase, f64>,
}

fn default_package_dir() -> PathBuf {
    PathBuf::from("dist/package")
}

fn default_bundle_dir() -> PathBuf {
    PathBuf::from("dist/bundle")
}

/// `[output]` section. Relative paths resolve against the project directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_package_dir")]
    pub package_dir: PathBuf,
    #[serde(default = "default_bundle_dir")]
    pub bundle_dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            package_dir: default_package_dir(),
            bundle_dir: default_bundle_dir(),
        }
    }
}

/// Contents of `uplift.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpliftToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub collection: CollectionSection,
    #[serde(default)]
    pub distillation: DistillationSection,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub output: OutputSection,
}

impl UpliftToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse uplift.toml")
    }

    /// Load `<uplift_dir>/uplift.toml`, or defaults when the file does not exist.
    pub fn load_or_default(uplift_dir: &Path) -> Result<Self> {
        let config_path = uplift_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize uplift.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Distillation command (env → file).
    pub fn distill_command(&self) -> Option<String> {
        std::env::var(ENV_DISTILL_CMD)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.distillation.command.clone())
    }

    /// HTTP User-Agent (env → file → default).
    pub fn user_agent(&self) -> String {
        std::env::var(ENV_USER_AGENT)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.project.user_agent.clone())
            .unwrap_or_else(|| format!("uplift/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Validation gate with the configured per-phase tolerances.
    pub fn gate(&self) -> ValidationGate {
        self.validation
            .max_failure_ratio
            .iter()
            .fold(ValidationGate::new(), |gate, (phase, ratio)| {
                gate.with_threshold(*phase, *ratio)
            })
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        warnings.extend(self.collection.execution().warnings("collection"));
        warnings.extend(self.distillation.execution().warnings("distillation"));

        for (phase, ratio) in &self.validation.max_failure_ratio {
            if !(0.0..=1.0).contains(ratio) {
                warnings.push(format!(
                    "[validation] max_failure_ratio for {phase} is {ratio}: must be within 0.0..=1.0"
                ));
            }
        }

        if self.distill_command().is_none() {
            warnings.push(format!(
                "[distillation] no command configured (set `command` or {ENV_DISTILL_CMD}); distillation cannot run"
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = UpliftToml::parse("").unwrap();
        assert_eq!(toml.collection.max_attempts, 3);
        assert_eq!(toml.collection.base_delay_ms, 1000);
        assert_eq!(toml.collection.max_concurrency, 4);
        assert_eq!(toml.distillation.max_concurrency, 1);
        assert!(toml.validation.max_failure_ratio.is_empty());
        assert_eq!(toml.output.package_dir, PathBuf::from("dist/package"));
    }

    #[test]
    fn test_parse_sections() {
        let content = r#"
[project]
name = "neoforge-notes"

[collection]
max_attempts = 5
max_delay_ms = 8000

[distillation]
command = "distill"
args = ["--json"]

[validation.max_failure_ratio]
collection = 0.2
"#;
        let toml = UpliftToml::parse(content).unwrap();
        assert_eq!(toml.project.name.as_deref(), Some("neoforge-notes"));
        assert_eq!(toml.collection.max_attempts, 5);
        assert_eq!(toml.collection.max_concurrency, 4);
        assert_eq!(toml.distillation.args, vec!["--json".to_string()]);
        assert_eq!(
            toml.validation.max_failure_ratio[&PipelinePhase::Collection],
            0.2
        );

        let policy = toml.collection.execution().retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.max_delay, Some(Duration::from_millis(8000)));
    }

    #[test]
    fn test_gate_uses_configured_thresholds() {
        let toml = UpliftToml::parse("[validation.max_failure_ratio]\ndistillation = 0.5\n").unwrap();
        let gate = toml.gate();
        assert_eq!(gate.threshold(PipelinePhase::Distillation), 0.5);
        assert_eq!(gate.threshold(PipelinePhase::Collection), 0.0);
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let content = r#"
[collection]
max_attempts = 0
max_concurrency = 0

[distillation]
command = "distill"

[validation.max_failure_ratio]
bundling = 1.5
"#;
        let warnings = UpliftToml::parse(content).unwrap().validate();
        assert!(warnings.iter().any(|w| w.contains("max_attempts is 0")));
        assert!(warnings.iter().any(|w| w.contains("max_concurrency is 0")));
        assert!(warnings.iter().any(|w| w.contains("bundling")));
    }

    #[test]
    fn test_unknown_phase_key_rejected() {
        assert!(UpliftToml::parse("[validation.max_failure_ratio]\npublishing = 0.1\n").is_err());
    }

    #[test]
    fn test_load_or_default_and_save() {
        let dir = tempdir().unwrap();
        let toml = UpliftToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.collection.timeout_secs, 30);

        let mut toml = UpliftToml::default();
        toml.project.name = Some("quilt".into());
        toml.collection.max_concurrency = 8;
        toml.save(&dir.path().join(CONFIG_FILE)).unwrap();

        let loaded = UpliftToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.project.name.as_deref(), Some("quilt"));
        assert_eq!(loaded.collection.max_concurrency, 8);
    }
}
