use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::collaborators::ContentLayout;
use crate::pipeline_config::{CONFIG_FILE, UpliftToml};

/// Runtime configuration for uplift.
///
/// Resolves every on-disk location from the project directory and carries
/// the parsed `uplift.toml` plus CLI overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub uplift_dir: PathBuf,
    pub config_file: PathBuf,
    pub seeds_file: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub legacy_dir: PathBuf,
    pub content_dir: PathBuf,
    pub log_dir: PathBuf,
    pub errors_dir: PathBuf,
    pub package_dir: PathBuf,
    pub bundle_dir: PathBuf,
    pub verbose: bool,
    /// Downgrade blocking errors to warnings for the whole run
    pub force_proceed: bool,
    pub toml: UpliftToml,
}

impl Config {
    /// Resolve paths under `project_dir` and load `.uplift/uplift.toml`.
    ///
    /// The project directory must exist; `.uplift/` need not.
    pub fn new(project_dir: PathBuf, verbose: bool, force_proceed: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let uplift_dir = project_dir.join(".uplift");
        let toml = UpliftToml::load_or_default(&uplift_dir)?;

        let resolve = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                project_dir.join(path)
            }
        };
        let package_dir = resolve(&toml.output.package_dir);
        let bundle_dir = resolve(&toml.output.bundle_dir);

        Ok(Self {
            config_file: uplift_dir.join(CONFIG_FILE),
            seeds_file: uplift_dir.join("seeds.toml"),
            state_file: uplift_dir.join("sources.json"),
            lock_file: uplift_dir.join("sources.lock"),
            legacy_dir: uplift_dir.join("legacy"),
            content_dir: uplift_dir.join("content"),
            log_dir: uplift_dir.join("logs"),
            errors_dir: uplift_dir.join("errors"),
            package_dir,
            bundle_dir,
            uplift_dir,
            project_dir,
            verbose,
            force_proceed,
            toml,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.uplift_dir).context("Failed to create .uplift directory")?;
        std::fs::create_dir_all(self.content_dir.join("raw"))
            .context("Failed to create raw content directory")?;
        std::fs::create_dir_all(self.content_dir.join("distilled"))
            .context("Failed to create distilled content directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(&self.errors_dir).context("Failed to create errors directory")?;
        Ok(())
    }

    /// Where collaborators read and write content.
    pub fn layout(&self) -> ContentLayout {
        ContentLayout {
            content_dir: self.content_dir.clone(),
            package_dir: self.package_dir.clone(),
            bundle_dir: self.bundle_dir.clone(),
        }
    }

    /// Project name from the config file, else the directory name.
    pub fn project_name(&self) -> String {
        self.toml.project.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "uplift".to_string())
        })
    }
}
