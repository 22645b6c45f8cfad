//! Integration tests for the uplift CLI
//!
//! These tests drive the binary against temporary project directories. None
//! of them needs network access beyond a refused localhost connection.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create an uplift Command with a clean environment
fn uplift() -> Command {
    let mut cmd = cargo_bin_cmd!("uplift");
    cmd.env_remove("UPLIFT_DISTILL_CMD")
        .env_remove("UPLIFT_USER_AGENT")
        .env_remove("RUST_LOG");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn write_seeds(dir: &TempDir, seeds: &str) {
    fs::create_dir_all(dir.path().join(".uplift")).unwrap();
    fs::write(dir.path().join(".uplift/seeds.toml"), seeds).unwrap();
}

fn write_config(dir: &TempDir, config: &str) {
    fs::create_dir_all(dir.path().join(".uplift")).unwrap();
    fs::write(dir.path().join(".uplift/uplift.toml"), config).unwrap();
}

fn status_json(dir: &TempDir) -> serde_json::Value {
    let output = uplift()
        .current_dir(dir.path())
        .args(["status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

const TWO_SEEDS: &str = r#"
[[sources]]
url = "https://fabricmc.net/2024/05/31/121.html"
type = "blog"
loader = "fabric"
priority = "high"

[[sources]]
url = "https://docs.neoforged.net/docs/gettingstarted"
type = "documentation"
loader = "neoforge"
"#;

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_uplift_help() {
        uplift()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("discover"))
            .stdout(predicate::str::contains("--force-proceed"));
    }

    #[test]
    fn test_uplift_version() {
        uplift().arg("--version").assert().success();
    }

    #[test]
    fn test_status_on_fresh_project() {
        let dir = create_temp_project();

        uplift()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No sources tracked yet"));
    }

    #[test]
    fn test_status_json_on_fresh_project() {
        let dir = create_temp_project();
        let status = status_json(&dir);
        assert_eq!(status["total_sources"], 0);
        assert_eq!(status["failed"], serde_json::json!([]));
    }

    #[test]
    fn test_unknown_filter_value_rejected() {
        let dir = create_temp_project();
        uplift()
            .current_dir(dir.path())
            .args(["collect", "--loader", "bukkit"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("bukkit"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        uplift()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No uplift.toml found"))
            .stdout(predicate::str::contains("max_attempts = 3"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();

        uplift()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created uplift.toml"));

        let content = fs::read_to_string(dir.path().join(".uplift/uplift.toml")).unwrap();
        assert!(content.contains("[collection]"));

        uplift()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_flags_problems() {
        let dir = create_temp_project();
        write_config(
            &dir,
            "[collection]\nmax_concurrency = 0\n\n[validation.max_failure_ratio]\ncollection = 1.5\n",
        );

        uplift()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_concurrency is 0"))
            .stdout(predicate::str::contains("must be within 0.0..=1.0"))
            .stdout(predicate::str::contains("no command configured"));
    }

    #[test]
    fn test_config_validate_clean() {
        let dir = create_temp_project();
        write_config(&dir, "[distillation]\ncommand = \"distill\"\n");

        uplift()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_env_distill_command_shown() {
        let dir = create_temp_project();

        uplift()
            .current_dir(dir.path())
            .env("UPLIFT_DISTILL_CMD", "my-distiller")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"my-distiller\""));
    }
}

// =============================================================================
// Pipeline Commands
// =============================================================================

mod pipeline {
    use super::*;

    #[test]
    fn test_discover_adds_seeds_to_registry() {
        let dir = create_temp_project();
        write_seeds(&dir, TWO_SEEDS);

        uplift()
            .current_dir(dir.path())
            .arg("discover")
            .assert()
            .success()
            .stdout(predicate::str::contains("discovery"));

        assert!(dir.path().join(".uplift/sources.json").exists());
        let status = status_json(&dir);
        assert_eq!(status["total_sources"], 2);
        assert_eq!(status["phase_counts"]["discovered"], 2);

        // Discovery is additive: running it again adds nothing.
        uplift().current_dir(dir.path()).arg("discover").assert().success();
        assert_eq!(status_json(&dir)["total_sources"], 2);
    }

    #[test]
    fn test_skip_discovery_on_empty_registry_fails() {
        let dir = create_temp_project();
        write_config(&dir, "[distillation]\ncommand = \"true\"\n");

        uplift()
            .current_dir(dir.path())
            .args(["run", "--skip-discovery"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cannot skip discovery"));
    }

    #[test]
    fn test_distill_without_command_fails() {
        let dir = create_temp_project();

        uplift()
            .current_dir(dir.path())
            .arg("distill")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No distill command configured"));
    }

    #[test]
    fn test_collection_failure_is_blocking() {
        let dir = create_temp_project();
        write_config(
            &dir,
            "[collection]\nmax_attempts = 1\nbase_delay_ms = 1\ntimeout_secs = 5\n",
        );
        write_seeds(&dir, "[[sources]]\nurl = \"http://127.0.0.1:9/changelog\"\n");

        uplift().current_dir(dir.path()).arg("discover").assert().success();

        uplift()
            .current_dir(dir.path())
            .arg("collect")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Blocking error in collection phase"))
            .stderr(predicate::str::contains("http://127.0.0.1:9/changelog"));

        let report = dir.path().join(".uplift/errors/blocking-collection.json");
        assert!(report.exists());
        let status = status_json(&dir);
        assert_eq!(status["phase_counts"]["failed"], 1);
        assert_eq!(status["failed"][0]["phase"], "collection");

        // Forcing past the gate succeeds and records the override.
        uplift()
            .current_dir(dir.path())
            .args(["collect", "--resume", "--force-proceed"])
            .assert()
            .success()
            .stdout(predicate::str::contains("forced"));
    }

    #[test]
    fn test_package_with_nothing_distilled_succeeds() {
        let dir = create_temp_project();

        uplift()
            .current_dir(dir.path())
            .arg("package")
            .assert()
            .success()
            .stdout(predicate::str::contains("no records were eligible"));
    }
}

// =============================================================================
// Migration
// =============================================================================

mod migration {
    use super::*;

    #[test]
    fn test_migrate_imports_legacy_files() {
        let dir = create_temp_project();
        let legacy = dir.path().join(".uplift/legacy");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(
            legacy.join("discovered-sources.json"),
            r#"[{"url": "https://fabricmc.net/old"}, {"url": "https://neoforged.net/old"}]"#,
        )
        .unwrap();

        uplift()
            .current_dir(dir.path())
            .arg("migrate")
            .assert()
            .success()
            .stdout(predicate::str::contains("2 imported"));

        assert_eq!(status_json(&dir)["total_sources"], 2);

        uplift()
            .current_dir(dir.path())
            .arg("migrate")
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to migrate"));
    }
}
