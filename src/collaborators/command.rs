//! Distillation through an external command.
//!
//! The command receives one JSON request on stdin and must print a JSON
//! object on stdout. Leading or trailing chatter around the object is
//! tolerated.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;
use uplift_common::{LoaderType, SourceRecord, SourceType};

use super::Distiller;
use crate::errors::OperationError;
use crate::util::extract_json_object;

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 500;

#[derive(Debug, Serialize)]
struct DistillRequest<'a> {
    url: &'a str,
    source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    loader_type: Option<LoaderType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    minecraft_version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    content: &'a str,
}

pub struct CommandDistiller {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandDistiller {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    fn parse_output(stdout: &str) -> Result<serde_json::Value, OperationError> {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(stdout.trim()) {
            return Ok(value);
        }
        let object = extract_json_object(stdout).ok_or_else(|| {
            OperationError::Processing("distiller printed no JSON object".to_string())
        })?;
        serde_json::from_str(&object)
            .map_err(|e| OperationError::Processing(format!("distiller printed invalid JSON: {e}")))
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(STDERR_EXCERPT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl Distiller for CommandDistiller {
    async fn distill(
        &self,
        record: &SourceRecord,
        content: &str,
    ) -> Result<serde_json::Value, OperationError> {
        let request = DistillRequest {
            url: &record.url,
            source_type: record.source_type,
            loader_type: record.loader_type,
            minecraft_version: record.minecraft_version.as_deref(),
            title: record.title.as_deref(),
            content,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| OperationError::Processing(format!("cannot encode request: {e}")))?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(url = %record.url, command = %self.command, "Spawning distiller");
        let mut child = cmd.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        // Drain stderr concurrently so a chatty distiller cannot block on a full pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout).await?;
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(OperationError::Processing(format!(
                "distiller exited with {}: {}",
                status.code().map_or_else(|| "signal".to_string(), |c| c.to_string()),
                excerpt(&stderr)
            )));
        }

        Self::parse_output(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SourceRecord {
        SourceRecord::discovered("https://neoforged.net/news/21.0", SourceType::BlogPost)
            .with_loader(LoaderType::NeoForge)
    }

    #[test]
    fn test_parse_output_accepts_surrounding_text() {
        let value = CommandDistiller::parse_output("Loading model...\n{\"changes\": []}\ndone").unwrap();
        assert_eq!(value["changes"], serde_json::json!([]));
    }

    #[test]
    fn test_parse_output_accepts_bare_array() {
        let value = CommandDistiller::parse_output("[1, 2, 3]\n").unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_parse_output_without_json_fails() {
        assert!(matches!(
            CommandDistiller::parse_output("nothing useful"),
            Err(OperationError::Processing(_))
        ));
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(STDERR_EXCERPT + 10);
        assert!(excerpt(&long).ends_with("..."));
        assert_eq!(excerpt("  short \n"), "short");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_distill_pipes_request_through_command() {
        let distiller = CommandDistiller::new(
            "sh",
            vec!["-c".into(), "cat; echo".into()],
        );
        let value = distiller.distill(&record(), "API changes").await.unwrap();
        assert_eq!(value["url"], "https://neoforged.net/news/21.0");
        assert_eq!(value["loader_type"], "neoforge");
        assert_eq!(value["content"], "API changes");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_processing_error() {
        let distiller = CommandDistiller::new(
            "sh",
            vec!["-c".into(), "cat >/dev/null; echo 'rate limited' >&2; exit 3".into()],
        );
        let err = distiller.distill(&record(), "x").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exited with 3"));
        assert!(message.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_missing_command_is_io_error() {
        let distiller = CommandDistiller::new("uplift-no-such-distiller", Vec::new());
        let err = distiller.distill(&record(), "x").await.unwrap_err();
        assert!(matches!(err, OperationError::Io(_)));
    }
}
