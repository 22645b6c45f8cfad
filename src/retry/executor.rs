//! Per-record phase execution with retries, timeouts and bounded concurrency.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uplift_common::{
    ErrorKind, PhaseMetadata, PipelinePhase, SourceError, SourcePatch, SourceRecord,
};

use super::RetryPolicy;
use crate::errors::OperationError;
use crate::registry::SourceUpdater;
use crate::stats::{ExecutionTimer, FailedItem, PhaseReport};

/// The external work a per-record phase performs on one record.
#[async_trait]
pub trait RecordOperation: Send + Sync {
    /// One attempt. The executor handles timeouts and retries.
    async fn execute(&self, record: &SourceRecord) -> Result<PhaseMetadata, OperationError>;
}

/// Runs a [`RecordOperation`] over a batch of records.
#[derive(Debug, Clone)]
pub struct PhaseExecutor {
    pub policy: RetryPolicy,
    /// Budget for a single attempt
    pub attempt_timeout: Duration,
    pub max_concurrency: usize,
}

impl PhaseExecutor {
    pub fn new(policy: RetryPolicy, attempt_timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            policy,
            attempt_timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Process `records` in the given order, at most `max_concurrency` at a
    /// time. Per-record failures are aggregated into the report, never
    /// returned as an error.
    pub async fn run(
        &self,
        phase: PipelinePhase,
        records: Vec<SourceRecord>,
        updater: &SourceUpdater,
        operation: Arc<dyn RecordOperation>,
    ) -> PhaseReport {
        let timer = ExecutionTimer::start();
        let mut report = PhaseReport::new(phase);
        report.considered = records.len();

        if records.is_empty() {
            debug!(phase = %phase, "No eligible records");
            return report;
        }

        info!(
            phase = %phase,
            records = records.len(),
            max_concurrency = self.max_concurrency,
            "Executing phase"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for record in records {
            // Acquire before spawning so records start in filter order.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(phase = %phase, error = %e, "Concurrency limiter closed");
                    report.failed.push(FailedItem {
                        id: record.url.clone(),
                        message: format!("not started: {e}"),
                    });
                    continue;
                }
            };

            let attempts = Arc::new(AtomicU32::new(0));
            let attempt = RecordAttempt {
                phase,
                policy: self.policy,
                attempt_timeout: self.attempt_timeout,
                updater: updater.clone(),
                operation: Arc::clone(&operation),
                attempts: Arc::clone(&attempts),
            };
            let task_updater = updater.clone();

            tasks.spawn(async move {
                let url = record.url.clone();
                let outcome = match AssertUnwindSafe(attempt.process(record))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let message = "operation panicked".to_string();
                        error!(url = %url, phase = %phase, "Record operation panicked");
                        abandon(
                            &task_updater,
                            &url,
                            phase,
                            attempts.load(Ordering::SeqCst),
                            &message,
                        );
                        Err(message)
                    }
                };
                drop(permit);
                (url, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((url, Ok(()))) => report.succeeded.push(url),
                Ok((url, Err(message))) => report.failed.push(FailedItem { id: url, message }),
                Err(e) => error!(phase = %phase, error = %e, "Record task aborted"),
            }
        }

        report.succeeded.sort();
        report.failed.sort_by(|a, b| a.id.cmp(&b.id));
        report.duration = timer.elapsed();

        info!(
            phase = %phase,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Phase execution finished"
        );
        report
    }
}

/// Everything a spawned task needs to drive one record.
struct RecordAttempt {
    phase: PipelinePhase,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    updater: SourceUpdater,
    operation: Arc<dyn RecordOperation>,
    /// Attempts started so far, readable after a panic
    attempts: Arc<AtomicU32>,
}

/// Move a record stuck in its in-flight status to `failed` so a resume of
/// `phase` selects it again. Records outside an in-flight status are left
/// alone.
fn abandon(updater: &SourceUpdater, url: &str, phase: PipelinePhase, attempt: u32, message: &str) {
    let in_flight = match updater.get(url) {
        Ok(Some(record)) => record.status.is_in_flight(),
        Ok(None) => false,
        Err(e) => {
            error!(url = %url, phase = %phase, error = %e, "Could not read record state");
            return;
        }
    };
    if !in_flight {
        return;
    }
    let error = SourceError::new(ErrorKind::Processing, message, phase).with_retry_count(attempt);
    if let Err(e) = updater.update_source(url, SourcePatch::failed(error)) {
        error!(url = %url, phase = %phase, error = %e, "Could not mark record failed");
    }
}

impl RecordAttempt {
    async fn process(self, record: SourceRecord) -> Result<(), String> {
        let url = record.url.clone();
        let in_progress = self.phase.in_progress_status();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.attempts.store(attempt, Ordering::SeqCst);
            if let Some(status) = in_progress {
                self.updater
                    .update_source(&url, SourcePatch::status(status))
                    .map_err(|e| e.to_string())?;
            }

            let result =
                match tokio::time::timeout(self.attempt_timeout, self.operation.execute(&record))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(OperationError::Timeout(self.attempt_timeout)),
                };

            match result {
                Ok(metadata) => {
                    if let Err(e) = self
                        .updater
                        .update_source(&url, SourcePatch::completed(self.phase, Some(metadata)))
                    {
                        let message = format!("result rejected: {e}");
                        warn!(
                            url = %url,
                            phase = %self.phase,
                            attempt,
                            error = %e,
                            "Could not record result"
                        );
                        abandon(&self.updater, &url, self.phase, attempt, &message);
                        return Err(message);
                    }
                    debug!(url = %url, phase = %self.phase, attempt, "Record completed");
                    return Ok(());
                }
                Err(err) => {
                    let delay = if attempt < max_attempts {
                        self.policy.delay_after(attempt)
                    } else {
                        None
                    };
                    match delay {
                        Some(delay) => {
                            warn!(
                                url = %url,
                                phase = %self.phase,
                                attempt,
                                max_attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Attempt failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            let message = err.to_string();
                            warn!(
                                url = %url,
                                phase = %self.phase,
                                attempts = attempt,
                                error = %err,
                                "Record failed after exhausting retries"
                            );
                            self.updater
                                .update_source(
                                    &url,
                                    SourcePatch::failed(err.to_source_error(self.phase, attempt)),
                                )
                                .map_err(|e| e.to_string())?;
                            return Err(message);
                        }
                    }
                }
            }
        }
    }
}
