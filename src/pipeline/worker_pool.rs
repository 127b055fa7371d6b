//! Per-stage worker pools.
//!
//! Workers are stateless: each iteration claims one ready record through
//! the registry's atomic claim, runs the stage action with a bounded
//! timeout, and commits the outcome with an optimistic-concurrency check.
//! No in-process locking coordinates workers; exclusivity comes entirely
//! from the claim, so pools can be scaled per stage (or run in separate
//! processes) without coordination.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::models::{FailureOutcome, VideoDbModel};
use crate::database::repositories::VideoRepository;

use super::steps::StageStep;
use super::traits::StageError;

/// Configuration for a stage worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageWorkerPoolConfig {
    /// Concurrent workers for this stage.
    pub max_workers: usize,
    /// Stage action timeout in seconds.
    ///
    /// If the external action exceeds this duration its future is dropped
    /// and the attempt is recorded as a transient failure. Collaborators
    /// must be cancel-safe.
    pub action_timeout_secs: u64,
    /// Idle poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for StageWorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            action_timeout_secs: 3600,
            poll_interval_ms: 500,
        }
    }
}

/// A worker pool bound to one pipeline stage.
pub struct StageWorkerPool {
    step: Arc<dyn StageStep>,
    repository: Arc<dyn VideoRepository>,
    config: StageWorkerPoolConfig,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl StageWorkerPool {
    pub fn new(
        step: Arc<dyn StageStep>,
        repository: Arc<dyn VideoRepository>,
        config: StageWorkerPoolConfig,
    ) -> Self {
        Self {
            step,
            repository,
            config,
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Start the worker tasks.
    pub fn start(&self) {
        let ready = self.step.ready_stage();
        info!(
            "Starting {} worker pool with {} max workers (claims {})",
            self.step.name(),
            self.config.max_workers,
            ready
        );

        let mut tasks = self.tasks.lock();
        if let Some(ref mut join_set) = *tasks {
            for i in 0..self.config.max_workers {
                let step = self.step.clone();
                let repository = self.repository.clone();
                let token = self.cancellation_token.clone();
                let poll_interval =
                    std::time::Duration::from_millis(self.config.poll_interval_ms);
                let action_timeout =
                    std::time::Duration::from_secs(self.config.action_timeout_secs);
                let worker = format!("{}/{}-{}", std::process::id(), step.name(), i);

                join_set.spawn(async move {
                    debug!("worker {} started", worker);

                    loop {
                        if token.is_cancelled() {
                            debug!("worker {} shutting down", worker);
                            break;
                        }

                        let claimed = match repository.claim_next(ready, &worker).await {
                            Ok(claimed) => claimed,
                            Err(e) => {
                                error!("worker {} failed to claim: {}", worker, e);
                                None
                            }
                        };

                        match claimed {
                            Some(video) => {
                                run_claimed(&*step, &*repository, &worker, video, action_timeout)
                                    .await;
                                // Keep draining the backlog without sleeping.
                            }
                            None => {
                                tokio::select! {
                                    _ = token.cancelled() => break,
                                    _ = tokio::time::sleep(poll_interval) => {}
                                }
                            }
                        }
                    }
                });
            }
        }
    }

    /// Stop the worker pool and wait for in-flight actions to finish.
    pub async fn stop(&self) {
        info!("Stopping {} worker pool", self.step.name());
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("{} worker pool stopped", self.step.name());
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

/// Drive one claimed record through its action and commit the outcome.
///
/// Every exit path either advances the record or hands it back through
/// `record_failure`/`fail_permanently`; a `StaleState` reject means the
/// sweeper reclaimed the lease while the action ran, and the outcome is
/// dropped. The action is idempotent, so the next attempt redoes it safely.
async fn run_claimed(
    step: &dyn StageStep,
    repository: &dyn VideoRepository,
    worker: &str,
    video: VideoDbModel,
    action_timeout: std::time::Duration,
) {
    debug!("worker {} processing {}", worker, video.id);

    let outcome = tokio::time::timeout(action_timeout, step.execute(&video)).await;

    let result = match outcome {
        Ok(Ok(product)) => match repository.commit_advance(&video, product).await {
            Ok(()) => {
                info!("{}: {} advanced past {}", step.name(), video.id, video.stage);
                Ok(())
            }
            Err(e) => Err(e),
        },
        Ok(Err(StageError::Permanent(msg))) => {
            warn!("{}: {} failed permanently: {}", step.name(), video.id, msg);
            repository.fail_permanently(&video, &msg).await
        }
        Ok(Err(StageError::Transient(msg))) => {
            record_transient(step, repository, &video, &msg).await
        }
        Err(_elapsed) => {
            record_transient(step, repository, &video, "stage action timed out").await
        }
    };

    match result {
        Ok(()) => {}
        Err(e) if e.is_stale() => {
            debug!(
                "{}: lost lease on {} to a concurrent transition; dropping outcome",
                step.name(),
                video.id
            );
        }
        Err(e) => error!("{}: registry commit failed for {}: {}", step.name(), video.id, e),
    }
}

async fn record_transient(
    step: &dyn StageStep,
    repository: &dyn VideoRepository,
    video: &VideoDbModel,
    msg: &str,
) -> crate::Result<()> {
    let outcome = repository.record_failure(video, msg).await?;
    match outcome {
        FailureOutcome::Requeued => {
            warn!(
                "{}: {} failed (attempt {}), requeued: {}",
                step.name(),
                video.id,
                video.attempt_count,
                msg
            );
        }
        FailureOutcome::FailedPermanently => {
            warn!(
                "{}: {} exhausted its attempt budget, marked FAILED: {}",
                step.name(),
                video.id,
                msg
            );
        }
    }
    Ok(())
}
