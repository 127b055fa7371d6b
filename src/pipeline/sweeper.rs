//! Recovery sweeper for stuck in-progress leases.
//!
//! Workers never signal their own death; a crashed or hung worker simply
//! leaves its record leased. The sweeper is the only mechanism that
//! unblocks such records: on a fixed interval it scans every in-progress
//! stage for leases older than the stuck threshold and requeues them
//! (attempts remaining) or fails them permanently (budget exhausted). Every
//! action uses the same optimistic-concurrency commit as ordinary workers,
//! so a record that completes between scan and act is skipped, never
//! reverted.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::repositories::VideoRepository;
use crate::database::time::now_ms;
use crate::domain::IN_PROGRESS_STAGES;

/// Configuration for the recovery sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweeps.
    pub sweep_interval: Duration,
    /// Age past which an in-progress lease counts as stuck.
    pub stuck_threshold: Duration,
    /// Attempt budget; a stuck record at or past it is failed permanently.
    pub max_attempts: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(30 * 60),
            max_attempts: 3,
        }
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub requeued: usize,
    pub failed: usize,
    /// Records that transitioned between scan and act (stale reject).
    pub skipped: usize,
}

/// Periodic stuck-lease recovery.
pub struct RecoverySweeper {
    repository: Arc<dyn VideoRepository>,
    config: SweeperConfig,
    cancellation_token: CancellationToken,
}

impl RecoverySweeper {
    pub fn new(repository: Arc<dyn VideoRepository>, config: SweeperConfig) -> Self {
        Self {
            repository,
            config,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start the sweep loop.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let sweeper = self.clone();
        tokio::spawn(async move {
            info!(
                "Recovery sweeper started (interval {:?}, stuck threshold {:?})",
                sweeper.config.sweep_interval, sweeper.config.stuck_threshold
            );
            loop {
                tokio::select! {
                    _ = sweeper.cancellation_token.cancelled() => break,
                    _ = tokio::time::sleep(sweeper.config.sweep_interval) => {}
                }

                match sweeper.sweep_once().await {
                    Ok(summary) if summary != SweepSummary::default() => {
                        info!(
                            "Sweep recovered stuck work: {} requeued, {} failed, {} skipped",
                            summary.requeued, summary.failed, summary.skipped
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Sweep pass failed: {}", e),
                }
            }
            info!("Recovery sweeper stopped");
        })
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    /// Run a single sweep pass over all in-progress stages.
    pub async fn sweep_once(&self) -> Result<SweepSummary> {
        let cutoff = now_ms() - self.config.stuck_threshold.as_millis() as i64;
        let mut summary = SweepSummary::default();

        for stage in IN_PROGRESS_STAGES {
            let stuck = self.repository.find_stuck(stage, cutoff).await?;

            for video in stuck {
                let outcome = if video.attempt_count >= self.config.max_attempts {
                    let reason = format!(
                        "lease expired in {} after {} attempts",
                        stage, video.attempt_count
                    );
                    self.repository
                        .fail_permanently(&video, &reason)
                        .await
                        .map(|()| {
                            warn!(
                                "{} stuck in {} with budget exhausted, marked FAILED",
                                video.id, stage
                            );
                            summary.failed += 1;
                        })
                } else {
                    self.repository.requeue(&video).await.map(|()| {
                        info!(
                            "{} stuck in {} (attempt {}), requeued",
                            video.id, stage, video.attempt_count
                        );
                        summary.requeued += 1;
                    })
                };

                match outcome {
                    Ok(()) => {}
                    // The record advanced or was reclaimed between the scan
                    // and our commit; leave the fresher transition alone.
                    Err(e) if e.is_stale() => {
                        debug!("{} transitioned during sweep, skipping", video.id);
                        summary.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(summary)
    }
}
