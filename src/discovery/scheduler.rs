//! Fixed-cadence discovery scheduling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::DiscoveryCoordinator;

/// Configuration for the discovery scheduler.
#[derive(Debug, Clone)]
pub struct DiscoverySchedulerConfig {
    /// Interval between discovery runs.
    pub interval: Duration,
    /// Recency window handed to the scrapers.
    pub cutoff_days: i64,
}

impl Default for DiscoverySchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            cutoff_days: 60,
        }
    }
}

/// Invokes the coordinator on a fixed interval, starting immediately.
pub struct DiscoveryScheduler {
    coordinator: Arc<DiscoveryCoordinator>,
    config: DiscoverySchedulerConfig,
    cancellation_token: CancellationToken,
}

impl DiscoveryScheduler {
    pub fn new(coordinator: Arc<DiscoveryCoordinator>, config: DiscoverySchedulerConfig) -> Self {
        Self {
            coordinator,
            config,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            info!(
                "Discovery scheduler started (interval {:?}, cutoff {} days)",
                scheduler.config.interval, scheduler.config.cutoff_days
            );
            loop {
                let cutoff = Utc::now() - chrono::Duration::days(scheduler.config.cutoff_days);
                match scheduler.coordinator.run(cutoff).await {
                    Ok(report) => {
                        info!(
                            "Discovery run complete: {} new, {} known",
                            report.created, report.known
                        );
                    }
                    Err(e) => warn!("Discovery run failed: {}", e),
                }

                tokio::select! {
                    _ = scheduler.cancellation_token.cancelled() => break,
                    _ = tokio::time::sleep(scheduler.config.interval) => {}
                }
            }
            info!("Discovery scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }
}
