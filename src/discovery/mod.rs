//! Video discovery: turn scraped archive descriptors into registry rows.

pub mod scheduler;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use crate::Result;
use crate::database::models::NewVideo;
use crate::database::repositories::VideoRepository;
use crate::domain::{RawDescriptor, Source};

pub use scheduler::{DiscoveryScheduler, DiscoverySchedulerConfig};

/// Failure of an archive scraper.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("parse: {0}")]
    Parse(String),
}

/// Produces raw candidate descriptors for one archive source, already
/// filtered to the recency cutoff.
#[async_trait]
pub trait ArchiveScraper: Send + Sync {
    fn source(&self) -> Source;

    async fn discover(
        &self,
        cutoff: DateTime<Utc>,
    ) -> std::result::Result<Vec<RawDescriptor>, ScrapeError>;
}

/// Per-source discovery outcome.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: Source,
    pub created: usize,
    pub known: usize,
    pub error: Option<String>,
}

/// Aggregated outcome of one discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub created: usize,
    pub known: usize,
    pub sources: Vec<SourceOutcome>,
}

/// Turns scraper output into registry records.
///
/// Safe to invoke concurrently with itself (scheduled and on-demand runs
/// may overlap): registration is an idempotent upsert, so double discovery
/// never duplicates a record or disturbs one already in flight.
pub struct DiscoveryCoordinator {
    scrapers: Vec<Arc<dyn ArchiveScraper>>,
    repository: Arc<dyn VideoRepository>,
}

impl DiscoveryCoordinator {
    pub fn new(scrapers: Vec<Arc<dyn ArchiveScraper>>, repository: Arc<dyn VideoRepository>) -> Self {
        Self {
            scrapers,
            repository,
        }
    }

    /// Run discovery across all sources.
    ///
    /// A scraper failure is recorded in the report for its source and does
    /// not abort the other sources; partial success is reported, not
    /// thrown away.
    pub async fn run(&self, cutoff: DateTime<Utc>) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();

        for scraper in &self.scrapers {
            let source = scraper.source();
            info!("Discovering {} videos after {}", source, cutoff.date_naive());

            let outcome = match scraper.discover(cutoff).await {
                Ok(descriptors) => {
                    let (created, known) = self.register(source, &descriptors).await?;
                    info!(
                        "Discovered {} {} videos ({} new, {} known)",
                        descriptors.len(),
                        source,
                        created,
                        known
                    );
                    SourceOutcome {
                        source,
                        created,
                        known,
                        error: None,
                    }
                }
                Err(e) => {
                    error!("Error discovering {} videos: {}", source, e);
                    SourceOutcome {
                        source,
                        created: 0,
                        known: 0,
                        error: Some(e.to_string()),
                    }
                }
            };

            report.created += outcome.created;
            report.known += outcome.known;
            report.sources.push(outcome);
        }

        Ok(report)
    }

    async fn register(
        &self,
        source: Source,
        descriptors: &[RawDescriptor],
    ) -> Result<(usize, usize)> {
        let mut created = 0;
        let mut known = 0;
        for descriptor in descriptors {
            let new = NewVideo::from_descriptor(source, descriptor)?;
            if self.repository.upsert_discovered(&new).await? {
                created += 1;
            } else {
                known += 1;
            }
        }
        Ok((created, known))
    }
}
