//! Service container: wires collaborators, repositories, worker pools, the
//! recovery sweeper, and the discovery scheduler, and owns their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::collaborators::{
    ArchiveResolver, HouseResolver, HouseScraper, HttpFetcher, SenateResolver, SenateScraper,
    WhisperApiTranscriber,
};
use crate::config::Settings;
use crate::database::repositories::{
    SqlxTranscriptRepository, SqlxVideoRepository, TranscriptRepository, VideoRepository,
};
use crate::database::{DbPool, WritePool};
use crate::discovery::{
    ArchiveScraper, DiscoveryCoordinator, DiscoveryScheduler, DiscoverySchedulerConfig,
};
use crate::pipeline::{
    DownloadStep, RecoverySweeper, ResolutionStep, StageWorkerPool, StageWorkerPoolConfig,
    SweeperConfig, TranscriptionStep,
};
use crate::utils::http;
use crate::Result;

/// Timeout for scraping and resolution HTTP calls.
const ARCHIVE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    pub video_repository: Arc<dyn VideoRepository>,
    pub transcript_repository: Arc<dyn TranscriptRepository>,
    pub coordinator: Arc<DiscoveryCoordinator>,
    scheduler: Arc<DiscoveryScheduler>,
    sweeper: Arc<RecoverySweeper>,
    pools: Vec<StageWorkerPool>,
    handles: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ServiceContainer {
    /// Wire the full service graph from settings and database pools.
    pub fn build(settings: &Settings, pool: DbPool, write_pool: WritePool) -> Result<Self> {
        info!("Initializing service container");

        let video_repository: Arc<dyn VideoRepository> = Arc::new(SqlxVideoRepository::new(
            pool.clone(),
            write_pool.clone(),
            settings.max_attempts,
        ));
        let transcript_repository: Arc<dyn TranscriptRepository> =
            Arc::new(SqlxTranscriptRepository::new(pool, write_pool));

        // Collaborators.
        let archive_client = http::build_client(ARCHIVE_REQUEST_TIMEOUT)?;
        let scrapers: Vec<Arc<dyn ArchiveScraper>> = vec![
            Arc::new(HouseScraper::new(
                archive_client.clone(),
                settings.house_archive_url.clone(),
            )),
            Arc::new(SenateScraper::new(
                archive_client.clone(),
                settings.senate_api_url.clone(),
            )),
        ];
        let resolver = Arc::new(ArchiveResolver::new(
            HouseResolver::new(archive_client.clone()),
            SenateResolver::new(archive_client, settings.senate_resolve_url.clone()),
        ));
        let fetcher = Arc::new(HttpFetcher::new(http::build_download_client()?));
        let transcriber = Arc::new(WhisperApiTranscriber::new(
            http::build_download_client()?,
            settings.transcriber_endpoint.clone(),
            settings.transcriber_model.clone(),
            settings.transcriber_api_key.clone(),
        ));

        // Discovery.
        let coordinator = Arc::new(DiscoveryCoordinator::new(
            scrapers,
            video_repository.clone(),
        ));
        let scheduler = Arc::new(DiscoveryScheduler::new(
            coordinator.clone(),
            DiscoverySchedulerConfig {
                interval: settings.discovery_interval,
                cutoff_days: settings.discovery_cutoff_days,
            },
        ));

        // Stage worker pools.
        let pool_config = |max_workers| StageWorkerPoolConfig {
            max_workers,
            action_timeout_secs: settings.action_timeout.as_secs(),
            poll_interval_ms: settings.poll_interval_ms,
        };
        let pools = vec![
            StageWorkerPool::new(
                Arc::new(ResolutionStep::new(resolver)),
                video_repository.clone(),
                pool_config(settings.resolve_workers),
            ),
            StageWorkerPool::new(
                Arc::new(DownloadStep::new(fetcher, settings.videos_dir())),
                video_repository.clone(),
                pool_config(settings.download_workers),
            ),
            StageWorkerPool::new(
                Arc::new(TranscriptionStep::new(
                    transcriber,
                    transcript_repository.clone(),
                )),
                video_repository.clone(),
                pool_config(settings.transcribe_workers),
            ),
        ];

        // Recovery.
        let sweeper = Arc::new(RecoverySweeper::new(
            video_repository.clone(),
            SweeperConfig {
                sweep_interval: settings.sweep_interval,
                stuck_threshold: settings.stuck_threshold,
                max_attempts: settings.max_attempts,
            },
        ));

        Ok(Self {
            video_repository,
            transcript_repository,
            coordinator,
            scheduler,
            sweeper,
            pools,
            handles: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Start worker pools, the recovery sweeper, and the discovery
    /// scheduler.
    pub fn start(&self) {
        for pool in &self.pools {
            pool.start();
        }

        let mut handles = self.handles.lock();
        handles.push(self.sweeper.clone().start());
        handles.push(self.scheduler.clone().start());

        info!("Service container started");
    }

    /// Stop everything and wait for in-flight work to settle. Records left
    /// leased by an interrupted action are recovered later by the sweeper's
    /// timeout.
    pub async fn shutdown(&self) {
        info!("Shutting down service container");

        self.scheduler.stop();
        self.sweeper.stop();
        for pool in &self.pools {
            pool.stop().await;
        }

        let handles = {
            let mut guard = self.handles.lock();
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }

        info!("Service container stopped");
    }
}
