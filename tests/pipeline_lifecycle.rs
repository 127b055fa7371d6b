//! End-to-end pipeline scenarios against a real SQLite registry with
//! scripted collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use legisrec::database::models::{NewVideo, StageProduct, TranscriptSegment, VideoDbModel};
use legisrec::database::repositories::{
    SqlxTranscriptRepository, SqlxVideoRepository, TranscriptRepository, VideoRepository,
};
use legisrec::database::{init_pool, init_write_pool, run_migrations};
use legisrec::discovery::{ArchiveScraper, DiscoveryCoordinator, ScrapeError};
use legisrec::domain::{RawDescriptor, Source, Stage};
use legisrec::pipeline::{
    DownloadStep, MediaFetcher, RecoverySweeper, ResolutionStep, StageError, StageWorkerPool,
    StageWorkerPoolConfig, StreamResolver, SweeperConfig, TranscriptionStep, Transcriber,
    TranscriptData,
};

const MAX_ATTEMPTS: i64 = 3;

struct Harness {
    _dir: TempDir,
    videos: Arc<SqlxVideoRepository>,
    transcripts: Arc<SqlxTranscriptRepository>,
    storage: PathBuf,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let url = format!(
        "sqlite:{}?mode=rwc",
        dir.path().join("registry.db").to_string_lossy().replace('\\', "/")
    );
    let pool = init_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let write_pool = init_write_pool(&url).await.unwrap();

    let storage = dir.path().join("videos");
    Harness {
        videos: Arc::new(SqlxVideoRepository::new(
            pool.clone(),
            write_pool.clone(),
            MAX_ATTEMPTS,
        )),
        transcripts: Arc::new(SqlxTranscriptRepository::new(pool, write_pool)),
        storage,
        _dir: dir,
    }
}

fn house_descriptor(natural_key: &str) -> RawDescriptor {
    RawDescriptor {
        natural_key: natural_key.to_string(),
        title: format!("Agriculture - {natural_key}"),
        committee: Some("Agriculture".to_string()),
        recorded_at: Utc::now(),
        page_url: format!("https://house.mi.gov/VideoArchivePlayer?video={natural_key}.mp4"),
    }
}

struct FixedScraper {
    source: Source,
    descriptors: Vec<RawDescriptor>,
}

#[async_trait]
impl ArchiveScraper for FixedScraper {
    fn source(&self) -> Source {
        self.source
    }

    async fn discover(&self, _cutoff: DateTime<Utc>) -> Result<Vec<RawDescriptor>, ScrapeError> {
        Ok(self.descriptors.clone())
    }
}

struct FailingScraper {
    source: Source,
}

#[async_trait]
impl ArchiveScraper for FailingScraper {
    fn source(&self) -> Source {
        self.source
    }

    async fn discover(&self, _cutoff: DateTime<Utc>) -> Result<Vec<RawDescriptor>, ScrapeError> {
        Err(ScrapeError::Parse("archive page layout changed".to_string()))
    }
}

struct OkResolver;

#[async_trait]
impl StreamResolver for OkResolver {
    async fn resolve(&self, video: &VideoDbModel) -> Result<String, StageError> {
        Ok(format!("https://cdn.example.net/{}/out.m3u8", video.id))
    }
}

/// Fails the first `failures` fetches transiently, then writes an artifact.
struct FlakyFetcher {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl MediaFetcher for FlakyFetcher {
    async fn fetch(
        &self,
        _stream_locator: &str,
        dest_dir: &Path,
        video_id: &str,
    ) -> Result<PathBuf, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(StageError::transient("connection reset by peer"));
        }
        tokio::fs::create_dir_all(dest_dir).await.unwrap();
        let path = dest_dir.join(format!("{}.mp4", video_id.replace(':', "_")));
        tokio::fs::write(&path, b"media bytes").await.unwrap();
        Ok(path)
    }
}

struct OkTranscriber;

#[async_trait]
impl Transcriber for OkTranscriber {
    async fn transcribe(&self, _artifact: &Path) -> Result<TranscriptData, StageError> {
        Ok(TranscriptData {
            provider: "whisper-test".to_string(),
            text: "The committee will come to order.".to_string(),
            segments: vec![TranscriptSegment {
                start_secs: 0.0,
                end_secs: 4.2,
                text: "The committee will come to order.".to_string(),
                speaker: None,
            }],
        })
    }
}

fn fast_pool_config() -> StageWorkerPoolConfig {
    StageWorkerPoolConfig {
        max_workers: 2,
        action_timeout_secs: 30,
        poll_interval_ms: 20,
    }
}

async fn wait_for_stage(
    videos: &SqlxVideoRepository,
    id: &str,
    stage: Stage,
) -> VideoDbModel {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let video = videos.get_video(id).await.unwrap();
        if video.stage == stage.as_str() {
            return video;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {id} to reach {stage}; currently {}",
            video.stage
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// discover house:HAGRI-022025 -> resolve succeeds -> download fails twice
/// (transient) then succeeds -> attempt_count resets entering DOWNLOADED ->
/// transcription succeeds -> TRANSCRIBED with a stored transcript.
#[tokio::test(flavor = "multi_thread")]
async fn full_pipeline_recovers_from_transient_download_failures() {
    let h = harness().await;

    let coordinator = DiscoveryCoordinator::new(
        vec![Arc::new(FixedScraper {
            source: Source::House,
            descriptors: vec![house_descriptor("HAGRI-022025")],
        })],
        h.videos.clone(),
    );
    let report = coordinator.run(Utc::now()).await.unwrap();
    assert_eq!(report.created, 1);

    let resolve_pool = StageWorkerPool::new(
        Arc::new(ResolutionStep::new(Arc::new(OkResolver))),
        h.videos.clone(),
        fast_pool_config(),
    );
    let download_pool = StageWorkerPool::new(
        Arc::new(DownloadStep::new(
            Arc::new(FlakyFetcher {
                failures: 2,
                calls: AtomicUsize::new(0),
            }),
            h.storage.clone(),
        )),
        h.videos.clone(),
        fast_pool_config(),
    );
    let transcribe_pool = StageWorkerPool::new(
        Arc::new(TranscriptionStep::new(
            Arc::new(OkTranscriber),
            h.transcripts.clone(),
        )),
        h.videos.clone(),
        fast_pool_config(),
    );

    resolve_pool.start();
    download_pool.start();
    transcribe_pool.start();

    let video = wait_for_stage(&h.videos, "house:HAGRI-022025", Stage::Transcribed).await;

    resolve_pool.stop().await;
    download_pool.stop().await;
    transcribe_pool.stop().await;

    assert_eq!(video.attempt_count, 0);
    assert!(video.stream_locator.unwrap().contains("house:HAGRI-022025"));
    assert!(video.last_error.is_none());
    assert!(video.lease_owner.is_none());

    let artifact = video.artifact_path.expect("artifact recorded");
    assert!(Path::new(&artifact).exists());

    let transcript_id = video.transcript_id.expect("transcript recorded");
    let transcript = h.transcripts.get(&transcript_id).await.unwrap();
    assert_eq!(transcript.video_id, "house:HAGRI-022025");
    assert!(!transcript.content.is_empty());
    assert_eq!(transcript.segments().unwrap().len(), 1);
}

/// Discovery twice with the same descriptor set changes nothing and creates
/// no duplicates; a failing source never aborts the healthy one.
#[tokio::test]
async fn discovery_is_idempotent_and_isolates_source_failures() {
    let h = harness().await;

    let coordinator = DiscoveryCoordinator::new(
        vec![
            Arc::new(FixedScraper {
                source: Source::House,
                descriptors: vec![house_descriptor("HAGRI-022025"), house_descriptor("HAPPR-030125")],
            }),
            Arc::new(FailingScraper {
                source: Source::Senate,
            }),
        ],
        h.videos.clone(),
    );

    let first = coordinator.run(Utc::now()).await.unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.known, 0);
    assert!(first.sources[1].error.is_some());

    // Advance one record partway so the re-run has pipeline state to preserve.
    let claimed = h.videos.claim_next(Stage::Discovered, "w-0").await.unwrap().unwrap();
    h.videos
        .commit_advance(&claimed, StageProduct::StreamLocator("https://cdn/x.m3u8".into()))
        .await
        .unwrap();

    let second = coordinator.run(Utc::now()).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.known, 2);

    let advanced = h.videos.get_video(&claimed.id).await.unwrap();
    assert_eq!(advanced.stage, "RESOLVED");
    assert_eq!(advanced.attempt_count, 0);
    assert_eq!(advanced.stream_locator.as_deref(), Some("https://cdn/x.m3u8"));

    let stats = h.videos.get_stats().await.unwrap();
    assert_eq!(stats.total, 2);
}

/// A RESOLVING lease abandoned three times exhausts the attempt budget:
/// requeued at attempts 1 and 2, FAILED(stage=RESOLVING) on the third.
#[tokio::test]
async fn sweeper_requeues_abandoned_leases_then_fails_permanently() {
    let h = harness().await;
    h.videos
        .upsert_discovered(&NewVideo::from_descriptor(Source::House, &house_descriptor("HAGRI-022025")).unwrap())
        .await
        .unwrap();

    let sweeper = RecoverySweeper::new(
        h.videos.clone(),
        SweeperConfig {
            sweep_interval: Duration::from_secs(3600),
            stuck_threshold: Duration::from_millis(10),
            max_attempts: MAX_ATTEMPTS,
        },
    );

    for attempt in 1..=2 {
        // Worker claims and is killed: the lease just sits there.
        let claimed = h.videos.claim_next(Stage::Discovered, "doomed").await.unwrap().unwrap();
        assert_eq!(claimed.attempt_count, attempt);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let summary = sweeper.sweep_once().await.unwrap();
        assert_eq!(summary.requeued, 1);
        assert_eq!(summary.failed, 0);

        let video = h.videos.get_video(&claimed.id).await.unwrap();
        assert_eq!(video.stage, "DISCOVERED");
        assert_eq!(video.attempt_count, attempt);
        assert!(video.lease_owner.is_none());
    }

    let claimed = h.videos.claim_next(Stage::Discovered, "doomed").await.unwrap().unwrap();
    assert_eq!(claimed.attempt_count, 3);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let summary = sweeper.sweep_once().await.unwrap();
    assert_eq!(summary.failed, 1);

    let video = h.videos.get_video(&claimed.id).await.unwrap();
    assert_eq!(video.stage, "FAILED");
    assert_eq!(video.failed_stage.as_deref(), Some("RESOLVING"));
    assert!(video.last_error.unwrap().contains("lease expired"));

    // FAILED is absorbing: re-discovery does not resurrect it.
    h.videos
        .upsert_discovered(&NewVideo::from_descriptor(Source::House, &house_descriptor("HAGRI-022025")).unwrap())
        .await
        .unwrap();
    let video = h.videos.get_video("house:HAGRI-022025").await.unwrap();
    assert_eq!(video.stage, "FAILED");
}

/// A record that completes its action just before the sweeper acts is NOT
/// reverted: the sweeper's stale observation is rejected and skipped.
#[tokio::test]
async fn sweeper_never_reverts_a_just_completed_record() {
    let h = harness().await;
    h.videos
        .upsert_discovered(&NewVideo::from_descriptor(Source::House, &house_descriptor("HAGRI-022025")).unwrap())
        .await
        .unwrap();

    let claimed = h.videos.claim_next(Stage::Discovered, "slow-worker").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Sweeper scans and sees the stuck lease...
    let stuck = h
        .videos
        .find_stuck(Stage::Resolving, legisrec::database::time::now_ms())
        .await
        .unwrap();
    assert_eq!(stuck.len(), 1);

    // ...but the worker commits before the sweeper acts.
    h.videos
        .commit_advance(&claimed, StageProduct::StreamLocator("https://cdn/x.m3u8".into()))
        .await
        .unwrap();

    let err = h.videos.requeue(&stuck[0]).await.unwrap_err();
    assert!(err.is_stale());

    let video = h.videos.get_video(&claimed.id).await.unwrap();
    assert_eq!(video.stage, "RESOLVED");
    assert_eq!(video.stream_locator.as_deref(), Some("https://cdn/x.m3u8"));
}

/// No legal operation sequence moves a record backward except the defined
/// requeue, and a requeue never skips past the legal prior state.
#[tokio::test]
async fn stage_progression_is_forward_only() {
    let h = harness().await;
    h.videos
        .upsert_discovered(&NewVideo::from_descriptor(Source::House, &house_descriptor("HAGRI-022025")).unwrap())
        .await
        .unwrap();

    // Ready records cannot be requeued or failed: those act on leases.
    let video = h.videos.get_video("house:HAGRI-022025").await.unwrap();
    assert!(h.videos.requeue(&video).await.is_err());
    assert!(h.videos.record_failure(&video, "nope").await.is_err());

    // A RESOLVING record cannot commit a download product.
    let claimed = h.videos.claim_next(Stage::Discovered, "w-0").await.unwrap().unwrap();
    assert!(
        h.videos
            .commit_advance(&claimed, StageProduct::Artifact("/tmp/a.mp4".into()))
            .await
            .is_err()
    );

    // Requeue lands exactly one step back.
    h.videos.requeue(&claimed).await.unwrap();
    let video = h.videos.get_video(&claimed.id).await.unwrap();
    assert_eq!(video.stage, "DISCOVERED");
}
