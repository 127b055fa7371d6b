//! Video registry repository.
//!
//! All pipeline mutations are optimistic-concurrency operations: the caller
//! supplies the record it last observed, and every UPDATE is guarded by
//! `stage` plus `stage_entered_at`. The stage alone would be ABA-prone (a
//! stuck RESOLVING record can be requeued and re-claimed back into RESOLVING
//! between a scan and an act); `stage_entered_at` changes on every
//! transition, so the pair is a generation token. A guard miss surfaces as
//! `Error::StaleState` and the caller re-reads instead of overwriting a
//! concurrent transition.

use async_trait::async_trait;

use crate::database::models::{
    FailureOutcome, NewVideo, PipelineStats, StageProduct, VideoDbModel,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::database::{DbPool, WritePool, begin_immediate};
use crate::domain::Stage;
use crate::{Error, Result};

/// Video registry repository trait.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Register a discovered video. Returns `true` when the row was created.
    ///
    /// Idempotent: an existing id gets a descriptor-metadata refresh only;
    /// stage, attempts, products, and lease are never touched, and a FAILED
    /// record is never reset.
    async fn upsert_discovered(&self, new: &NewVideo) -> Result<bool>;

    /// Atomically claim the oldest eligible record in `ready` for `worker`:
    /// moves it to the in-progress stage, increments `attempt_count`, and
    /// stamps the lease. Eligible means attempt budget remaining. Two
    /// workers can never claim the same record.
    async fn claim_next(&self, ready: Stage, worker: &str) -> Result<Option<VideoDbModel>>;

    /// Commit a successful stage action: advance to the next stage, store
    /// the product, reset `attempt_count`, clear lease and `last_error`.
    async fn commit_advance(&self, observed: &VideoDbModel, product: StageProduct) -> Result<()>;

    /// Record a failed stage action: requeue to the prior ready stage while
    /// attempts remain, else transition to FAILED.
    async fn record_failure(&self, observed: &VideoDbModel, error: &str)
    -> Result<FailureOutcome>;

    /// Records leased in `stage` since before `older_than_ms` without an
    /// advance.
    async fn find_stuck(&self, stage: Stage, older_than_ms: i64) -> Result<Vec<VideoDbModel>>;

    /// Return a stuck in-progress record to its prior ready stage so a
    /// worker can claim it again. Sweeper pathway.
    async fn requeue(&self, observed: &VideoDbModel) -> Result<()>;

    /// Transition an in-progress record to FAILED with `reason`.
    async fn fail_permanently(&self, observed: &VideoDbModel, reason: &str) -> Result<()>;

    async fn get_video(&self, id: &str) -> Result<VideoDbModel>;
    async fn list_by_stage(&self, stage: Stage, limit: i64) -> Result<Vec<VideoDbModel>>;
    async fn count_ready(&self, ready: Stage) -> Result<u64>;
    async fn get_stats(&self) -> Result<PipelineStats>;
}

/// SQLx implementation of `VideoRepository`.
pub struct SqlxVideoRepository {
    pool: DbPool,
    write_pool: WritePool,
    /// Attempt budget per stage; crossing it forces FAILED.
    max_attempts: i64,
}

impl SqlxVideoRepository {
    pub fn new(pool: DbPool, write_pool: WritePool, max_attempts: i64) -> Self {
        Self {
            pool,
            write_pool,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    fn stale(observed: &VideoDbModel) -> Error {
        Error::stale(&observed.id, &observed.stage)
    }
}

#[async_trait]
impl VideoRepository for SqlxVideoRepository {
    async fn upsert_discovered(&self, new: &NewVideo) -> Result<bool> {
        retry_on_sqlite_busy("upsert_discovered", || async {
            let now = now_ms();
            let inserted = sqlx::query(
                r#"
                INSERT INTO videos (id, source, descriptor, stage, attempt_count, stage_entered_at, created_at, updated_at)
                VALUES (?, ?, ?, ?, 0, ?, ?, ?)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&new.id)
            .bind(new.source.as_str())
            .bind(&new.descriptor_json)
            .bind(Stage::Discovered.as_str())
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&self.write_pool)
            .await?;

            if inserted.rows_affected() == 1 {
                return Ok(true);
            }

            // Known id: refresh descriptor metadata only, never pipeline fields.
            sqlx::query("UPDATE videos SET descriptor = ?, updated_at = ? WHERE id = ?")
                .bind(&new.descriptor_json)
                .bind(now)
                .bind(&new.id)
                .execute(&self.write_pool)
                .await?;

            Ok(false)
        })
        .await
    }

    async fn claim_next(&self, ready: Stage, worker: &str) -> Result<Option<VideoDbModel>> {
        let target = ready.claim_target().ok_or_else(|| {
            Error::validation(format!("stage {ready} is not claimable"))
        })?;

        retry_on_sqlite_busy("claim_next", || async {
            let now = now_ms();
            // Single-statement claim: atomic even without an explicit
            // transaction, and the serialized write pool means only one
            // connection ever runs it at a time.
            let claimed = sqlx::query_as::<_, VideoDbModel>(
                r#"
                UPDATE videos
                SET stage = ?, attempt_count = attempt_count + 1, stage_entered_at = ?,
                    lease_owner = ?, lease_acquired_at = ?, updated_at = ?
                WHERE id = (
                    SELECT id FROM videos
                    WHERE stage = ? AND attempt_count < ?
                    ORDER BY created_at
                    LIMIT 1
                )
                RETURNING *
                "#,
            )
            .bind(target.as_str())
            .bind(now)
            .bind(worker)
            .bind(now)
            .bind(now)
            .bind(ready.as_str())
            .bind(self.max_attempts)
            .fetch_optional(&self.write_pool)
            .await?;

            Ok(claimed)
        })
        .await
    }

    async fn commit_advance(&self, observed: &VideoDbModel, product: StageProduct) -> Result<()> {
        let from = observed.current_stage()?;
        if product.advances_from() != from {
            return Err(Error::validation(format!(
                "product does not advance stage {from}"
            )));
        }
        let to = from.transition_to(from.advance_target().ok_or_else(|| {
            Error::validation(format!("stage {from} has no advance target"))
        })?)?;

        let (sql, value) = match &product {
            StageProduct::StreamLocator(v) => (
                r#"
                UPDATE videos
                SET stage = ?, stream_locator = ?, attempt_count = 0, stage_entered_at = ?,
                    lease_owner = NULL, lease_acquired_at = NULL, last_error = NULL, updated_at = ?
                WHERE id = ? AND stage = ? AND stage_entered_at = ?
                "#,
                v,
            ),
            StageProduct::Artifact(v) => (
                r#"
                UPDATE videos
                SET stage = ?, artifact_path = ?, attempt_count = 0, stage_entered_at = ?,
                    lease_owner = NULL, lease_acquired_at = NULL, last_error = NULL, updated_at = ?
                WHERE id = ? AND stage = ? AND stage_entered_at = ?
                "#,
                v,
            ),
            StageProduct::Transcript(v) => (
                r#"
                UPDATE videos
                SET stage = ?, transcript_id = ?, attempt_count = 0, stage_entered_at = ?,
                    lease_owner = NULL, lease_acquired_at = NULL, last_error = NULL, updated_at = ?
                WHERE id = ? AND stage = ? AND stage_entered_at = ?
                "#,
                v,
            ),
        };

        retry_on_sqlite_busy("commit_advance", || async {
            let now = now_ms();
            let done = sqlx::query(sql)
                .bind(to.as_str())
                .bind(value)
                .bind(now)
                .bind(now)
                .bind(&observed.id)
                .bind(observed.stage.as_str())
                .bind(observed.stage_entered_at)
                .execute(&self.write_pool)
                .await?;

            if done.rows_affected() == 0 {
                return Err(Self::stale(observed));
            }
            Ok(())
        })
        .await
    }

    async fn record_failure(
        &self,
        observed: &VideoDbModel,
        error: &str,
    ) -> Result<FailureOutcome> {
        let from = observed.current_stage()?;
        let prior = from.prior_ready().ok_or_else(|| {
            Error::validation(format!("stage {from} is not an in-progress stage"))
        })?;

        retry_on_sqlite_busy("record_failure", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;

            let current = sqlx::query_as::<_, VideoDbModel>("SELECT * FROM videos WHERE id = ?")
                .bind(&observed.id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| Error::not_found("Video", &observed.id))?;

            if current.stage != observed.stage || current.stage_entered_at != observed.stage_entered_at
            {
                tx.rollback().await?;
                return Err(Self::stale(observed));
            }

            let now = now_ms();
            let outcome = if current.attempt_count >= self.max_attempts {
                sqlx::query(
                    r#"
                    UPDATE videos
                    SET stage = ?, failed_stage = ?, last_error = ?,
                        stage_entered_at = ?, lease_owner = NULL, lease_acquired_at = NULL,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(Stage::Failed.as_str())
                .bind(from.as_str())
                .bind(error)
                .bind(now)
                .bind(now)
                .bind(&observed.id)
                .execute(&mut *tx)
                .await?;
                FailureOutcome::FailedPermanently
            } else {
                sqlx::query(
                    r#"
                    UPDATE videos
                    SET stage = ?, last_error = ?, stage_entered_at = ?,
                        lease_owner = NULL, lease_acquired_at = NULL, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(prior.as_str())
                .bind(error)
                .bind(now)
                .bind(now)
                .bind(&observed.id)
                .execute(&mut *tx)
                .await?;
                FailureOutcome::Requeued
            };

            tx.commit().await?;
            Ok(outcome)
        })
        .await
    }

    async fn find_stuck(&self, stage: Stage, older_than_ms: i64) -> Result<Vec<VideoDbModel>> {
        if !stage.is_in_progress() {
            return Err(Error::validation(format!(
                "stage {stage} is not an in-progress stage"
            )));
        }
        let stuck = sqlx::query_as::<_, VideoDbModel>(
            "SELECT * FROM videos WHERE stage = ? AND stage_entered_at < ? ORDER BY stage_entered_at",
        )
        .bind(stage.as_str())
        .bind(older_than_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(stuck)
    }

    async fn requeue(&self, observed: &VideoDbModel) -> Result<()> {
        let from = observed.current_stage()?;
        let prior = from.transition_to(from.prior_ready().ok_or_else(|| {
            Error::validation(format!("stage {from} is not an in-progress stage"))
        })?)?;

        retry_on_sqlite_busy("requeue", || async {
            let now = now_ms();
            let done = sqlx::query(
                r#"
                UPDATE videos
                SET stage = ?, stage_entered_at = ?, lease_owner = NULL,
                    lease_acquired_at = NULL, updated_at = ?
                WHERE id = ? AND stage = ? AND stage_entered_at = ?
                "#,
            )
            .bind(prior.as_str())
            .bind(now)
            .bind(now)
            .bind(&observed.id)
            .bind(observed.stage.as_str())
            .bind(observed.stage_entered_at)
            .execute(&self.write_pool)
            .await?;

            if done.rows_affected() == 0 {
                return Err(Self::stale(observed));
            }
            Ok(())
        })
        .await
    }

    async fn fail_permanently(&self, observed: &VideoDbModel, reason: &str) -> Result<()> {
        let from = observed.current_stage()?;
        from.transition_to(Stage::Failed)?;

        retry_on_sqlite_busy("fail_permanently", || async {
            let now = now_ms();
            let done = sqlx::query(
                r#"
                UPDATE videos
                SET stage = ?, failed_stage = ?, last_error = ?, stage_entered_at = ?,
                    lease_owner = NULL, lease_acquired_at = NULL, updated_at = ?
                WHERE id = ? AND stage = ? AND stage_entered_at = ?
                "#,
            )
            .bind(Stage::Failed.as_str())
            .bind(from.as_str())
            .bind(reason)
            .bind(now)
            .bind(now)
            .bind(&observed.id)
            .bind(observed.stage.as_str())
            .bind(observed.stage_entered_at)
            .execute(&self.write_pool)
            .await?;

            if done.rows_affected() == 0 {
                return Err(Self::stale(observed));
            }
            Ok(())
        })
        .await
    }

    async fn get_video(&self, id: &str) -> Result<VideoDbModel> {
        sqlx::query_as::<_, VideoDbModel>("SELECT * FROM videos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Video", id))
    }

    async fn list_by_stage(&self, stage: Stage, limit: i64) -> Result<Vec<VideoDbModel>> {
        let videos = sqlx::query_as::<_, VideoDbModel>(
            "SELECT * FROM videos WHERE stage = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(stage.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(videos)
    }

    async fn count_ready(&self, ready: Stage) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM videos WHERE stage = ? AND attempt_count < ?",
        )
        .bind(ready.as_str())
        .bind(self.max_attempts)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn get_stats(&self) -> Result<PipelineStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT stage, COUNT(*) FROM videos GROUP BY stage")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = PipelineStats::default();
        for (stage, count) in rows {
            let count = count as u64;
            stats.total += count;
            match Stage::parse(&stage) {
                Some(Stage::Discovered) => stats.discovered += count,
                Some(Stage::Resolved) => stats.resolved += count,
                Some(Stage::Downloaded) => stats.downloaded += count,
                Some(Stage::Transcribed) => stats.transcribed += count,
                Some(Stage::Failed) => stats.failed += count,
                Some(s) if s.is_in_progress() => stats.in_progress += count,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool, init_write_pool, run_migrations};
    use crate::domain::{RawDescriptor, Source};
    use chrono::Utc;
    use tempfile::TempDir;

    async fn test_repo() -> (TempDir, SqlxVideoRepository) {
        let dir = TempDir::new().unwrap();
        let url = format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("test.db").to_string_lossy().replace('\\', "/")
        );
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let write_pool = init_write_pool(&url).await.unwrap();
        (dir, SqlxVideoRepository::new(pool, write_pool, 3))
    }

    fn new_video(key: &str) -> NewVideo {
        NewVideo::from_descriptor(
            Source::House,
            &RawDescriptor {
                natural_key: key.to_string(),
                title: format!("Hearing {key}"),
                committee: Some("Agriculture".to_string()),
                recorded_at: Utc::now(),
                page_url: format!("https://house.mi.gov/VideoArchivePlayer?video={key}.mp4"),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (_dir, repo) = test_repo().await;
        let new = new_video("HAGRI-022025");

        assert!(repo.upsert_discovered(&new).await.unwrap());
        assert!(!repo.upsert_discovered(&new).await.unwrap());

        let video = repo.get_video(&new.id).await.unwrap();
        assert_eq!(video.stage, "DISCOVERED");
        assert_eq!(video.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_upsert_never_touches_pipeline_fields() {
        let (_dir, repo) = test_repo().await;
        let new = new_video("HAGRI-022025");
        repo.upsert_discovered(&new).await.unwrap();

        let claimed = repo
            .claim_next(Stage::Discovered, "w-0")
            .await
            .unwrap()
            .unwrap();
        repo.commit_advance(&claimed, StageProduct::StreamLocator("https://cdn/out.m3u8".into()))
            .await
            .unwrap();

        // Re-discovery of an advanced record is a metadata-only refresh.
        assert!(!repo.upsert_discovered(&new).await.unwrap());
        let video = repo.get_video(&new.id).await.unwrap();
        assert_eq!(video.stage, "RESOLVED");
        assert_eq!(video.stream_locator.as_deref(), Some("https://cdn/out.m3u8"));
        assert_eq!(video.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_claim_increments_attempts_and_leases() {
        let (_dir, repo) = test_repo().await;
        repo.upsert_discovered(&new_video("A")).await.unwrap();

        let claimed = repo
            .claim_next(Stage::Discovered, "w-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.stage, "RESOLVING");
        assert_eq!(claimed.attempt_count, 1);
        assert_eq!(claimed.lease_owner.as_deref(), Some("w-1"));

        // Nothing else to claim while the lease is held.
        assert!(repo.claim_next(Stage::Discovered, "w-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_advance_rejects_stale_observation() {
        let (_dir, repo) = test_repo().await;
        repo.upsert_discovered(&new_video("A")).await.unwrap();

        let claimed = repo
            .claim_next(Stage::Discovered, "w-1")
            .await
            .unwrap()
            .unwrap();
        // Sweeper takes the record back before the worker commits.
        repo.requeue(&claimed).await.unwrap();

        let err = repo
            .commit_advance(&claimed, StageProduct::StreamLocator("u".into()))
            .await
            .unwrap_err();
        assert!(err.is_stale());

        let video = repo.get_video(&claimed.id).await.unwrap();
        assert_eq!(video.stage, "DISCOVERED");
        assert!(video.stream_locator.is_none());
    }

    #[tokio::test]
    async fn test_record_failure_requeues_then_fails_at_budget() {
        let (_dir, repo) = test_repo().await;
        repo.upsert_discovered(&new_video("A")).await.unwrap();

        for attempt in 1..=2 {
            let claimed = repo
                .claim_next(Stage::Discovered, "w-1")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(claimed.attempt_count, attempt);
            assert_eq!(
                repo.record_failure(&claimed, "manifest not found").await.unwrap(),
                FailureOutcome::Requeued
            );
        }

        let claimed = repo
            .claim_next(Stage::Discovered, "w-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.attempt_count, 3);
        assert_eq!(
            repo.record_failure(&claimed, "manifest not found").await.unwrap(),
            FailureOutcome::FailedPermanently
        );

        let video = repo.get_video(&claimed.id).await.unwrap();
        assert_eq!(video.stage, "FAILED");
        assert_eq!(video.failed_stage.as_deref(), Some("RESOLVING"));
        assert_eq!(video.last_error.as_deref(), Some("manifest not found"));

        // FAILED is absorbing: nothing left to claim.
        assert!(repo.claim_next(Stage::Discovered, "w-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_stuck_honors_threshold() {
        let (_dir, repo) = test_repo().await;
        repo.upsert_discovered(&new_video("A")).await.unwrap();
        let claimed = repo
            .claim_next(Stage::Discovered, "w-1")
            .await
            .unwrap()
            .unwrap();

        // A fresh lease is not stuck.
        let stuck = repo
            .find_stuck(Stage::Resolving, claimed.stage_entered_at - 1)
            .await
            .unwrap();
        assert!(stuck.is_empty());

        // Past the cutoff it is.
        let stuck = repo
            .find_stuck(Stage::Resolving, claimed.stage_entered_at + 1)
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, claimed.id);
    }

    #[tokio::test]
    async fn test_stats_counts_by_stage() {
        let (_dir, repo) = test_repo().await;
        repo.upsert_discovered(&new_video("A")).await.unwrap();
        repo.upsert_discovered(&new_video("B")).await.unwrap();
        repo.claim_next(Stage::Discovered, "w-1").await.unwrap().unwrap();

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.discovered, 1);
        assert_eq!(stats.in_progress, 1);
    }
}
