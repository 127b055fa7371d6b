//! Transcript registry repository.

use async_trait::async_trait;

use crate::database::models::TranscriptDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, WritePool};
use crate::{Error, Result};

/// Transcript repository trait.
#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    async fn insert(&self, transcript: &TranscriptDbModel) -> Result<()>;
    async fn get(&self, id: &str) -> Result<TranscriptDbModel>;
    async fn list_for_video(&self, video_id: &str) -> Result<Vec<TranscriptDbModel>>;
    /// Case-insensitive substring search over transcript text.
    async fn search(&self, query: &str, limit: i64) -> Result<Vec<TranscriptDbModel>>;
}

/// SQLx implementation of `TranscriptRepository`.
pub struct SqlxTranscriptRepository {
    pool: DbPool,
    write_pool: WritePool,
}

impl SqlxTranscriptRepository {
    pub fn new(pool: DbPool, write_pool: WritePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl TranscriptRepository for SqlxTranscriptRepository {
    async fn insert(&self, transcript: &TranscriptDbModel) -> Result<()> {
        retry_on_sqlite_busy("insert_transcript", || async {
            sqlx::query(
                r#"
                INSERT INTO transcripts (id, video_id, provider, content, segments, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&transcript.id)
            .bind(&transcript.video_id)
            .bind(&transcript.provider)
            .bind(&transcript.content)
            .bind(&transcript.segments)
            .bind(transcript.created_at)
            .execute(&self.write_pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<TranscriptDbModel> {
        sqlx::query_as::<_, TranscriptDbModel>("SELECT * FROM transcripts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Transcript", id))
    }

    async fn list_for_video(&self, video_id: &str) -> Result<Vec<TranscriptDbModel>> {
        let transcripts = sqlx::query_as::<_, TranscriptDbModel>(
            "SELECT * FROM transcripts WHERE video_id = ? ORDER BY created_at DESC",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transcripts)
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<TranscriptDbModel>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let transcripts = sqlx::query_as::<_, TranscriptDbModel>(
            r#"
            SELECT * FROM transcripts
            WHERE content LIKE ? ESCAPE '\'
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(transcripts)
    }
}
