//! Pipeline stage steps.
//!
//! Every step is structurally identical: a worker claims a ready record,
//! the step performs its external action through an injected collaborator,
//! and the worker commits the produced reference or records the failure.
//! Steps never touch the registry themselves beyond the transcript insert:
//! claim/commit/fail all happen in the worker loop so the lease handling is
//! in one place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::database::models::{StageProduct, TranscriptDbModel, VideoDbModel};
use crate::database::repositories::TranscriptRepository;
use crate::domain::Stage;

use super::traits::{MediaFetcher, StageError, StreamResolver, Transcriber};

/// A pipeline stage action.
#[async_trait]
pub trait StageStep: Send + Sync {
    /// The ready stage this step consumes.
    fn ready_stage(&self) -> Stage;

    /// Short name for logging and worker identity.
    fn name(&self) -> &'static str;

    /// Perform the external action for a claimed record.
    async fn execute(&self, video: &VideoDbModel) -> Result<StageProduct, StageError>;
}

/// `DISCOVERED -> RESOLVED`: attach a fetchable stream locator.
pub struct ResolutionStep {
    resolver: Arc<dyn StreamResolver>,
}

impl ResolutionStep {
    pub fn new(resolver: Arc<dyn StreamResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl StageStep for ResolutionStep {
    fn ready_stage(&self) -> Stage {
        Stage::Discovered
    }

    fn name(&self) -> &'static str {
        "resolve"
    }

    async fn execute(&self, video: &VideoDbModel) -> Result<StageProduct, StageError> {
        let locator = self.resolver.resolve(video).await?;
        Ok(StageProduct::StreamLocator(locator))
    }
}

/// `RESOLVED -> DOWNLOADED`: fetch the media artifact.
pub struct DownloadStep {
    fetcher: Arc<dyn MediaFetcher>,
    dest_dir: PathBuf,
}

impl DownloadStep {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            dest_dir: dest_dir.into(),
        }
    }
}

#[async_trait]
impl StageStep for DownloadStep {
    fn ready_stage(&self) -> Stage {
        Stage::Resolved
    }

    fn name(&self) -> &'static str {
        "download"
    }

    async fn execute(&self, video: &VideoDbModel) -> Result<StageProduct, StageError> {
        let locator = video.stream_locator.as_deref().ok_or_else(|| {
            // A RESOLVED record without a locator is corrupt; retrying
            // cannot produce one.
            StageError::permanent("record has no stream locator")
        })?;
        let path = self.fetcher.fetch(locator, &self.dest_dir, &video.id).await?;
        Ok(StageProduct::Artifact(path.to_string_lossy().into_owned()))
    }
}

/// `DOWNLOADED -> TRANSCRIBED`: transcribe the artifact and register the
/// transcript row.
pub struct TranscriptionStep {
    transcriber: Arc<dyn Transcriber>,
    transcripts: Arc<dyn TranscriptRepository>,
}

impl TranscriptionStep {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        transcripts: Arc<dyn TranscriptRepository>,
    ) -> Self {
        Self {
            transcriber,
            transcripts,
        }
    }
}

#[async_trait]
impl StageStep for TranscriptionStep {
    fn ready_stage(&self) -> Stage {
        Stage::Downloaded
    }

    fn name(&self) -> &'static str {
        "transcribe"
    }

    async fn execute(&self, video: &VideoDbModel) -> Result<StageProduct, StageError> {
        let artifact = video.artifact_path.as_deref().ok_or_else(|| {
            StageError::permanent("record has no artifact path")
        })?;

        let data = self.transcriber.transcribe(Path::new(artifact)).await?;

        let transcript =
            TranscriptDbModel::new(&video.id, &data.provider, &data.text, &data.segments)
                .map_err(|e| StageError::transient(format!("transcript encode: {e}")))?;

        // Inserted before the advance commits; if the commit loses the
        // optimistic-concurrency race the row is orphaned, which is
        // harmless; a re-run inserts a fresh row and transcript_id always
        // points at the winning one.
        self.transcripts
            .insert(&transcript)
            .await
            .map_err(|e| StageError::transient(format!("transcript insert: {e}")))?;

        Ok(StageProduct::Transcript(transcript.id))
    }
}
