//! Stage collaborator traits and the stage-action error taxonomy.
//!
//! The registry core is agnostic to how streams are resolved, bytes are
//! fetched, or audio is transcribed; it only requires that each action
//! returns success-with-reference or failure-with-reason, and that actions
//! tolerate re-invocation for the same record (overwrite, not append).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::database::models::{TranscriptSegment, VideoDbModel};

/// Failure of an external stage action.
///
/// The distinction drives the state machine: transient failures are
/// retried within the attempt budget, permanent ones fail fast. Both
/// count as one attempt for auditability.
#[derive(Error, Debug)]
pub enum StageError {
    /// Network hiccup, rate limit, timeout: worth retrying.
    #[error("{0}")]
    Transient(String),
    /// Content removed, malformed source: retrying cannot help.
    #[error("{0}")]
    Permanent(String),
}

impl StageError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Resolves a discovered video to a directly fetchable stream address.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, video: &VideoDbModel) -> Result<String, StageError>;
}

/// Fetches the media behind a stream locator into local storage.
///
/// Implementations must be safe to invoke more than once for the same
/// record: a retried fetch overwrites the destination rather than
/// appending to it.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(
        &self,
        stream_locator: &str,
        dest_dir: &Path,
        video_id: &str,
    ) -> Result<PathBuf, StageError>;
}

/// Structured output of a transcription backend.
#[derive(Debug, Clone)]
pub struct TranscriptData {
    pub provider: String,
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

/// Transcribes a downloaded media artifact.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, artifact: &Path) -> Result<TranscriptData, StageError>;
}
