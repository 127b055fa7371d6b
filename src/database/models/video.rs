//! Video registry database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{RawDescriptor, Source, Stage, video_id};
use crate::{Error, Result};

/// Video registry database model.
///
/// One row per discovered recording. Rows are never deleted; permanent
/// failure is a recorded stage, which also keeps re-discovery from
/// re-creating a broken video.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VideoDbModel {
    pub id: String,
    /// Source archive: house, senate.
    pub source: String,
    /// JSON blob of the immutable discovery descriptor.
    pub descriptor: String,
    /// Resolved, directly fetchable stream address.
    pub stream_locator: Option<String>,
    /// Path of the downloaded media artifact.
    pub artifact_path: Option<String>,
    /// Id of the stored transcript row.
    pub transcript_id: Option<String>,
    /// Stage: DISCOVERED, RESOLVING, RESOLVED, DOWNLOADING, DOWNLOADED,
    /// TRANSCRIBING, TRANSCRIBED, FAILED.
    pub stage: String,
    /// The in-progress stage a FAILED record failed at.
    pub failed_stage: Option<String>,
    /// Attempts at the current stage; reset to zero on successful advance.
    pub attempt_count: i64,
    /// Epoch ms of the last stage transition; stuck-detection basis.
    pub stage_entered_at: i64,
    pub lease_owner: Option<String>,
    pub lease_acquired_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl VideoDbModel {
    /// Parsed current stage. Rejects rows whose stage string is not in the
    /// closed enum rather than guessing.
    pub fn current_stage(&self) -> Result<Stage> {
        Stage::parse(&self.stage)
            .ok_or_else(|| Error::Database(format!("unknown stage '{}' for {}", self.stage, self.id)))
    }

    pub fn source(&self) -> Result<Source> {
        Source::parse(&self.source).ok_or_else(|| {
            Error::Database(format!("unknown source '{}' for {}", self.source, self.id))
        })
    }

    /// Deserialize the discovery descriptor blob.
    pub fn descriptor(&self) -> Result<RawDescriptor> {
        Ok(serde_json::from_str(&self.descriptor)?)
    }
}

/// Insert payload for a newly discovered video.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub id: String,
    pub source: Source,
    pub descriptor_json: String,
}

impl NewVideo {
    pub fn from_descriptor(source: Source, descriptor: &RawDescriptor) -> Result<Self> {
        Ok(Self {
            id: video_id(source, &descriptor.natural_key),
            source,
            descriptor_json: serde_json::to_string(descriptor)?,
        })
    }
}

/// The reference a successful stage action produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StageProduct {
    /// `RESOLVING -> RESOLVED`: fetchable stream address.
    StreamLocator(String),
    /// `DOWNLOADING -> DOWNLOADED`: local media artifact path.
    Artifact(String),
    /// `TRANSCRIBING -> TRANSCRIBED`: stored transcript row id.
    Transcript(String),
}

impl StageProduct {
    /// The advance this product is valid for.
    pub fn advances_from(&self) -> Stage {
        match self {
            Self::StreamLocator(_) => Stage::Resolving,
            Self::Artifact(_) => Stage::Downloading,
            Self::Transcript(_) => Stage::Transcribing,
        }
    }
}

/// Outcome of recording a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Requeued to the prior ready stage; attempts remain.
    Requeued,
    /// Attempt budget exhausted; record is now FAILED.
    FailedPermanently,
}

/// High-level pipeline counts for operator visibility.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub total: u64,
    pub discovered: u64,
    pub in_progress: u64,
    pub resolved: u64,
    pub downloaded: u64,
    pub transcribed: u64,
    pub failed: u64,
}
