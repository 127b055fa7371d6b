//! Transcript registry database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Result;
use crate::database::time::now_ms;

/// Transcript database model: searchable full text plus timed segments.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TranscriptDbModel {
    pub id: String,
    pub video_id: String,
    /// Transcription backend that produced this row.
    pub provider: String,
    /// Full transcript text, used for substring search.
    pub content: String,
    /// JSON array of `TranscriptSegment`.
    pub segments: String,
    pub created_at: i64,
}

impl TranscriptDbModel {
    pub fn new(
        video_id: impl Into<String>,
        provider: impl Into<String>,
        content: impl Into<String>,
        segments: &[TranscriptSegment],
    ) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            video_id: video_id.into(),
            provider: provider.into(),
            content: content.into(),
            segments: serde_json::to_string(segments)?,
            created_at: now_ms(),
        })
    }

    pub fn segments(&self) -> Result<Vec<TranscriptSegment>> {
        Ok(serde_json::from_str(&self.segments)?)
    }
}

/// One timed span of transcript text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_segments_round_trip() {
        let segments = vec![
            TranscriptSegment {
                start_secs: 0.0,
                end_secs: 4.2,
                text: "The committee will come to order.".to_string(),
                speaker: Some("Chair".to_string()),
            },
            TranscriptSegment {
                start_secs: 4.2,
                end_secs: 9.0,
                text: "Roll call, please.".to_string(),
                speaker: None,
            },
        ];
        let model =
            TranscriptDbModel::new("house:HAGRI-022025", "whisper", "full text", &segments).unwrap();
        assert_eq!(model.segments().unwrap(), segments);
        assert!(!model.id.is_empty());
    }
}
