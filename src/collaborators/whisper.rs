//! Whisper-compatible transcription client.
//!
//! Posts the media artifact to an OpenAI-compatible
//! `audio/transcriptions` endpoint with `response_format=verbose_json` and
//! maps the returned segments. Works against the hosted API or a local
//! whisper server exposing the same contract.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::database::models::TranscriptSegment;
use crate::pipeline::{StageError, Transcriber, TranscriptData};

/// Default transcription model.
pub const DEFAULT_MODEL: &str = "whisper-1";

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
    speaker: Option<String>,
}

/// Client for an OpenAI-compatible transcription endpoint.
pub struct WhisperApiTranscriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl WhisperApiTranscriber {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }

    fn classify_status(status: reqwest::StatusCode) -> StageError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            StageError::transient(format!("transcription endpoint returned {status}"))
        } else {
            // Bad request/unsupported media: retrying the same artifact
            // cannot succeed.
            StageError::permanent(format!("transcription endpoint returned {status}"))
        }
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(&self, artifact: &Path) -> Result<TranscriptData, StageError> {
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp4".to_string());

        let bytes = tokio::fs::read(artifact)
            .await
            .map_err(|e| match e.kind() {
                // A missing artifact cannot come back on retry of this stage.
                std::io::ErrorKind::NotFound => {
                    StageError::permanent(format!("artifact missing: {}", artifact.display()))
                }
                _ => StageError::transient(format!("read artifact: {e}")),
            })?;

        debug!(
            "Transcribing {} ({} bytes) via {}",
            artifact.display(),
            bytes.len(),
            self.endpoint
        );

        let file_part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StageError::transient(format!("transcription request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }

        let parsed: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| StageError::transient(format!("transcription response: {e}")))?;

        let segments = parsed
            .segments
            .into_iter()
            .map(|s| TranscriptSegment {
                start_secs: s.start,
                end_secs: s.end,
                text: s.text.trim().to_string(),
                speaker: s.speaker,
            })
            .collect();

        Ok(TranscriptData {
            provider: self.model.clone(),
            text: parsed.text,
            segments,
        })
    }
}
