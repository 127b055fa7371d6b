//! HTTP media fetcher.
//!
//! Streams the media behind a stream locator to local storage. Writes go
//! to a `.part` temp file that is renamed into place on completion, so a
//! retried fetch overwrites the destination atomically, which keeps
//! re-invocation safe under at-least-once delivery.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::pipeline::{MediaFetcher, StageError};

/// Direct HTTP fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Derive the artifact filename from the locator path, defaulting to
    /// `.mp4` when the URL carries no usable extension.
    fn artifact_name(stream_locator: &str, video_id: &str) -> String {
        let ext = url::Url::parse(stream_locator)
            .ok()
            .and_then(|u| {
                Path::new(u.path())
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
            })
            .filter(|e| !e.is_empty() && e.len() <= 4)
            .unwrap_or_else(|| "mp4".to_string());
        // Registry ids contain a ':' separator, which is not filename-safe.
        format!("{}.{}", video_id.replace(':', "_"), ext)
    }

    fn classify_status(status: reqwest::StatusCode) -> StageError {
        if matches!(
            status,
            reqwest::StatusCode::NOT_FOUND
                | reqwest::StatusCode::GONE
                | reqwest::StatusCode::FORBIDDEN
                | reqwest::StatusCode::UNAUTHORIZED
        ) {
            StageError::permanent(format!("fetch returned {status}"))
        } else {
            StageError::transient(format!("fetch returned {status}"))
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(
        &self,
        stream_locator: &str,
        dest_dir: &Path,
        video_id: &str,
    ) -> Result<PathBuf, StageError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| StageError::transient(format!("create {}: {e}", dest_dir.display())))?;

        let final_path = dest_dir.join(Self::artifact_name(stream_locator, video_id));
        let part_path = final_path.with_extension("part");

        debug!("Fetching {} -> {}", stream_locator, final_path.display());

        let response = self
            .client
            .get(stream_locator)
            .send()
            .await
            .map_err(|e| StageError::transient(format!("fetch request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }

        let mut file = tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| StageError::transient(format!("create {}: {e}", part_path.display())))?;

        let mut bytes_downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StageError::transient(format!("fetch stream: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StageError::transient(format!("write artifact: {e}")))?;
            bytes_downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| StageError::transient(format!("flush artifact: {e}")))?;
        drop(file);

        if bytes_downloaded == 0 {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(StageError::transient("fetch produced an empty artifact"));
        }

        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| StageError::transient(format!("finalize artifact: {e}")))?;

        info!(
            "Fetched {} ({} bytes) for {}",
            final_path.display(),
            bytes_downloaded,
            video_id
        );

        Ok(final_path)
    }
}
