//! Michigan Senate archive scraper and stream resolver.
//!
//! The Senate archive is fronted by a JSON API: the recents endpoint
//! returns `{ "allFiles": [...] }` with one object per recording, and the
//! upload/get endpoint maps a file id to its HLS manifest URL the same way
//! the web player does. A documented CloudFront URL pattern serves as the
//! resolution fallback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::database::models::VideoDbModel;
use crate::discovery::{ArchiveScraper, ScrapeError};
use crate::domain::{RawDescriptor, Source};
use crate::pipeline::{StageError, StreamResolver};

/// Default Senate recents API endpoint.
pub const DEFAULT_API_URL: &str =
    "https://2kbyogxrg4.execute-api.us-west-2.amazonaws.com/61b3adc8124d7d000891ca5c/home/recent";

/// Default Senate stream resolution endpoint.
pub const DEFAULT_RESOLVE_URL: &str =
    "https://imd0mxanj2.execute-api.us-west-2.amazonaws.com/upload/get";

/// Senate organization id expected by the resolution endpoint.
pub const SENATE_ORG_ID: &str = "61b3adc8124d7d000891ca5c";

const PLAYER_BASE_URL: &str = "https://cloud.castus.tv/vod/misenate/video";
const CLOUDFRONT_FALLBACK_BASE: &str = "https://dlttx48mxf9m3.cloudfront.net/outputs";

#[derive(Debug, Deserialize)]
struct RecentsResponse {
    #[serde(default, rename = "allFiles")]
    all_files: Vec<SenateFile>,
}

#[derive(Debug, Deserialize)]
struct SenateFile {
    #[serde(rename = "_id")]
    id: Option<String>,
    title: Option<String>,
    name: Option<String>,
    date: Option<String>,
    #[serde(default)]
    metadata: Option<SenateMetadata>,
    #[serde(default)]
    agenda: Option<SenateAgenda>,
}

#[derive(Debug, Default, Deserialize)]
struct SenateMetadata {
    title: Option<String>,
    committee: Option<String>,
    playlist: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SenateAgenda {
    name: Option<String>,
    title: Option<String>,
}

impl SenateFile {
    fn title(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.title.clone())
            .or_else(|| self.title.clone())
            .or_else(|| self.name.clone())
    }

    fn committee(&self) -> Option<String> {
        self.agenda
            .as_ref()
            .and_then(|a| a.name.clone().or_else(|| a.title.clone()))
            .or_else(|| {
                self.metadata
                    .as_ref()
                    .and_then(|m| m.committee.clone().or_else(|| m.playlist.clone()))
            })
    }
}

/// Scraper for the Senate video archive.
pub struct SenateScraper {
    client: reqwest::Client,
    api_url: String,
}

impl SenateScraper {
    pub fn new(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }

    fn parse_files(&self, files: Vec<SenateFile>, cutoff: DateTime<Utc>) -> Vec<RawDescriptor> {
        let mut descriptors = Vec::new();

        for file in files {
            let Some(id) = file.id.clone().filter(|id| !id.is_empty()) else {
                continue;
            };

            let Some(recorded_at) = file
                .date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&Utc))
            else {
                warn!("Could not parse Senate date from: {:?}", file.date);
                continue;
            };

            if recorded_at < cutoff {
                continue;
            }

            descriptors.push(RawDescriptor {
                title: file.title().unwrap_or_else(|| id.clone()),
                committee: file.committee(),
                recorded_at,
                page_url: format!("{PLAYER_BASE_URL}/{id}"),
                natural_key: id,
            });
        }

        descriptors
    }
}

#[async_trait]
impl ArchiveScraper for SenateScraper {
    fn source(&self) -> Source {
        Source::Senate
    }

    async fn discover(&self, cutoff: DateTime<Utc>) -> Result<Vec<RawDescriptor>, ScrapeError> {
        debug!("Fetching Senate recents: {}", self.api_url);

        let response = self
            .client
            .get(&self.api_url)
            .header("Accept", "application/json, text/plain, */*")
            .header("Origin", "https://cloud.castus.tv")
            .header("Referer", "https://cloud.castus.tv/vod/misenate/")
            .send()
            .await?
            .error_for_status()?;

        let recents: RecentsResponse = response.json().await?;

        if recents.all_files.is_empty() {
            warn!("Senate API returned an empty file list");
        }

        Ok(self.parse_files(recents.all_files, cutoff))
    }
}

/// Resolves Senate stream locators through the upload/get API, falling back
/// to the CloudFront output pattern.
pub struct SenateResolver {
    client: reqwest::Client,
    resolve_url: String,
}

impl SenateResolver {
    pub fn new(client: reqwest::Client, resolve_url: impl Into<String>) -> Self {
        Self {
            client,
            resolve_url: resolve_url.into(),
        }
    }

    fn natural_key(video: &VideoDbModel) -> Result<String, StageError> {
        video
            .descriptor()
            .map(|d| d.natural_key)
            .map_err(|e| StageError::permanent(format!("bad descriptor: {e}")))
    }

    fn fallback_locator(file_id: &str) -> String {
        format!("{CLOUDFRONT_FALLBACK_BASE}/{file_id}/Default/HLS/out.m3u8")
    }
}

#[async_trait]
impl StreamResolver for SenateResolver {
    async fn resolve(&self, video: &VideoDbModel) -> Result<String, StageError> {
        let file_id = Self::natural_key(video)?;

        let payload = json!({
            "file": file_id,
            "type": "HLS",
            "user": SENATE_ORG_ID,
        });

        let attempt = self
            .client
            .post(&self.resolve_url)
            .header("Referer", "https://cloud.castus.tv/vod/misenate/")
            .header("Origin", "https://cloud.castus.tv")
            .json(&payload)
            .send()
            .await;

        match attempt {
            Ok(response) if response.status().is_success() => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| StageError::transient(format!("resolve response read: {e}")))?;

                if let Some(locator) = body
                    .pointer("/response/payload/data")
                    .and_then(|v| v.as_str())
                {
                    // Strip query parameters; signed fragments expire and the
                    // locator may sit in the registry for a while.
                    let clean = locator.split('?').next().unwrap_or(locator);
                    return Ok(clean.to_string());
                }

                debug!("Senate resolve API returned no payload for {}", file_id);
            }
            Ok(response) => {
                debug!(
                    "Senate resolve API returned {} for {}",
                    response.status(),
                    file_id
                );
            }
            Err(e) => {
                debug!("Senate resolve API call failed for {}: {}", file_id, e);
            }
        }

        Ok(Self::fallback_locator(&file_id))
    }
}
