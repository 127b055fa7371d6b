//! Michigan House archive scraper and stream resolver.
//!
//! The archive exposes a partial-render handler that returns the year's
//! listing as an HTML fragment of committee `<li>` blocks, each holding
//! anchors of the form `/VideoArchivePlayer?video=HAGRI-022025.mp4` whose
//! text is the recording date ("Thursday, February 20, 2025"). Stream
//! resolution fetches the player page and extracts the HLS manifest URL.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::database::models::VideoDbModel;
use crate::discovery::{ArchiveScraper, ScrapeError};
use crate::domain::{RawDescriptor, Source};
use crate::pipeline::{StageError, StreamResolver};

/// Default House archive listing endpoint.
pub const DEFAULT_ARCHIVE_URL: &str = "https://house.mi.gov/VideoArchive";

static VIDEO_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    // href="/VideoArchivePlayer?video=HAGRI-022025.mp4">Thursday, February 20, 2025<
    Regex::new(r#"(?s)href="[^"]*?/VideoArchivePlayer\?video=([^"&]+?)(?:\.mp4)?"[^>]*>\s*([^<]+?)\s*<"#)
        .expect("valid video link regex")
});

static COMMITTEE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // <strong>Agriculture | 12 videos</strong>
    Regex::new(r"<strong>\s*([^<|]+?)\s*(?:\|[^<]*)?</strong>").expect("valid committee regex")
});

static MANIFEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^"'\s\\]+\.m3u8[^"'\s\\]*"#).expect("valid manifest regex")
});

/// Scraper for the House video archive.
pub struct HouseScraper {
    client: reqwest::Client,
    archive_url: String,
    base_url: String,
}

impl HouseScraper {
    pub fn new(client: reqwest::Client, archive_url: impl Into<String>) -> Self {
        let archive_url = archive_url.into();
        let base_url = url::Url::parse(&archive_url)
            .ok()
            .and_then(|u| u.join("/").ok())
            .map(|u| u.as_str().trim_end_matches('/').to_string())
            .unwrap_or_else(|| "https://house.mi.gov".to_string());
        Self {
            client,
            archive_url,
            base_url,
        }
    }

    async fn fetch_year(&self, year: i32) -> Result<String, ScrapeError> {
        let handler_url = format!(
            "{}?handler=ArchiveVideoPartial&Year={}&Type=All&Date=",
            self.archive_url, year
        );
        debug!("Fetching House archive for year {}: {}", year, handler_url);

        let response = self.client.get(&handler_url).send().await?;
        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Parse one year's HTML fragment into descriptors.
    fn parse_listing(&self, html: &str, cutoff: DateTime<Utc>) -> Vec<RawDescriptor> {
        let mut descriptors = Vec::new();

        // Committee blocks arrive in document order; the committee heading
        // preceding a link names its committee.
        let mut committees: Vec<(usize, String)> = COMMITTEE_RE
            .captures_iter(html)
            .filter_map(|c| {
                let m = c.get(0)?;
                Some((m.start(), c.get(1)?.as_str().trim().to_string()))
            })
            .collect();
        committees.sort_by_key(|(pos, _)| *pos);

        for capture in VIDEO_LINK_RE.captures_iter(html) {
            let (Some(whole), Some(key), Some(text)) =
                (capture.get(0), capture.get(1), capture.get(2))
            else {
                continue;
            };

            let natural_key = key.as_str().trim().to_string();
            let link_text = text.as_str().trim();

            let Some(recorded_at) = parse_house_date(link_text) else {
                warn!("Could not parse House date from: {}", link_text);
                continue;
            };
            if recorded_at < cutoff {
                continue;
            }

            let committee = committees
                .iter()
                .rev()
                .find(|(pos, _)| *pos < whole.start())
                .map(|(_, name)| name.clone());

            descriptors.push(RawDescriptor {
                title: committee
                    .as_deref()
                    .map(|c| format!("{} - {}", c, link_text))
                    .unwrap_or_else(|| link_text.to_string()),
                page_url: format!(
                    "{}/VideoArchivePlayer?video={}.mp4",
                    self.base_url, natural_key
                ),
                natural_key,
                committee,
                recorded_at,
            });
        }

        descriptors
    }
}

#[async_trait]
impl ArchiveScraper for HouseScraper {
    fn source(&self) -> Source {
        Source::House
    }

    async fn discover(&self, cutoff: DateTime<Utc>) -> Result<Vec<RawDescriptor>, ScrapeError> {
        use chrono::Datelike;

        let current_year = Utc::now().year();
        let mut descriptors = Vec::new();

        for year in cutoff.year()..=current_year {
            match self.fetch_year(year).await {
                Ok(html) => descriptors.extend(self.parse_listing(&html, cutoff)),
                // One bad year must not sink the rest of the listing.
                Err(e) => warn!("Failed to fetch House archive for year {}: {}", year, e),
            }
        }

        Ok(descriptors)
    }
}

/// Parse a House link text date like "Thursday, February 20, 2025".
fn parse_house_date(text: &str) -> Option<DateTime<Utc>> {
    let without_weekday = text.split_once(", ").map(|(_, rest)| rest).unwrap_or(text);
    let date = NaiveDate::parse_from_str(without_weekday, "%B %d, %Y").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Resolves House stream locators by extracting the HLS manifest URL from
/// the player page.
pub struct HouseResolver {
    client: reqwest::Client,
}

impl HouseResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamResolver for HouseResolver {
    async fn resolve(&self, video: &VideoDbModel) -> Result<String, StageError> {
        let descriptor = video
            .descriptor()
            .map_err(|e| StageError::permanent(format!("bad descriptor: {e}")))?;

        let response = self
            .client
            .get(&descriptor.page_url)
            .send()
            .await
            .map_err(|e| StageError::transient(format!("player page fetch: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(StageError::permanent(format!(
                "player page returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(StageError::transient(format!(
                "player page returned {status}"
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| StageError::transient(format!("player page read: {e}")))?;

        MANIFEST_RE
            .find(&html)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                // Page loaded but carries no manifest: the page structure
                // changed or the recording was pulled.
                StageError::permanent("no HLS manifest found in player page")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <ul>
          <li><strong>Agriculture | 2 videos</strong>
            <a href="/VideoArchivePlayer?video=HAGRI-022025.mp4">Thursday, February 20, 2025</a>
            <a href="/VideoArchivePlayer?video=HAGRI-011525.mp4">Wednesday, January 15, 2025</a>
          </li>
          <li><strong>Appropriations | 1 video</strong>
            <a href="/VideoArchivePlayer?video=HAPPR-030125.mp4">Saturday, March 1, 2025</a>
          </li>
        </ul>
    "#;

    fn scraper() -> HouseScraper {
        HouseScraper::new(reqwest::Client::new(), DEFAULT_ARCHIVE_URL)
    }

    #[test]
    fn test_parse_house_date() {
        let parsed = parse_house_date("Thursday, February 20, 2025").unwrap();
        assert_eq!(parsed.date_naive(), NaiveDate::from_ymd_opt(2025, 2, 20).unwrap());
        assert!(parse_house_date("not a date").is_none());
    }

    #[test]
    fn test_parse_listing_extracts_descriptors() {
        let cutoff = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let descriptors = scraper().parse_listing(LISTING, cutoff);

        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[0].natural_key, "HAGRI-022025");
        assert_eq!(descriptors[0].committee.as_deref(), Some("Agriculture"));
        assert_eq!(descriptors[2].committee.as_deref(), Some("Appropriations"));
        assert!(descriptors[0].page_url.contains("video=HAGRI-022025.mp4"));
    }

    #[test]
    fn test_parse_listing_honors_cutoff() {
        let cutoff = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let descriptors = scraper().parse_listing(LISTING, cutoff);

        let keys: Vec<_> = descriptors.iter().map(|d| d.natural_key.as_str()).collect();
        assert_eq!(keys, vec!["HAGRI-022025", "HAPPR-030125"]);
    }

    #[test]
    fn test_manifest_regex() {
        let html = r#"<script>var src = "https://cdn.example.net/out/v1/abc/index.m3u8?x=1";</script>"#;
        let found = MANIFEST_RE.find(html).unwrap();
        assert!(found.as_str().starts_with("https://cdn.example.net"));
        assert!(found.as_str().contains(".m3u8"));
    }
}
