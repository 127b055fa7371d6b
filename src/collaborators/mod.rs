//! Concrete collaborator implementations for the Michigan archives.
//!
//! Everything here is swappable: the pipeline core only sees the
//! `ArchiveScraper` / `StreamResolver` / `MediaFetcher` / `Transcriber`
//! traits.

pub mod fetcher;
pub mod house;
pub mod senate;
pub mod whisper;

pub use fetcher::HttpFetcher;
pub use house::{HouseResolver, HouseScraper};
pub use senate::{SenateResolver, SenateScraper};
pub use whisper::WhisperApiTranscriber;

use async_trait::async_trait;

use crate::database::models::VideoDbModel;
use crate::domain::Source;
use crate::pipeline::{StageError, StreamResolver};

/// Routes resolution to the archive-specific resolver by record source.
pub struct ArchiveResolver {
    house: HouseResolver,
    senate: SenateResolver,
}

impl ArchiveResolver {
    pub fn new(house: HouseResolver, senate: SenateResolver) -> Self {
        Self { house, senate }
    }
}

#[async_trait]
impl StreamResolver for ArchiveResolver {
    async fn resolve(&self, video: &VideoDbModel) -> Result<String, StageError> {
        let source = video
            .source()
            .map_err(|e| StageError::permanent(e.to_string()))?;
        match source {
            Source::House => self.house.resolve(video).await,
            Source::Senate => self.senate.resolve(video).await,
        }
    }
}
