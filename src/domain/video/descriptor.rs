//! Raw discovery descriptors and deterministic video identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::Source;

/// Opaque payload produced by discovery. Immutable once attached to a
/// registry row; re-discovery may refresh it but never touches pipeline
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDescriptor {
    /// Source-native identifier (House archive filename stem, Senate API id).
    pub natural_key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committee: Option<String>,
    pub recorded_at: DateTime<Utc>,
    /// Player/archive page the descriptor was scraped from.
    pub page_url: String,
}

/// Derive the registry id for a descriptor.
///
/// The id must be deterministic and collision-free across re-discovery of
/// the same video; `source` partitions the keyspace so House and Senate
/// natural keys can never collide.
pub fn video_id(source: Source, natural_key: &str) -> String {
    format!("{}:{}", source.as_str(), natural_key)
}
