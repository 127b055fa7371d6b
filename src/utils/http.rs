//! Shared HTTP client construction.

use std::time::Duration;

use crate::Result;

/// Browser-like user agent; both archives refuse requests without one.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Build a `reqwest::Client` for archive scraping and resolution calls.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(15))
        .pool_max_idle_per_host(4)
        .build()?;
    Ok(client)
}

/// Build a `reqwest::Client` for long-running media fetches.
///
/// No overall request timeout: downloads may legitimately run for a long
/// time; the stage action timeout bounds them instead.
pub fn build_download_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .connect_timeout(Duration::from_secs(15))
        .build()?;
    Ok(client)
}
