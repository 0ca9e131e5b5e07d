//! Self-hosted JSON feeds.
//!
//! ```json
//! { "versions": [
//!     { "version": "1.4.2", "url": "https://example.com/editor-1.4.2.zip",
//!       "sha256": "…", "notes_url": "https://example.com/notes/1.4.2",
//!       "date": "2026-03-01T12:00:00Z" }
//! ] }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{CheckError, CheckFuture, UpdateCheck};
use crate::bundle::{AppRecord, RemoteVersion, UpdateSource};
use crate::version::Version;

#[derive(Debug, Deserialize)]
pub(crate) struct Feed {
    #[serde(default)]
    versions: Vec<FeedEntry>,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    version: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    notes_url: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

/// Pick the highest parseable version in a feed
pub(crate) fn newest_entry(feed: Feed) -> Option<RemoteVersion> {
    feed.versions
        .into_iter()
        .filter_map(|entry| match Version::parse(&entry.version) {
            Ok(version) => Some(RemoteVersion {
                version,
                download_url: entry.url,
                sha256: entry.sha256.map(|hash| hash.to_ascii_lowercase()),
                release_notes_url: entry.notes_url,
                store_url: None,
                date: entry.date,
            }),
            Err(e) => {
                tracing::debug!("Ignoring feed entry: {}", e);
                None
            }
        })
        .max_by(|a, b| a.version.cmp(&b.version))
}

/// Checks applications against their self-hosted feed
#[derive(Clone)]
pub struct FeedSource {
    client: reqwest::Client,
}

impl FeedSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl UpdateCheck for FeedSource {
    fn check(&self, app: Arc<AppRecord>) -> CheckFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let UpdateSource::Feed { url } = &app.source else {
                return Err(CheckError::WrongSource(app.id.to_string()));
            };

            let response = client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(CheckError::Status(response.status()));
            }

            let feed: Feed = response
                .json()
                .await
                .map_err(|e| CheckError::InvalidResponse(e.to_string()))?;

            let newest = newest_entry(feed);
            tracing::debug!(
                "{}: feed offers {}",
                app.id,
                newest
                    .as_ref()
                    .map(|r| r.version.to_string())
                    .unwrap_or_else(|| "nothing".to_string())
            );
            Ok(newest)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_entry_picks_highest_version() {
        let feed: Feed = serde_json::from_str(
            r#"{ "versions": [
                { "version": "1.9", "url": "https://example.com/1.9.zip" },
                { "version": "1.10", "url": "https://example.com/1.10.zip",
                  "sha256": "ABCDEF", "date": "2026-03-01T12:00:00Z" },
                { "version": "nightly" }
            ] }"#,
        )
        .unwrap();

        let newest = newest_entry(feed).unwrap();
        assert_eq!(newest.version.as_str(), "1.10");
        assert_eq!(newest.download_url.as_deref(), Some("https://example.com/1.10.zip"));
        assert_eq!(newest.sha256.as_deref(), Some("abcdef"));
        assert!(newest.date.is_some());
    }

    #[test]
    fn test_empty_feed_has_no_entry() {
        let feed: Feed = serde_json::from_str("{}").unwrap();
        assert!(newest_entry(feed).is_none());
    }
}
