//! Update sources.
//!
//! This module provides:
//!
//! - `UpdateCheck`: the seam the provider checks applications through
//! - `FeedSource`: self-hosted JSON feeds listing available versions
//! - `StoreSource`: catalog lookups by store id
//! - `SourceRouter`: dispatches each application to its source
//!
//! A check reports the newest version the source offers; whether that is an
//! update is decided by comparing it with the installed version.

mod feed;
mod store;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::bundle::{AppRecord, RemoteVersion, UpdateSource};
use crate::config::NetworkConfig;

pub use feed::FeedSource;
pub use store::StoreSource;

/// User agent for source requests
const USER_AGENT: &str = concat!("Freshen/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while checking a single application
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Source responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Source does not match application: {0}")]
    WrongSource(String),

    #[error("Check panicked")]
    Panicked,
}

/// Future returned by an update check
pub type CheckFuture = BoxFuture<'static, Result<Option<RemoteVersion>, CheckError>>;

/// Asynchronously determines the newest version available for an application.
///
/// `Ok(None)` means the source has nothing to offer.
pub trait UpdateCheck: Send + Sync {
    fn check(&self, app: Arc<AppRecord>) -> CheckFuture;
}

/// Build the HTTP client shared by all sources
pub fn http_client(config: &NetworkConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
}

/// Routes each application to the source its manifest names
#[derive(Clone)]
pub struct SourceRouter {
    feed: FeedSource,
    store: StoreSource,
}

impl SourceRouter {
    pub fn new(client: reqwest::Client, config: &NetworkConfig) -> Self {
        Self {
            feed: FeedSource::new(client.clone()),
            store: StoreSource::new(client, config.store_lookup_url.clone()),
        }
    }
}

impl UpdateCheck for SourceRouter {
    fn check(&self, app: Arc<AppRecord>) -> CheckFuture {
        match &app.source {
            UpdateSource::Feed { .. } => self.feed.check(app),
            UpdateSource::Store { .. } => self.store.check(app),
            UpdateSource::Unsupported => Box::pin(async { Ok(None) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    #[tokio::test]
    async fn test_unsupported_apps_have_no_update() {
        let config = NetworkConfig::default();
        let router = SourceRouter::new(http_client(&config).unwrap(), &config);
        let app = AppRecord::new(
            "com.example.legacy",
            "Legacy",
            "/apps/legacy",
            Version::parse("1.0").unwrap(),
            UpdateSource::Unsupported,
        );

        let result = router.check(Arc::new(app)).await.unwrap();
        assert!(result.is_none());
    }
}
