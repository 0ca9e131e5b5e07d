//! Store catalog lookups.
//!
//! The lookup endpoint is queried with `?id=<store_id>` and answers with a
//! list of matching catalog entries; the first one describes the app.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{CheckError, CheckFuture, UpdateCheck};
use crate::bundle::{AppRecord, RemoteVersion, UpdateSource};
use crate::version::Version;

#[derive(Debug, Deserialize)]
pub(crate) struct LookupResponse {
    #[serde(default)]
    results: Vec<LookupEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupEntry {
    version: String,
    #[serde(default)]
    track_view_url: Option<String>,
    #[serde(default)]
    current_version_release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    release_notes_url: Option<String>,
}

pub(crate) fn first_result(response: LookupResponse) -> Result<Option<RemoteVersion>, CheckError> {
    let Some(entry) = response.results.into_iter().next() else {
        return Ok(None);
    };

    let version = Version::parse(&entry.version)
        .map_err(|e| CheckError::InvalidResponse(e.to_string()))?;

    Ok(Some(RemoteVersion {
        version,
        download_url: None,
        sha256: None,
        release_notes_url: entry.release_notes_url,
        store_url: entry.track_view_url,
        date: entry.current_version_release_date,
    }))
}

/// Checks applications against the store catalog
#[derive(Clone)]
pub struct StoreSource {
    client: reqwest::Client,
    lookup_url: String,
}

impl StoreSource {
    pub fn new(client: reqwest::Client, lookup_url: String) -> Self {
        Self { client, lookup_url }
    }
}

impl UpdateCheck for StoreSource {
    fn check(&self, app: Arc<AppRecord>) -> CheckFuture {
        let client = self.client.clone();
        let lookup_url = self.lookup_url.clone();
        Box::pin(async move {
            let UpdateSource::Store { store_id } = &app.source else {
                return Err(CheckError::WrongSource(app.id.to_string()));
            };

            let response = client
                .get(&lookup_url)
                .query(&[("id", store_id.as_str())])
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(CheckError::Status(response.status()));
            }

            let lookup: LookupResponse = response
                .json()
                .await
                .map_err(|e| CheckError::InvalidResponse(e.to_string()))?;
            first_result(lookup)
        })
    }
}
