//! The executor used outside of tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::download::{archive_file_name, download_archive};
use super::install::{extract_archive, locate_bundle_root, swap_bundle, verify_checksum};
use super::{CancelToken, ProgressReporter, UpdateError, UpdateExecutor, UpdateFuture};
use crate::bundle::{AppRecord, UpdateSource};
use crate::operation::UpdateState;

/// Installs feed updates in place and hands store updates to the store page.
#[derive(Clone)]
pub struct BundleInstaller {
    client: reqwest::Client,
    downloads: PathBuf,
}

impl BundleInstaller {
    pub fn new(client: reqwest::Client, downloads: PathBuf) -> Self {
        Self { client, downloads }
    }
}

impl UpdateExecutor for BundleInstaller {
    fn execute(
        &self,
        app: Arc<AppRecord>,
        progress: ProgressReporter,
        cancel: CancelToken,
    ) -> UpdateFuture {
        let installer = self.clone();
        Box::pin(async move { installer.run(app, progress, cancel).await })
    }
}

impl BundleInstaller {
    async fn run(
        self,
        app: Arc<AppRecord>,
        progress: ProgressReporter,
        mut cancel: CancelToken,
    ) -> Result<(), UpdateError> {
        progress.report(UpdateState::Initializing);
        cancel.check()?;

        let remote = app
            .remote
            .clone()
            .filter(|_| app.update_available)
            .ok_or_else(|| UpdateError::NoUpdate(app.id.clone()))?;

        match &app.source {
            UpdateSource::Store { .. } => {
                let url = remote
                    .store_url
                    .ok_or_else(|| UpdateError::MissingDownload(app.id.clone()))?;
                progress.report(UpdateState::Installing);
                tracing::info!("Opening store page for {}: {}", app.name, url);
                open::that(&url).map_err(|e| UpdateError::Open(e.to_string()))?;
                Ok(())
            }
            UpdateSource::Feed { .. } => {
                let url = remote
                    .download_url
                    .clone()
                    .ok_or_else(|| UpdateError::MissingDownload(app.id.clone()))?;

                // Phase 1: Download
                let archive_path = self
                    .downloads
                    .join(archive_file_name(app.id.as_str(), remote.version.as_str()));
                let download =
                    download_archive(&self.client, &url, &archive_path, &progress, &mut cancel)
                        .await?;
                tracing::info!("Downloaded {} bytes for {}", download.bytes, app.id);

                install_archive(&app, &download.file_path, remote.sha256.as_deref(), &progress, &cancel)
                    .await?;
                tracing::info!("Installed {} {}", app.name, remote.version);
                Ok(())
            }
            UpdateSource::Unsupported => Err(UpdateError::Unsupported(app.id.clone())),
        }
    }
}

/// Verify, extract and install a downloaded archive over `app`'s bundle.
///
/// The archive is deleted once the new bundle is in place.
async fn install_archive(
    app: &AppRecord,
    archive: &Path,
    sha256: Option<&str>,
    progress: &ProgressReporter,
    cancel: &CancelToken,
) -> Result<(), UpdateError> {
    if let Some(expected) = sha256 {
        verify_checksum(archive, expected).await?;
    }
    cancel.check()?;

    // Extract next to the bundle so the swap is a rename
    let parent = app
        .path
        .parent()
        .ok_or_else(|| UpdateError::Install(format!("{:?} has no parent", app.path)))?;
    let staging = tempfile::Builder::new()
        .prefix(".freshen-")
        .tempdir_in(parent)?;
    extract_archive(archive, staging.path(), progress).await?;
    cancel.check()?;

    progress.report(UpdateState::Installing);
    let new_root = locate_bundle_root(staging.path(), &app.id)?;
    swap_bundle(&new_root, &app.path).await?;

    if let Err(e) = tokio::fs::remove_file(archive).await {
        tracing::warn!("Failed to remove downloaded archive: {}", e);
    }
    Ok(())
}
