//! Download functionality for feed updates.

use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use super::{CancelToken, ProgressReporter, UpdateError};
use crate::config::project_dirs;

/// Minimum time between two download progress reports
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Extension appended while a download is incomplete
const TEMP_EXTENSION: &str = "part";

/// Result of a successful download
pub struct DownloadResult {
    pub file_path: PathBuf,
    pub bytes: u64,
}

/// Download an update archive with progress tracking.
///
/// Downloads to a `.part` temporary file, then renames on success. The
/// partial file is removed whenever the download does not complete.
pub async fn download_archive(
    client: &reqwest::Client,
    url: &str,
    dest_path: &Path,
    progress: &ProgressReporter,
    cancel: &mut CancelToken,
) -> Result<DownloadResult, UpdateError> {
    let download_start = Instant::now();

    let response = tokio::select! {
        response = client.get(url).send() => response?,
        _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
    };

    if !response.status().is_success() {
        return Err(UpdateError::Status(response.status()));
    }

    let total_size = response.content_length().unwrap_or(0);
    progress.downloading(0, total_size);

    let downloaded =
        save_stream(response.bytes_stream(), dest_path, total_size, progress, cancel).await?;

    let elapsed = download_start.elapsed().as_secs_f32();
    tracing::info!(
        "Download complete: {:.1} MB in {:.1}s",
        downloaded as f32 / 1_000_000.0,
        elapsed
    );

    Ok(DownloadResult {
        file_path: dest_path.to_path_buf(),
        bytes: downloaded,
    })
}

/// Write `chunks` to `dest_path` through a `.part` file.
///
/// Returns the number of bytes written. On any error, including
/// cancellation, the partial file is deleted and `dest_path` is untouched.
async fn save_stream<S, B, E>(
    chunks: S,
    dest_path: &Path,
    total_size: u64,
    progress: &ProgressReporter,
    cancel: &mut CancelToken,
) -> Result<u64, UpdateError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<UpdateError>,
{
    if let Some(parent) = dest_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_path_for(dest_path);
    let written = match write_part_file(chunks, &temp_path, total_size, progress, cancel).await {
        Ok(written) => tokio::fs::rename(&temp_path, dest_path)
            .await
            .map(|()| written)
            .map_err(UpdateError::from),
        Err(e) => Err(e),
    };

    match written {
        Ok(downloaded) => {
            // Unknown lengths report the final size as the total
            let total = if total_size == 0 { downloaded } else { total_size };
            progress.downloading(downloaded, total);
            Ok(downloaded)
        }
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&temp_path).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial download {:?}: {}", temp_path, remove_err);
                }
            }
            Err(e)
        }
    }
}

async fn write_part_file<S, B, E>(
    chunks: S,
    temp_path: &Path,
    total_size: u64,
    progress: &ProgressReporter,
    cancel: &mut CancelToken,
) -> Result<u64, UpdateError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<UpdateError>,
{
    let mut file = tokio::fs::File::create(temp_path).await?;
    let mut stream = std::pin::pin!(chunks);
    let mut downloaded: u64 = 0;
    let mut last_progress_time = Instant::now();

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
        };
        let Some(chunk) = chunk else {
            break;
        };
        let chunk = chunk.map_err(Into::<UpdateError>::into)?;
        let bytes = chunk.as_ref();

        file.write_all(bytes).await?;
        downloaded += bytes.len() as u64;

        if last_progress_time.elapsed() >= PROGRESS_INTERVAL {
            progress.downloading(downloaded, total_size);
            last_progress_time = Instant::now();
        }
    }

    file.sync_all().await?;
    Ok(downloaded)
}

fn temp_path_for(dest_path: &Path) -> PathBuf {
    let mut name = dest_path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(TEMP_EXTENSION);
    dest_path.with_file_name(name)
}

/// File name for a downloaded archive, safe for any filesystem
pub(crate) fn archive_file_name(app: &str, version: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{}-{}.zip", sanitize(app), sanitize(version))
}

/// Get the download cache directory.
pub fn download_dir() -> anyhow::Result<PathBuf> {
    let dirs = project_dirs()?;

    let download_dir = dirs.data_dir().join("downloads");
    std::fs::create_dir_all(&download_dir)?;

    Ok(download_dir)
}
