//! Installation functionality for feed updates.
//!
//! Handles checksum verification, extraction into a staging directory next to
//! the bundle, and swapping the new bundle into place with rollback.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{ProgressReporter, UpdateError};
use crate::bundle::{AppId, MANIFEST_NAME, read_manifest};

/// Extraction progress is reported every this many entries
const EXTRACTION_BATCH_SIZE: usize = 16;

/// Compute the lowercase hex SHA-256 of a file
pub(crate) fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify a downloaded archive against the checksum published by its feed.
pub async fn verify_checksum(path: &Path, expected: &str) -> Result<(), UpdateError> {
    let path = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(|e| UpdateError::Install(format!("Checksum task panicked: {}", e)))??;

    let expected = expected.trim().to_ascii_lowercase();
    if actual != expected {
        return Err(UpdateError::ChecksumMismatch { expected, actual });
    }
    tracing::debug!("Checksum verified: {}", actual);
    Ok(())
}

/// Extract a ZIP archive into `destination`, reporting `Extracting` progress.
///
/// Returns the number of entries in the archive.
pub async fn extract_archive(
    zip_path: &Path,
    destination: &Path,
    progress: &ProgressReporter,
) -> Result<usize, UpdateError> {
    let zip_path = zip_path.to_path_buf();
    let destination = destination.to_path_buf();
    let progress = progress.clone();
    let start = Instant::now();

    // ZIP extraction is blocking, run in spawn_blocking
    let total = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&zip_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let total = archive.len();
        progress.extracting(0.0);

        for i in 0..total {
            let mut entry = archive.by_index(i)?;

            // Skip entries with unsafe paths
            let Some(relative) = entry.enclosed_name() else {
                tracing::warn!("Skipping unsafe archive entry {}", entry.name());
                continue;
            };
            let outpath = destination.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&outpath)?;
            } else {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut outfile = std::fs::File::create(&outpath)?;
                std::io::copy(&mut entry, &mut outfile)?;
            }

            if i % EXTRACTION_BATCH_SIZE == 0 || i + 1 == total {
                progress.extracting((i + 1) as f64 / total as f64);
            }
        }

        if total == 0 {
            progress.extracting(1.0);
        }
        Ok::<_, UpdateError>(total)
    })
    .await
    .map_err(|e| UpdateError::Install(format!("Extraction task panicked: {}", e)))??;

    tracing::info!(
        "Extracted {} entries in {:.1}s",
        total,
        start.elapsed().as_secs_f32()
    );
    Ok(total)
}

/// Find the bundle inside an extracted archive.
///
/// Archives either hold the bundle contents at the top level or a single
/// directory containing them. The manifest must name the app being updated.
pub fn locate_bundle_root(staging: &Path, app: &AppId) -> Result<PathBuf, UpdateError> {
    let mut candidates = vec![staging.to_path_buf()];
    for entry in std::fs::read_dir(staging)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            candidates.push(entry.path());
        }
    }

    let root = candidates
        .into_iter()
        .find(|dir| dir.join(MANIFEST_NAME).is_file())
        .ok_or_else(|| UpdateError::Install("Archive does not contain a bundle".to_string()))?;

    let manifest = read_manifest(&root.join(MANIFEST_NAME))
        .map_err(|e| UpdateError::Install(e.to_string()))?;
    if manifest.id != *app {
        return Err(UpdateError::Install(format!(
            "Archive contains {} instead of {}",
            manifest.id, app
        )));
    }

    Ok(root)
}

/// Sibling path the current bundle is moved to during a swap
fn retired_path(bundle: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(bundle.file_name().unwrap_or_default());
    name.push(".old");
    bundle.with_file_name(name)
}

/// Replace the bundle at `bundle` with `new_root`.
///
/// The current bundle is renamed aside first and restored if moving the new
/// one into place fails. The old copy is deleted in the background.
pub async fn swap_bundle(new_root: &Path, bundle: &Path) -> Result<(), UpdateError> {
    let retired = retired_path(bundle);

    // Leftover from an interrupted update
    if retired.exists() {
        let path = retired.clone();
        tokio::task::spawn_blocking(move || remove_dir_all::remove_dir_all(&path))
            .await
            .map_err(|e| UpdateError::Install(format!("Cleanup task panicked: {}", e)))??;
    }

    let had_bundle = bundle.exists();
    if had_bundle {
        tokio::fs::rename(bundle, &retired).await?;
    }

    if let Err(e) = tokio::fs::rename(new_root, bundle).await {
        tracing::error!("Moving new bundle into place failed, rolling back: {}", e);
        if had_bundle {
            if let Err(rollback_err) = tokio::fs::rename(&retired, bundle).await {
                return Err(UpdateError::Install(format!(
                    "Install failed ({}) and rollback failed ({}). Reinstall the app.",
                    e, rollback_err
                )));
            }
        }
        return Err(UpdateError::Install(format!(
            "Install failed, previous version restored: {}",
            e
        )));
    }

    if had_bundle {
        tokio::spawn(async move {
            let start = Instant::now();
            let path = retired.clone();
            match tokio::task::spawn_blocking(move || remove_dir_all::remove_dir_all(&path)).await {
                Ok(Ok(())) => tracing::debug!(
                    "Removed previous bundle in {:.1}s",
                    start.elapsed().as_secs_f32()
                ),
                Ok(Err(e)) => tracing::warn!("Failed to remove previous bundle {:?}: {}", retired, e),
                Err(e) => tracing::warn!("Cleanup task panicked: {}", e),
            }
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn reporter() -> (ProgressReporter, mpsc::UnboundedReceiver<super::super::Transition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ProgressReporter {
                app: AppId::from("com.example.editor"),
                generation: 1,
                tx,
            },
            rx,
        )
    }

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    const MANIFEST: &str = "identifier = \"com.example.editor\"\nname = \"Editor\"\nversion = \"2.0\"\n";

    #[tokio::test]
    async fn test_verify_checksum() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("archive.zip");
        fs::write(&path, b"hello").unwrap();

        let hello = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        verify_checksum(&path, &hello.to_uppercase()).await.unwrap();

        let err = verify_checksum(&path, "00").await.unwrap_err();
        assert!(matches!(err, UpdateError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_extract_reports_progress_to_completion() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("editor.zip");
        write_zip(
            &zip_path,
            &[("Editor/bundle.toml", MANIFEST), ("Editor/bin/editor", "binary")],
        );
        let staging = temp.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        let (progress, mut rx) = reporter();

        let count = extract_archive(&zip_path, &staging, &progress).await.unwrap();

        assert_eq!(count, 2);
        assert!(staging.join("Editor/bin/editor").is_file());

        let mut fractions = Vec::new();
        while let Ok(transition) = rx.try_recv() {
            if let super::super::Report::State(state) = transition.report {
                fractions.push(state.fraction().unwrap());
            }
        }
        assert_eq!(fractions.first(), Some(&0.75));
        assert_eq!(fractions.last(), Some(&1.0));
    }

    #[tokio::test]
    async fn test_locate_bundle_root_checks_identifier() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("Editor");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join(MANIFEST_NAME), MANIFEST).unwrap();

        let root = locate_bundle_root(temp.path(), &AppId::from("com.example.editor")).unwrap();
        assert_eq!(root, nested);

        let err = locate_bundle_root(temp.path(), &AppId::from("com.example.player")).unwrap_err();
        assert!(matches!(err, UpdateError::Install(_)));
    }

    #[tokio::test]
    async fn test_locate_bundle_root_without_manifest() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("readme.txt"), "no bundle").unwrap();
        assert!(locate_bundle_root(temp.path(), &AppId::from("x")).is_err());
    }

    #[tokio::test]
    async fn test_swap_replaces_bundle() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("Editor");
        fs::create_dir_all(&bundle).unwrap();
        fs::write(bundle.join("version.txt"), "1.0").unwrap();

        let new_root = temp.path().join("staging").join("Editor");
        fs::create_dir_all(&new_root).unwrap();
        fs::write(new_root.join("version.txt"), "2.0").unwrap();

        swap_bundle(&new_root, &bundle).await.unwrap();

        assert_eq!(fs::read_to_string(bundle.join("version.txt")).unwrap(), "2.0");
        assert!(!new_root.exists());
    }

    #[tokio::test]
    async fn test_swap_rolls_back_when_new_bundle_is_missing() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("Editor");
        fs::create_dir_all(&bundle).unwrap();
        fs::write(bundle.join("version.txt"), "1.0").unwrap();

        let err = swap_bundle(&temp.path().join("missing"), &bundle).await.unwrap_err();

        assert!(matches!(err, UpdateError::Install(_)));
        assert_eq!(fs::read_to_string(bundle.join("version.txt")).unwrap(), "1.0");
    }
}
