//! Installed application bundles.
//!
//! A bundle is a directory containing a `bundle.toml` manifest:
//!
//! ```toml
//! identifier = "com.example.editor"
//! name = "Editor"
//! version = "1.4.2"
//!
//! [source]
//! kind = "feed"
//! url = "https://example.com/editor/versions.json"
//! ```
//!
//! Bundles without a `[source]` table are listed but cannot be checked.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::version::{Version, VersionError};

/// Manifest file name looked for during discovery
pub const MANIFEST_NAME: &str = "bundle.toml";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("No application directories configured")]
    NoRoots,

    #[error("Invalid manifest {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Invalid version in {path}: {source}")]
    InvalidVersion {
        path: PathBuf,
        #[source]
        source: VersionError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable identifier of an installed application
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AppId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where updates for an application come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UpdateSource {
    /// Catalog lookup by store id; installs are handed off to the store
    Store { store_id: String },
    /// Self-hosted JSON feed; installs run in-process
    Feed { url: String },
    /// No known source
    Unsupported,
}

impl UpdateSource {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateSource::Store { .. } => "store",
            UpdateSource::Feed { .. } => "feed",
            UpdateSource::Unsupported => "unsupported",
        }
    }
}

/// A newer (or current) version offered by an update source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVersion {
    pub version: Version,
    /// Archive to install from (feed sources)
    pub download_url: Option<String>,
    /// Expected SHA-256 of the archive, lowercase hex
    pub sha256: Option<String>,
    pub release_notes_url: Option<String>,
    /// Store page to hand off to (store sources)
    pub store_url: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl RemoteVersion {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            download_url: None,
            sha256: None,
            release_notes_url: None,
            store_url: None,
            date: None,
        }
    }
}

/// One installed, update-checkable application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppRecord {
    pub id: AppId,
    pub name: String,
    pub path: PathBuf,
    pub installed: Version,
    pub source: UpdateSource,
    pub remote: Option<RemoteVersion>,
    pub ignored: bool,
    pub update_available: bool,
}

impl AppRecord {
    pub fn new(
        id: impl Into<AppId>,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        installed: Version,
        source: UpdateSource,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            installed,
            source,
            remote: None,
            ignored: false,
            update_available: false,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.source != UpdateSource::Unsupported
    }

    /// Whether the app should take part in bulk updates
    pub fn is_updatable(&self) -> bool {
        self.update_available && !self.ignored
    }

    /// Copy of this record carrying a check result.
    ///
    /// `None` means no update could be determined.
    pub fn with_remote(&self, remote: Option<RemoteVersion>) -> Self {
        let update_available = remote
            .as_ref()
            .map(|remote| remote.version > self.installed)
            .unwrap_or(false);
        Self {
            remote,
            update_available,
            ..self.clone()
        }
    }

    pub fn with_ignored(&self, ignored: bool) -> Self {
        Self {
            ignored,
            ..self.clone()
        }
    }

    /// Release date of the remote version, if known
    pub fn update_date(&self) -> Option<DateTime<Utc>> {
        self.remote.as_ref().and_then(|remote| remote.date)
    }
}

impl From<String> for AppId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Supplies the list of installed applications
pub trait BundleDiscovery: Send + Sync {
    fn discover(&self) -> Result<Vec<AppRecord>, DiscoveryError>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    identifier: String,
    name: String,
    version: String,
    #[serde(default)]
    source: Option<UpdateSource>,
}

/// Parse the manifest at `path` into a record rooted at its directory
pub fn read_manifest(path: &Path) -> Result<AppRecord, DiscoveryError> {
    let content = std::fs::read_to_string(path)?;
    let manifest: Manifest =
        toml::from_str(&content).map_err(|e| DiscoveryError::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.message().to_string(),
        })?;

    if manifest.identifier.trim().is_empty() {
        return Err(DiscoveryError::InvalidManifest {
            path: path.to_path_buf(),
            reason: "identifier is empty".to_string(),
        });
    }

    let installed =
        Version::parse(&manifest.version).map_err(|source| DiscoveryError::InvalidVersion {
            path: path.to_path_buf(),
            source,
        })?;

    let bundle_dir = path.parent().unwrap_or(path).to_path_buf();
    Ok(AppRecord::new(
        AppId::new(manifest.identifier.trim()),
        manifest.name,
        bundle_dir,
        installed,
        manifest.source.unwrap_or(UpdateSource::Unsupported),
    ))
}

/// Discovers bundles by walking configured directories for manifests
#[derive(Debug, Clone)]
pub struct DirectoryDiscovery {
    roots: Vec<PathBuf>,
    max_depth: usize,
}

impl DirectoryDiscovery {
    pub fn new(roots: Vec<PathBuf>, max_depth: usize) -> Self {
        Self { roots, max_depth }
    }
}

impl BundleDiscovery for DirectoryDiscovery {
    fn discover(&self) -> Result<Vec<AppRecord>, DiscoveryError> {
        if self.roots.is_empty() {
            return Err(DiscoveryError::NoRoots);
        }

        let mut seen = HashSet::new();
        let mut apps = Vec::new();

        for root in &self.roots {
            if !root.is_dir() {
                tracing::warn!("Application directory {:?} does not exist, skipping", root);
                continue;
            }

            let manifests = WalkDir::new(root)
                .max_depth(self.max_depth + 1)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file() && entry.file_name() == MANIFEST_NAME);

            for entry in manifests {
                match read_manifest(entry.path()) {
                    Ok(app) => {
                        if seen.insert(app.id.clone()) {
                            apps.push(app);
                        } else {
                            tracing::debug!("Duplicate bundle {} at {:?}", app.id, entry.path());
                        }
                    }
                    Err(e) => tracing::warn!("Skipping bundle: {}", e),
                }
            }
        }

        tracing::info!("Discovered {} bundles", apps.len());
        Ok(apps)
    }
}
