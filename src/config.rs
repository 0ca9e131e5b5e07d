use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Order of applications within each section of the list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Name,
    UpdateDate,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Name => f.write_str("name"),
            SortOrder::UpdateDate => f.write_str("update_date"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(SortOrder::Name),
            "update_date" | "date" => Ok(SortOrder::UpdateDate),
            other => anyhow::bail!("Unknown sort order: {} (expected name or update_date)", other),
        }
    }
}

/// Which sections of the application list are shown, and how they are sorted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(default)]
    pub sort_order: SortOrder,
    /// Show apps that are up to date
    #[serde(default = "default_true")]
    pub show_installed: bool,
    /// Show apps whose updates are ignored
    #[serde(default)]
    pub show_ignored: bool,
    /// Show apps without an update source
    #[serde(default)]
    pub show_unsupported: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            sort_order: SortOrder::Name,
            show_installed: true,
            show_ignored: false,
            show_unsupported: false,
        }
    }
}

/// Bundle discovery and update checking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Directories searched for application bundles
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,
    /// How deep below each root a bundle directory may sit
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum number of update checks running at once
    #[serde(default = "default_max_checks")]
    pub max_concurrent_checks: usize,
    /// Check for updates when started without a command
    #[serde(default = "default_true")]
    pub check_on_startup: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            max_depth: default_max_depth(),
            max_concurrent_checks: default_max_checks(),
            check_on_startup: true,
        }
    }
}

/// HTTP settings shared by update sources and downloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Store catalog lookup endpoint
    #[serde(default = "default_lookup_url")]
    pub store_lookup_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            store_lookup_url: default_lookup_url(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_roots() -> Vec<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| vec![dirs.data_local_dir().join("Applications")])
        .unwrap_or_default()
}

fn default_max_depth() -> usize {
    2
}

fn default_max_checks() -> usize {
    8
}

fn default_timeout() -> u64 {
    30
}

fn default_lookup_url() -> String {
    "https://itunes.apple.com/lookup".to_string()
}

/// Project directories used for config and data
pub fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "freshen", "Freshen")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = project_dirs()?;

        let config_dir = dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, falling back to defaults when missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Read a value by dotted key, e.g. `display.sort_order`
    pub fn get(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["display", "sort_order"] => Ok(self.display.sort_order.to_string()),
            ["display", "show_installed"] => Ok(self.display.show_installed.to_string()),
            ["display", "show_ignored"] => Ok(self.display.show_ignored.to_string()),
            ["display", "show_unsupported"] => Ok(self.display.show_unsupported.to_string()),
            ["scan", "roots"] => Ok(self
                .scan
                .roots
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(",")),
            ["scan", "max_depth"] => Ok(self.scan.max_depth.to_string()),
            ["scan", "max_concurrent_checks"] => Ok(self.scan.max_concurrent_checks.to_string()),
            ["scan", "check_on_startup"] => Ok(self.scan.check_on_startup.to_string()),
            ["network", "timeout_secs"] => Ok(self.network.timeout_secs.to_string()),
            ["network", "store_lookup_url"] => Ok(self.network.store_lookup_url.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    /// Set a value by dotted key. `scan.roots` takes a comma-separated list.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["display", "sort_order"] => self.display.sort_order = value.parse()?,
            ["display", "show_installed"] => self.display.show_installed = value.parse()?,
            ["display", "show_ignored"] => self.display.show_ignored = value.parse()?,
            ["display", "show_unsupported"] => self.display.show_unsupported = value.parse()?,
            ["scan", "roots"] => {
                self.scan.roots = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect();
            }
            ["scan", "max_depth"] => self.scan.max_depth = value.parse()?,
            ["scan", "max_concurrent_checks"] => {
                let checks: usize = value.parse()?;
                if checks == 0 {
                    anyhow::bail!("scan.max_concurrent_checks must be at least 1");
                }
                self.scan.max_concurrent_checks = checks;
            }
            ["scan", "check_on_startup"] => self.scan.check_on_startup = value.parse()?,
            ["network", "timeout_secs"] => self.network.timeout_secs = value.parse()?,
            ["network", "store_lookup_url"] => self.network.store_lookup_url = value.to_string(),
            _ => anyhow::bail!("Unknown or read-only config key: {}", key),
        }

        Ok(())
    }
}
