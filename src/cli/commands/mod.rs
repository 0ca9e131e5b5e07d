pub mod apps;
pub mod config;
pub mod update;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::bundle::DirectoryDiscovery;
use crate::config::Config;
use crate::db::Database;
use crate::provider::AppProvider;
use crate::source::SourceRouter;

/// Provider wired to the configured directories, sources and ignore list
fn open_provider(config: &Config, client: reqwest::Client) -> Result<AppProvider> {
    let discovery = DirectoryDiscovery::new(config.scan.roots.clone(), config.scan.max_depth);
    let checker = SourceRouter::new(client, &config.network);
    let db = Database::open().context("Failed to open database")?;

    Ok(AppProvider::new(
        Arc::new(discovery),
        Arc::new(checker),
        Arc::new(db),
        config.scan.max_concurrent_checks,
    ))
}
