//! Checking, listing and ignoring apps

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::open_provider;
use crate::bundle::{AppId, AppRecord};
use crate::cli::output::{OutputFormat, print_formatted, print_success, should_show_progress};
use crate::config::{Config, DisplaySettings, SortOrder};
use crate::observer::Subscription;
use crate::provider::AppProvider;
use crate::snapshot::{SectionKind, Snapshot};
use crate::source::http_client;
use crate::view_model::{ListViewModel, ScanEvent, WindowViewModel};

#[derive(Serialize)]
struct AppEntry {
    id: String,
    name: String,
    installed: String,
    available: Option<String>,
    source: &'static str,
    update_available: bool,
    ignored: bool,
    release_date: Option<DateTime<Utc>>,
    path: String,
}

impl From<&AppRecord> for AppEntry {
    fn from(app: &AppRecord) -> Self {
        Self {
            id: app.id.to_string(),
            name: app.name.clone(),
            installed: app.installed.to_string(),
            available: app.remote.as_ref().map(|r| r.version.to_string()),
            source: app.source.name(),
            update_available: app.update_available,
            ignored: app.ignored,
            release_date: app.update_date(),
            path: app.path.to_string_lossy().to_string(),
        }
    }
}

#[derive(Serialize)]
struct SectionEntry {
    kind: SectionKind,
    title: String,
    apps: Vec<AppEntry>,
}

#[derive(Serialize)]
struct AppListResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    /// Update count for the badge, absent when there is nothing to update
    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    has_updates: Option<bool>,
    /// `false` when the check was interrupted before every app was checked
    #[serde(skip_serializing_if = "Option::is_none")]
    complete: Option<bool>,
    sort_order: SortOrder,
    #[serde(skip_serializing_if = "String::is_empty")]
    query: String,
    /// Installed apps left out by the display settings
    hidden: usize,
    sections: Vec<SectionEntry>,
}

impl AppListResult {
    fn new(snapshot: &Snapshot, installed: usize, query: &str) -> Self {
        let sections = snapshot
            .sections()
            .into_iter()
            .map(|(section, apps)| SectionEntry {
                kind: section.kind,
                title: section.title.clone(),
                apps: apps.into_iter().map(|app| AppEntry::from(app.as_ref())).collect(),
            })
            .collect();

        // With a filter, apps missing from the snapshot are not hidden, just unmatched
        let hidden = if query.trim().is_empty() {
            installed.saturating_sub(snapshot.apps().count())
        } else {
            0
        };

        Self {
            status: None,
            badge: None,
            has_updates: None,
            complete: None,
            sort_order: SortOrder::default(),
            query: query.to_string(),
            hidden,
            sections,
        }
    }
}

fn format_app_list(result: &AppListResult) -> String {
    let mut lines = Vec::new();

    for section in &result.sections {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(section.title.clone());
        for app in &section.apps {
            let version = match (&app.available, app.update_available) {
                (Some(available), true) => format!("{} -> {}", app.installed, available),
                _ => app.installed.clone(),
            };
            lines.push(format!("  {:<32} {:<24} {}", app.name, version, app.id));
        }
    }

    if lines.is_empty() {
        if result.query.is_empty() {
            lines.push("No apps found".to_string());
        } else {
            lines.push(format!("No apps match \"{}\"", result.query));
        }
    }
    if result.hidden > 0 {
        lines.push(String::new());
        lines.push(format!("{} more app(s) hidden, use --all to show them", result.hidden));
    }
    if let Some(status) = &result.status {
        lines.push(String::new());
        lines.push(status.clone());
    }
    if result.has_updates == Some(true) {
        lines.push("Run `freshen update --all` to install them".to_string());
    }

    lines.join("\n")
}

/// Filtering and display choices shared by `check` and `list`
#[derive(Debug, Default)]
pub struct ListOptions {
    pub filter: Option<String>,
    pub all: bool,
    pub sort: Option<SortOrder>,
}

fn display_settings(config: &Config, all: bool) -> DisplaySettings {
    if all {
        DisplaySettings {
            show_installed: true,
            show_ignored: true,
            show_unsupported: true,
            ..config.display.clone()
        }
    } else {
        config.display.clone()
    }
}

/// List view over `provider` starting from the configured display settings,
/// with the command-line choices applied on top
fn open_list(provider: &AppProvider, config: &Config, options: &ListOptions) -> ListViewModel {
    let list = ListViewModel::new(provider, config.display.clone());
    if options.all {
        list.set_settings(display_settings(config, true));
    }
    if let Some(order) = options.sort {
        list.set_sort_order(order);
    }
    if let Some(filter) = &options.filter {
        list.set_query(filter);
    }
    list
}

fn log_snapshot(snapshot: &Snapshot) {
    if snapshot.is_empty() {
        tracing::debug!("List is empty");
    } else {
        tracing::debug!("List has {} entries", snapshot.len());
    }
}

/// Print scan progress lines to stderr while the provider scans
fn watch_scan(window: &WindowViewModel) -> Subscription {
    let last_width = Arc::new(Mutex::new(0usize));
    window.subscribe(move |event| {
        let mut last_width = last_width.lock().unwrap_or_else(|e| e.into_inner());
        match event {
            ScanEvent::Started => eprintln!("Scanning for apps..."),
            ScanEvent::Checking { total } => eprintln!("Checking {} apps for updates", total),
            ScanEvent::Checked {
                name,
                completed,
                total,
                ..
            } => {
                let line = format!("[{}/{}] {}", completed, total, name);
                eprint!("\r{:<width$}", line, width = *last_width);
                *last_width = line.len();
            }
            ScanEvent::Finished => {
                if *last_width > 0 {
                    eprintln!();
                }
            }
        }
    })
}

pub async fn check(options: ListOptions, format: OutputFormat, quiet: bool) -> Result<()> {
    let config = Config::load()?;
    let client = http_client(&config.network).context("Failed to create HTTP client")?;
    let mut provider = open_provider(&config, client)?;

    let window = WindowViewModel::new();
    window.attach(&mut provider);
    let show_progress = should_show_progress(quiet, format);
    let _progress = show_progress.then(|| watch_scan(&window));

    let list = open_list(&provider, &config, &options);
    let _log = list.subscribe(log_snapshot);

    provider.run();
    let interrupted = tokio::select! {
        _ = provider.settle() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        if show_progress {
            eprintln!();
        }
        tracing::warn!("Check interrupted, showing partial results");
    }

    let mut result = AppListResult::new(&list.snapshot(), provider.apps().len(), &list.query());
    result.status = Some(window.status_text(&provider));
    result.badge = window.badge(&provider);
    result.has_updates = Some(window.has_updates(&provider));
    result.complete = Some(window.reload_enabled(&provider));
    result.sort_order = window.sort_order(&list);
    print_formatted(&result, format, format_app_list);

    Ok(())
}

pub async fn list(options: ListOptions, format: OutputFormat, _quiet: bool) -> Result<()> {
    let config = Config::load()?;
    let client = http_client(&config.network).context("Failed to create HTTP client")?;
    let mut provider = open_provider(&config, client)?;
    provider.discover()?;

    let list = open_list(&provider, &config, &options);
    let mut result = AppListResult::new(&list.snapshot(), provider.apps().len(), &list.query());
    result.sort_order = list.settings().sort_order;
    print_formatted(&result, format, format_app_list);
    Ok(())
}

#[derive(Serialize)]
struct IgnoreResult {
    id: String,
    name: Option<String>,
    ignored: bool,
    /// Whether the app still shows up in the list with the configured settings
    visible: bool,
}

pub async fn set_ignored(id: &str, ignored: bool, format: OutputFormat, quiet: bool) -> Result<()> {
    let config = Config::load()?;
    let client = http_client(&config.network).context("Failed to create HTTP client")?;
    let mut provider: AppProvider = open_provider(&config, client)?;
    if let Err(e) = provider.discover() {
        tracing::debug!("Discovery failed, storing ignore state only: {}", e);
    }

    let id = AppId::new(id);
    provider.set_ignored_state(ignored, &id)?;

    let list = ListViewModel::new(&provider, config.display.clone());
    let result = IgnoreResult {
        name: provider.app(&id).map(|app| app.name.clone()),
        visible: list.snapshot().position_of(&id).is_some(),
        id: id.to_string(),
        ignored,
    };
    match format {
        OutputFormat::Json => print_formatted(&result, format, |_| String::new()),
        OutputFormat::Text => {
            let label = result.name.as_deref().unwrap_or(&result.id);
            let mut message = if ignored {
                format!("Ignoring updates for {}", label)
            } else {
                format!("No longer ignoring updates for {}", label)
            };
            if result.name.is_some() && !result.visible {
                message.push_str(" (hidden from the list, use --all to show it)");
            }
            print_success(&message, quiet);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{RemoteVersion, UpdateSource};
    use crate::snapshot;
    use crate::version::Version;

    fn app(id: &str, name: &str, remote: &str) -> Arc<AppRecord> {
        let record = AppRecord::new(
            id,
            name,
            format!("/apps/{name}"),
            Version::parse("1.0").unwrap(),
            UpdateSource::Feed {
                url: "https://example.com/feed.json".into(),
            },
        );
        Arc::new(record.with_remote(Some(RemoteVersion::new(Version::parse(remote).unwrap()))))
    }

    #[test]
    fn test_text_output_lists_sections() {
        let apps = vec![app("editor", "Editor", "1.1"), app("player", "Player", "1.0")];
        let snapshot = snapshot::build(&apps, "", &DisplaySettings::default());
        let mut result = AppListResult::new(&snapshot, apps.len(), "");
        result.status = Some("1 app has updates available".into());

        let text = format_app_list(&result);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Available Updates");
        assert!(lines[1].contains("1.0 -> 1.1"));
        assert!(lines[1].ends_with("editor"));
        assert_eq!(lines[3], "Installed");
        assert_eq!(lines.last(), Some(&"1 app has updates available"));
    }

    #[test]
    fn test_empty_list() {
        let result = AppListResult::new(&Snapshot::default(), 0, "");
        assert_eq!(format_app_list(&result), "No apps found");

        let result = AppListResult::new(&Snapshot::default(), 3, " zzz ");
        assert_eq!(result.hidden, 0);
        assert_eq!(format_app_list(&result), "No apps match \" zzz \"");
    }

    #[test]
    fn test_hidden_apps_and_update_hint() {
        let apps = vec![app("editor", "Editor", "1.1"), app("player", "Player", "1.0")];
        let settings = DisplaySettings {
            show_installed: false,
            ..DisplaySettings::default()
        };
        let snapshot = snapshot::build(&apps, "", &settings);
        let mut result = AppListResult::new(&snapshot, apps.len(), "");
        result.status = Some("1 app has updates available".into());
        result.badge = Some(1);
        result.has_updates = Some(true);

        assert_eq!(result.hidden, 1);
        let text = format_app_list(&result);
        assert!(text.contains("1 more app(s) hidden, use --all to show them"));
        assert!(text.ends_with("1 app has updates available\nRun `freshen update --all` to install them"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["badge"], 1);
        assert_eq!(json["sort_order"], "name");
        assert!(json.get("query").is_none());
    }

    #[test]
    fn test_all_shows_every_bucket() {
        let config = Config::default();
        let settings = display_settings(&config, true);
        assert!(settings.show_ignored && settings.show_unsupported && settings.show_installed);
        assert_eq!(settings.sort_order, config.display.sort_order);
    }
}
