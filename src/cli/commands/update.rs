//! Update commands

use std::collections::{HashMap, HashSet};
use std::mem::{Discriminant, discriminant};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;

use super::open_provider;
use crate::bundle::{AppId, AppRecord, UpdateSource};
use crate::cli::output::{OutputFormat, print_error, print_formatted, print_success, should_show_progress};
use crate::config::Config;
use crate::hub::ProgressHub;
use crate::observer::Subscription;
use crate::operation::UpdateState;
use crate::source::http_client;
use crate::update::{BundleInstaller, UpdateQueue, download_dir};
use crate::view_model::{RowAction, RowViewModel, WindowViewModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Outcome {
    Updated,
    /// Handed off to the store page
    Opened,
    Failed,
    Cancelled,
}

#[derive(Serialize)]
struct UpdateEntry {
    id: String,
    name: String,
    from: String,
    to: Option<String>,
    outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct UpdateResult {
    updates: Vec<UpdateEntry>,
    skipped: Vec<String>,
}

fn format_update_result(result: &UpdateResult) -> String {
    let mut lines = Vec::new();
    for entry in &result.updates {
        let to = entry.to.as_deref().unwrap_or("?");
        lines.push(match entry.outcome {
            Outcome::Updated => format!("Updated {} {} -> {}", entry.name, entry.from, to),
            Outcome::Opened => format!("Opened store page for {} {}", entry.name, to),
            Outcome::Cancelled => format!("Cancelled update of {}", entry.name),
            Outcome::Failed => format!(
                "Failed to update {}: {}",
                entry.name,
                entry.error.as_deref().unwrap_or("unknown error")
            ),
        });
    }
    for id in &result.skipped {
        lines.push(format!("{} is up to date", id));
    }
    if lines.is_empty() {
        lines.push("Nothing to update".to_string());
    }
    lines.join("\n")
}

/// Print a line whenever a row's operation enters a new phase
fn watch_progress(row: &Arc<RowViewModel>) -> Subscription {
    let name = row.app().name.clone();
    let row_ref = Arc::downgrade(row);
    let last: Mutex<Option<Discriminant<UpdateState>>> = Mutex::new(None);
    row.subscribe(move |_action| {
        let Some(row) = row_ref.upgrade() else {
            return;
        };
        let Some(text) = row.progress_text() else {
            return;
        };
        let phase = discriminant(&row.state());
        let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
        if *last != Some(phase) {
            *last = Some(phase);
            eprintln!("{}: {}", name, text);
        }
    })
}

/// Cancel every target still in flight and wait for the queue to settle.
///
/// Returns the apps whose operations were cancelled. Operations that already
/// finished keep their outcome.
async fn cancel_remaining(queue: &mut UpdateQueue, targets: &[Arc<AppRecord>]) -> HashSet<AppId> {
    queue.poll();
    let cancelled: HashSet<AppId> = targets
        .iter()
        .filter(|app| queue.cancel(&app.id))
        .map(|app| app.id.clone())
        .collect();
    queue.settle().await;
    cancelled
}

fn outcome(app: &AppRecord, action: RowAction, cancelled: bool) -> (Outcome, Option<String>) {
    match action {
        RowAction::Failed(cause) => (Outcome::Failed, Some(cause)),
        _ if cancelled => (Outcome::Cancelled, None),
        _ if matches!(app.source, UpdateSource::Store { .. }) => (Outcome::Opened, None),
        _ => (Outcome::Updated, None),
    }
}

/// Resolve command-line ids against the scanned apps
fn select_targets(
    apps: &[Arc<AppRecord>],
    updatable: Vec<Arc<AppRecord>>,
    ids: &[String],
    all: bool,
) -> Result<(Vec<Arc<AppRecord>>, Vec<String>)> {
    if all {
        return Ok((updatable, Vec::new()));
    }

    let mut targets = Vec::new();
    let mut skipped = Vec::new();
    for id in ids {
        let app = apps
            .iter()
            .find(|app| app.id.as_str() == id)
            .with_context(|| format!("No installed app with identifier {}", id))?;
        if app.update_available {
            targets.push(Arc::clone(app));
        } else {
            skipped.push(app.name.clone());
        }
    }
    Ok((targets, skipped))
}

pub async fn run(ids: Vec<String>, all: bool, format: OutputFormat, quiet: bool) -> Result<()> {
    let config = Config::load()?;
    let client = http_client(&config.network).context("Failed to create HTTP client")?;
    let mut provider = open_provider(&config, client.clone())?;
    let show_progress = should_show_progress(quiet, format);

    if show_progress {
        eprintln!("Checking for updates...");
    }
    provider.run();
    provider.settle().await;

    let (targets, skipped) = select_targets(provider.apps(), provider.updatable_apps(), &ids, all)?;

    let hub = ProgressHub::new();
    let installer = BundleInstaller::new(client, download_dir()?);
    let mut queue = UpdateQueue::new(hub.clone(), Arc::new(installer));

    let rows: HashMap<AppId, Arc<RowViewModel>> = targets
        .iter()
        .map(|app| (app.id.clone(), Arc::new(RowViewModel::new(Arc::clone(app), &hub))))
        .collect();
    let _watchers: Vec<Subscription> = if show_progress {
        rows.values().map(watch_progress).collect()
    } else {
        Vec::new()
    };

    if all {
        WindowViewModel::new().update_all(&provider, &mut queue);
    } else {
        for app in &targets {
            queue.start(Arc::clone(app));
        }
    }
    tracing::debug!("{} updates in flight", queue.in_flight());

    let interrupted = tokio::select! {
        _ = queue.settle() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    let cancelled = if interrupted {
        eprintln!("Cancelling...");
        cancel_remaining(&mut queue, &targets).await
    } else {
        HashSet::new()
    };

    let updates: Vec<UpdateEntry> = targets
        .iter()
        .map(|app| {
            let action = rows
                .get(&app.id)
                .map(|row| row.action())
                .unwrap_or(RowAction::Update);
            let (outcome, error) = outcome(app, action, cancelled.contains(&app.id));
            if outcome == Outcome::Failed {
                queue.acknowledge(&app.id);
            }
            UpdateEntry {
                id: app.id.to_string(),
                name: app.name.clone(),
                from: app.installed.to_string(),
                to: app.remote.as_ref().map(|r| r.version.to_string()),
                outcome,
                error,
            }
        })
        .collect();

    let failed = updates.iter().filter(|u| u.outcome == Outcome::Failed).count();
    let result = UpdateResult { updates, skipped };
    print_formatted(&result, format, format_update_result);

    if failed > 0 {
        print_error(&format!("{} update(s) failed", failed));
        anyhow::bail!("{} of {} updates failed", failed, result.updates.len());
    }
    print_success(
        &format!("{} app(s) processed", result.updates.len()),
        quiet || format == OutputFormat::Json,
    );
    Ok(())
}
