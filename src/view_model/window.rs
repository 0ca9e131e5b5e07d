//! Window-level state: scan status, update badge and bulk update.
//!
//! Nothing here is stored between reads. Counts and flags come from the
//! provider, and the sort order comes from the list view model, so the
//! window never disagrees with what the list shows.

use super::ListViewModel;
use crate::bundle::{AppId, AppRecord};
use crate::config::SortOrder;
use crate::observer::{ObserverRegistry, Subscription};
use crate::provider::{AppProvider, ScanProgress, ScanProgressDelegate};
use crate::update::UpdateQueue;

/// Scan progress as seen by the window
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Started,
    Checking {
        total: usize,
    },
    Checked {
        id: AppId,
        name: String,
        update_available: bool,
        completed: usize,
        total: usize,
    },
    Finished,
}

/// Forwards provider scan callbacks to the window's observers
struct WindowDelegate {
    events: ObserverRegistry<ScanEvent>,
    progress: ScanProgress,
}

impl ScanProgressDelegate for WindowDelegate {
    fn did_start_scanning_for_apps(&mut self) {
        self.progress = ScanProgress::default();
        self.events.notify(&ScanEvent::Started);
    }

    fn did_start_checking_apps(&mut self, count: usize) {
        self.progress = ScanProgress::new(count);
        self.events.notify(&ScanEvent::Checking { total: count });
    }

    fn did_check_app(&mut self, app: &AppRecord) {
        self.progress.record();
        self.events.notify(&ScanEvent::Checked {
            id: app.id.clone(),
            name: app.name.clone(),
            update_available: app.update_available,
            completed: self.progress.completed,
            total: self.progress.total,
        });
    }

    fn did_finish_checking_for_updates(&mut self) {
        self.events.notify(&ScanEvent::Finished);
    }
}

/// Window-level status derived from the provider.
#[derive(Debug, Default)]
pub struct WindowViewModel {
    events: ObserverRegistry<ScanEvent>,
}

impl WindowViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become `provider`'s scan delegate, replacing any previous one.
    pub fn attach(&self, provider: &mut AppProvider) {
        provider.set_progress_delegate(Some(Box::new(WindowDelegate {
            events: self.events.clone(),
            progress: ScanProgress::default(),
        })));
    }

    /// Receive scan events for the lifetime of the guard
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ScanEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Updates shown in the window
    pub fn update_count(&self, provider: &AppProvider) -> usize {
        provider.count_of_available_updates(AppRecord::is_supported)
    }

    pub fn status_text(&self, provider: &AppProvider) -> String {
        if provider.is_scanning() {
            return match provider.scan_progress() {
                Some(progress) => format!(
                    "Checked {} of {} apps",
                    progress.completed, progress.total
                ),
                None => "Checking for updates…".to_string(),
            };
        }

        match self.update_count(provider) {
            0 => "All apps are up to date".to_string(),
            1 => "1 app has updates available".to_string(),
            n => format!("{} apps have updates available", n),
        }
    }

    /// Badge value, absent when there is nothing to update
    pub fn badge(&self, provider: &AppProvider) -> Option<usize> {
        Some(self.update_count(provider)).filter(|count| *count > 0)
    }

    /// Whether bulk update is available
    pub fn has_updates(&self, provider: &AppProvider) -> bool {
        self.update_count(provider) > 0
    }

    pub fn reload_enabled(&self, provider: &AppProvider) -> bool {
        !provider.is_scanning()
    }

    /// Sort order currently applied by `list`
    pub fn sort_order(&self, list: &ListViewModel) -> SortOrder {
        list.settings().sort_order
    }

    /// Start an update for every updatable app not already in flight.
    ///
    /// Returns how many operations were started.
    pub fn update_all(&self, provider: &AppProvider, queue: &mut UpdateQueue) -> usize {
        let started = provider
            .updatable_apps()
            .into_iter()
            .filter(|app| queue.start(app.clone()))
            .count();
        tracing::info!("Started {} updates", started);
        started
    }
}
