//! The filtered, sectioned application list.
//!
//! `ListViewModel` follows the provider's list and rebuilds a `Snapshot`
//! whenever the list, the filter query or the display settings change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{DisplaySettings, SortOrder};
use crate::observer::{ObserverRegistry, Subscription};
use crate::provider::{AppList, AppProvider};
use crate::snapshot::{self, Snapshot};

struct ListState {
    apps: AppList,
    query: String,
    settings: DisplaySettings,
    snapshot: Snapshot,
}

impl ListState {
    fn rebuild(&mut self) -> Snapshot {
        self.snapshot = snapshot::build(&self.apps, &self.query, &self.settings);
        self.snapshot.clone()
    }
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<ListState>>,
    observers: ObserverRegistry<Snapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change`, rebuild and publish. Observers run without the lock held.
    fn update(&self, change: impl FnOnce(&mut ListState)) {
        let snapshot = {
            let mut state = self.lock();
            change(&mut state);
            state.rebuild()
        };
        self.observers.notify(&snapshot);
    }
}

/// Keeps the snapshot of the application list current.
pub struct ListViewModel {
    shared: Shared,
    _provider_subscription: Subscription,
}

impl ListViewModel {
    /// Start following `provider`'s list.
    pub fn new(provider: &AppProvider, settings: DisplaySettings) -> Self {
        let apps: AppList = provider.apps().to_vec();
        let snapshot = snapshot::build(&apps, "", &settings);
        let shared = Shared {
            state: Arc::new(Mutex::new(ListState {
                apps,
                query: String::new(),
                settings,
                snapshot,
            })),
            observers: ObserverRegistry::new(),
        };

        let follower = shared.clone();
        let subscription = provider.subscribe(move |apps: &AppList| {
            let apps = apps.clone();
            follower.update(move |state| state.apps = apps);
        });

        Self {
            shared,
            _provider_subscription: subscription,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.lock().snapshot.clone()
    }

    pub fn query(&self) -> String {
        self.shared.lock().query.clone()
    }

    pub fn set_query(&self, query: &str) {
        let query = query.to_string();
        self.shared.update(move |state| state.query = query);
    }

    pub fn settings(&self) -> DisplaySettings {
        self.shared.lock().settings.clone()
    }

    pub fn set_settings(&self, settings: DisplaySettings) {
        self.shared.update(move |state| state.settings = settings);
    }

    pub fn set_sort_order(&self, order: SortOrder) {
        self.shared.update(move |state| state.settings.sort_order = order);
    }

    /// Receive every new snapshot for the lifetime of the guard
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.shared.observers.subscribe(callback)
    }
}
