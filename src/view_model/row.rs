//! Per-application row state derived from the progress hub.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bundle::AppRecord;
use crate::hub::ProgressHub;
use crate::observer::{ObserverRegistry, Subscription};
use crate::operation::{ProgressIndicator, UpdateState};

/// What the action control of a row shows
#[derive(Debug, Clone, PartialEq)]
pub enum RowAction {
    /// An update can be started
    Update,
    /// Up to date; the app can be opened
    Open,
    InProgress(ProgressIndicator),
    /// The last update failed with this cause
    Failed(String),
}

impl RowAction {
    fn derive(app: &AppRecord, state: &UpdateState) -> RowAction {
        match state {
            UpdateState::None if app.update_available => RowAction::Update,
            UpdateState::None => RowAction::Open,
            UpdateState::Error(cause) => RowAction::Failed(cause.clone()),
            state => RowAction::InProgress(state.indicator()),
        }
    }
}

struct RowState {
    app: Arc<AppRecord>,
    state: UpdateState,
}

/// Follows one application's update operation through the hub.
pub struct RowViewModel {
    row: Arc<Mutex<RowState>>,
    observers: ObserverRegistry<RowAction>,
    _hub_subscription: Subscription,
}

fn lock(row: &Mutex<RowState>) -> MutexGuard<'_, RowState> {
    row.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RowViewModel {
    pub fn new(app: Arc<AppRecord>, hub: &ProgressHub) -> Self {
        let row = Arc::new(Mutex::new(RowState {
            state: hub.state(&app.id),
            app: Arc::clone(&app),
        }));
        let observers = ObserverRegistry::new();

        let follower = Arc::clone(&row);
        let publisher: ObserverRegistry<RowAction> = observers.clone();
        let subscription = hub.subscribe(&app.id, move |state: &UpdateState| {
            let action = {
                let mut row = lock(&follower);
                row.state = state.clone();
                RowAction::derive(&row.app, &row.state)
            };
            publisher.notify(&action);
        });

        Self {
            row,
            observers,
            _hub_subscription: subscription,
        }
    }

    pub fn app(&self) -> Arc<AppRecord> {
        Arc::clone(&lock(&self.row).app)
    }

    pub fn state(&self) -> UpdateState {
        lock(&self.row).state.clone()
    }

    pub fn action(&self) -> RowAction {
        let row = lock(&self.row);
        RowAction::derive(&row.app, &row.state)
    }

    /// Human-readable progress line, if an operation is running or failed
    pub fn progress_text(&self) -> Option<String> {
        let row = lock(&self.row);
        (row.state != UpdateState::None).then(|| row.state.description())
    }

    /// Receive every action change for the lifetime of the guard
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RowAction) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{AppId, RemoteVersion, UpdateSource};
    use crate::version::Version;

    fn app(update: bool) -> Arc<AppRecord> {
        let record = AppRecord::new(
            "com.example.editor",
            "Editor",
            "/apps/Editor",
            Version::parse("1.0").unwrap(),
            UpdateSource::Feed {
                url: "https://example.com/feed.json".into(),
            },
        );
        let remote = if update { "2.0" } else { "1.0" };
        Arc::new(record.with_remote(Some(RemoteVersion::new(Version::parse(remote).unwrap()))))
    }

    #[test]
    fn test_action_falls_back_to_record() {
        let hub = ProgressHub::new();
        assert_eq!(RowViewModel::new(app(true), &hub).action(), RowAction::Update);
        assert_eq!(RowViewModel::new(app(false), &hub).action(), RowAction::Open);
    }

    #[test]
    fn test_action_follows_hub() {
        let hub = ProgressHub::new();
        let row = RowViewModel::new(app(true), &hub);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = row.subscribe(move |action| sink.lock().unwrap().push(action.clone()));
        let id = AppId::from("com.example.editor");

        hub.publish(&id, UpdateState::Pending);
        hub.publish(&id, UpdateState::Downloading { loaded: 50, total: 100 });
        assert_eq!(row.progress_text().as_deref(), Some("Downloading... 50 B of 100 B"));
        hub.publish(&id, UpdateState::Error("disk full".into()));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                RowAction::InProgress(ProgressIndicator::Indeterminate),
                RowAction::InProgress(ProgressIndicator::Determinate(0.375)),
                RowAction::Failed("disk full".into()),
            ]
        );

        hub.publish(&id, UpdateState::None);
        assert_eq!(row.action(), RowAction::Update);
        assert_eq!(row.progress_text(), None);
        assert_eq!(row.state(), UpdateState::None);
    }

    #[test]
    fn test_late_row_sees_current_state() {
        let hub = ProgressHub::new();
        let id = AppId::from("com.example.editor");
        hub.publish(&id, UpdateState::Installing);

        let row = RowViewModel::new(app(true), &hub);
        assert_eq!(row.action(), RowAction::InProgress(ProgressIndicator::Indeterminate));
    }

    #[test]
    fn test_dropping_row_unsubscribes() {
        let hub = ProgressHub::new();
        let id = AppId::from("com.example.editor");
        let row = RowViewModel::new(app(true), &hub);
        let second = RowViewModel::new(app(true), &hub);
        assert_eq!(hub.observer_count(&id), 2);

        drop(row);
        drop(second);
        assert_eq!(hub.channel_count(), 0);
    }
}
