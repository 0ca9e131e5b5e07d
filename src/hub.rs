//! Per-application broadcast of update progress.
//!
//! A list row, a detail pane and a bulk-update summary can all watch the same
//! application at once. The hub keeps one `ObserverRegistry` per application
//! id and the latest in-flight state for late subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bundle::AppId;
use crate::observer::{ObserverId, ObserverRegistry, Subscription};
use crate::operation::UpdateState;

#[derive(Default)]
struct Channels {
    registries: HashMap<AppId, ObserverRegistry<UpdateState>>,
    /// Latest state per app; `None` states are never stored
    states: HashMap<AppId, UpdateState>,
}

/// Progress broadcast hub. Cloning yields another handle to the same hub.
#[derive(Clone, Default)]
pub struct ProgressHub {
    channels: Arc<Mutex<Channels>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watch `app` under `id`, replacing any callback `id` already had there.
    pub fn add_observer<F>(&self, id: ObserverId, app: &AppId, callback: F)
    where
        F: Fn(&UpdateState) + Send + Sync + 'static,
    {
        self.lock()
            .registries
            .entry(app.clone())
            .or_default()
            .add(id, callback);
    }

    /// Stop watching `app`. The app's channel is dropped once nobody watches it.
    pub fn remove_observer(&self, id: ObserverId, app: &AppId) {
        let mut channels = self.lock();
        let now_empty = match channels.registries.get(app) {
            Some(registry) => {
                registry.remove(id);
                registry.is_empty()
            }
            None => false,
        };
        if now_empty {
            channels.registries.remove(app);
        }
    }

    /// Watch `app` for the lifetime of the returned guard.
    pub fn subscribe<F>(&self, app: &AppId, callback: F) -> Subscription
    where
        F: Fn(&UpdateState) + Send + Sync + 'static,
    {
        let id = ObserverId::new();
        self.add_observer(id, app, callback);

        let hub = self.clone();
        let app = app.clone();
        Subscription::new(id, move || hub.remove_observer(id, &app))
    }

    /// Latest state of `app`'s operation (`None` when nothing is running).
    pub fn state(&self, app: &AppId) -> UpdateState {
        self.lock().states.get(app).cloned().unwrap_or_default()
    }

    /// Number of observers currently watching `app`
    #[cfg(test)]
    pub fn observer_count(&self, app: &AppId) -> usize {
        self.lock()
            .registries
            .get(app)
            .map(ObserverRegistry::len)
            .unwrap_or(0)
    }

    /// Number of apps with at least one observer
    #[cfg(test)]
    pub fn channel_count(&self) -> usize {
        self.lock().registries.len()
    }

    /// Record `state` for `app` and deliver it to the app's observers.
    ///
    /// Publishing `UpdateState::None` forgets everything held for the app.
    pub(crate) fn publish(&self, app: &AppId, state: UpdateState) {
        let registry = {
            let mut channels = self.lock();
            if state == UpdateState::None {
                channels.states.remove(app);
            } else {
                channels.states.insert(app.clone(), state.clone());
            }
            channels.registries.get(app).cloned()
        };

        tracing::debug!("{}: {:?}", app, state);

        if let Some(registry) = registry {
            registry.notify(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(hub: &ProgressHub, app: &AppId) -> (Arc<Mutex<Vec<UpdateState>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = hub.subscribe(app, move |state| sink.lock().unwrap().push(state.clone()));
        (seen, subscription)
    }

    #[test]
    fn test_two_observers_receive_same_sequence() {
        let hub = ProgressHub::new();
        let app = AppId::from("com.example.editor");
        let (row, _row_sub) = recorder(&hub, &app);
        let (button, _button_sub) = recorder(&hub, &app);

        let sequence = vec![
            UpdateState::Pending,
            UpdateState::Downloading { loaded: 10, total: 100 },
            UpdateState::Installing,
            UpdateState::None,
        ];
        for state in &sequence {
            hub.publish(&app, state.clone());
        }

        assert_eq!(*row.lock().unwrap(), sequence);
        assert_eq!(*button.lock().unwrap(), sequence);
    }

    #[test]
    fn test_observers_only_see_their_app() {
        let hub = ProgressHub::new();
        let editor = AppId::from("com.example.editor");
        let player = AppId::from("com.example.player");
        let (seen, _sub) = recorder(&hub, &editor);

        hub.publish(&player, UpdateState::Pending);

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_none_clears_retained_state() {
        let hub = ProgressHub::new();
        let app = AppId::from("com.example.editor");

        hub.publish(&app, UpdateState::Error("checksum mismatch".into()));
        assert!(hub.state(&app).is_error());

        hub.publish(&app, UpdateState::None);
        assert_eq!(hub.state(&app), UpdateState::None);
    }

    #[test]
    fn test_channels_are_released_with_last_observer() {
        let hub = ProgressHub::new();
        let app = AppId::from("com.example.editor");
        let first = hub.subscribe(&app, |_| {});
        let second = hub.subscribe(&app, |_| {});
        assert_eq!(hub.observer_count(&app), 2);

        drop(first);
        assert_eq!(hub.channel_count(), 1);
        drop(second);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_remove_unknown_observer_is_noop() {
        let hub = ProgressHub::new();
        hub.remove_observer(ObserverId::new(), &AppId::from("missing"));
        assert_eq!(hub.channel_count(), 0);
    }
}
