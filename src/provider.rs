//! The authoritative list of installed applications and the update scan.
//!
//! A scan runs in two phases on a background task: bundle discovery, then one
//! check per application (bounded by `scan.max_concurrent_checks`). Results
//! come back over a channel and are applied by `AppProvider::poll` or
//! `AppProvider::settle`, which are the only places the list changes and
//! observers are notified.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::bundle::{AppId, AppRecord, BundleDiscovery, RemoteVersion};
use crate::db::IgnoreStore;
use crate::observer::{ObserverRegistry, Subscription};
use crate::source::{CheckError, UpdateCheck};

/// Snapshot of the application list delivered to observers
pub type AppList = Vec<Arc<AppRecord>>;

/// Receives the progress of a scan.
///
/// Events arrive in order: start scanning, start checking, one `did_check_app`
/// per finished check, finish. Finish is delivered even if discovery fails.
pub trait ScanProgressDelegate: Send {
    /// Discovery began; reloading should be disabled until the scan finishes.
    fn did_start_scanning_for_apps(&mut self);

    /// Discovery found `count` applications that will now be checked.
    fn did_start_checking_apps(&mut self, count: usize);

    /// One check completed. Called in completion order.
    fn did_check_app(&mut self, app: &AppRecord);

    fn did_finish_checking_for_updates(&mut self);
}

/// Progress of the checks in the current scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanProgress {
    pub total: usize,
    pub completed: usize,
}

impl ScanProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
        }
    }

    /// Count one finished check, never exceeding the total
    pub fn record(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
    }
}

enum ScanMessage {
    Discovered(Vec<AppRecord>),
    DiscoveryFailed(String),
    Checked(AppId, Result<Option<RemoteVersion>, CheckError>),
    Finished,
}

struct Scan {
    task: JoinHandle<()>,
    rx: mpsc::UnboundedReceiver<ScanMessage>,
    /// `None` until discovery has finished
    progress: Option<ScanProgress>,
}

/// Owns the application list and runs update scans
pub struct AppProvider {
    discovery: Arc<dyn BundleDiscovery>,
    checker: Arc<dyn UpdateCheck>,
    ignore_store: Arc<dyn IgnoreStore>,
    max_concurrent_checks: usize,
    apps: AppList,
    observers: ObserverRegistry<AppList>,
    delegate: Option<Box<dyn ScanProgressDelegate>>,
    scan: Option<Scan>,
}

impl AppProvider {
    pub fn new(
        discovery: Arc<dyn BundleDiscovery>,
        checker: Arc<dyn UpdateCheck>,
        ignore_store: Arc<dyn IgnoreStore>,
        max_concurrent_checks: usize,
    ) -> Self {
        Self {
            discovery,
            checker,
            ignore_store,
            max_concurrent_checks: max_concurrent_checks.max(1),
            apps: Vec::new(),
            observers: ObserverRegistry::new(),
            delegate: None,
            scan: None,
        }
    }

    pub fn apps(&self) -> &[Arc<AppRecord>] {
        &self.apps
    }

    pub fn app(&self, id: &AppId) -> Option<&Arc<AppRecord>> {
        self.apps.iter().find(|app| app.id == *id)
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    /// Check progress of the running scan, once discovery has finished
    pub fn scan_progress(&self) -> Option<ScanProgress> {
        self.scan.as_ref().and_then(|scan| scan.progress)
    }

    /// Replace the scan delegate. Passing `None` detaches the current one.
    pub fn set_progress_delegate(&mut self, delegate: Option<Box<dyn ScanProgressDelegate>>) {
        self.delegate = delegate;
    }

    /// Observe list changes for the lifetime of the returned guard
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AppList) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    /// Number of apps with an update that is not ignored and passes `predicate`
    pub fn count_of_available_updates<P>(&self, predicate: P) -> usize
    where
        P: Fn(&AppRecord) -> bool,
    {
        self.apps
            .iter()
            .filter(|app| app.is_updatable() && predicate(app))
            .count()
    }

    /// Apps taking part in bulk updates
    pub fn updatable_apps(&self) -> Vec<Arc<AppRecord>> {
        self.apps
            .iter()
            .filter(|app| app.is_updatable())
            .cloned()
            .collect()
    }

    /// Ignore or unignore an app's updates and remember the choice.
    pub fn set_ignored_state(&mut self, ignored: bool, id: &AppId) -> Result<()> {
        self.ignore_store.set_ignored(id, ignored)?;

        let Some(index) = self.apps.iter().position(|app| app.id == *id) else {
            tracing::debug!("{} is not installed; stored ignore state only", id);
            return Ok(());
        };
        if self.apps[index].ignored != ignored {
            self.apps[index] = Arc::new(self.apps[index].with_ignored(ignored));
            self.notify();
        }
        Ok(())
    }

    /// Discover installed apps without checking them.
    pub fn discover(&mut self) -> Result<()> {
        let apps = self.discovery.discover()?;
        self.replace_apps(apps);
        self.notify();
        Ok(())
    }

    /// Start a full scan. Returns `false` if one is already running.
    pub fn run(&mut self) -> bool {
        if self.scan.is_some() {
            tracing::debug!("Scan already running");
            return false;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(scan_task(
            Arc::clone(&self.discovery),
            Arc::clone(&self.checker),
            self.max_concurrent_checks,
            tx,
        ));
        self.scan = Some(Scan {
            task,
            rx,
            progress: None,
        });

        tracing::info!("Scanning for applications");
        if let Some(delegate) = self.delegate.as_mut() {
            delegate.did_start_scanning_for_apps();
        }
        true
    }

    /// Apply all scan results received so far. Returns how many were applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let Some(scan) = self.scan.as_mut() else {
                break;
            };
            match scan.rx.try_recv() {
                Ok(message) => {
                    self.handle(message);
                    applied += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    tracing::warn!("Scan task ended unexpectedly");
                    self.finish_scan();
                    break;
                }
            }
        }
        applied
    }

    /// Apply scan results until the running scan has finished.
    pub async fn settle(&mut self) {
        while let Some(scan) = self.scan.as_mut() {
            match scan.rx.recv().await {
                Some(message) => self.handle(message),
                None => {
                    tracing::warn!("Scan task ended unexpectedly");
                    self.finish_scan();
                }
            }
        }
    }

    fn handle(&mut self, message: ScanMessage) {
        match message {
            ScanMessage::Discovered(apps) => {
                let count = apps.len();
                self.replace_apps(apps);
                if let Some(scan) = self.scan.as_mut() {
                    scan.progress = Some(ScanProgress::new(count));
                }
                tracing::info!("Checking {} applications for updates", count);
                if let Some(delegate) = self.delegate.as_mut() {
                    delegate.did_start_checking_apps(count);
                }
                self.notify();
            }
            ScanMessage::DiscoveryFailed(reason) => {
                tracing::error!("Application discovery failed: {}", reason);
            }
            ScanMessage::Checked(id, result) => {
                if let Some(progress) = self.scan.as_mut().and_then(|scan| scan.progress.as_mut()) {
                    progress.record();
                }

                let Some(index) = self.apps.iter().position(|app| app.id == id) else {
                    tracing::debug!("Check result for unknown app {}", id);
                    return;
                };
                let remote = match result {
                    Ok(remote) => remote,
                    Err(e) => {
                        tracing::warn!("Could not check {} for updates: {}", id, e);
                        None
                    }
                };
                let updated = Arc::new(self.apps[index].with_remote(remote));
                if updated.update_available {
                    tracing::info!(
                        "Update available for {}: {} -> {}",
                        updated.name,
                        updated.installed,
                        updated
                            .remote
                            .as_ref()
                            .map(|r| r.version.to_string())
                            .unwrap_or_default()
                    );
                }
                self.apps[index] = Arc::clone(&updated);

                if let Some(delegate) = self.delegate.as_mut() {
                    delegate.did_check_app(&updated);
                }
                self.notify();
            }
            ScanMessage::Finished => self.finish_scan(),
        }
    }

    fn finish_scan(&mut self) {
        if self.scan.take().is_none() {
            return;
        }
        tracing::info!(
            "Scan finished: {} of {} apps have updates",
            self.count_of_available_updates(|_| true),
            self.apps.len()
        );
        if let Some(delegate) = self.delegate.as_mut() {
            delegate.did_finish_checking_for_updates();
        }
    }

    /// Install a freshly discovered list, keeping known check results for
    /// apps whose installed version did not change.
    fn replace_apps(&mut self, discovered: Vec<AppRecord>) {
        let ignored = self.ignore_store.ignored().unwrap_or_else(|e| {
            tracing::warn!("Failed to read ignore list: {}", e);
            Default::default()
        });
        let apps: AppList = {
            let previous: HashMap<&AppId, &Arc<AppRecord>> =
                self.apps.iter().map(|app| (&app.id, app)).collect();

            discovered
                .into_iter()
                .map(|app| {
                    let app = match previous.get(&app.id) {
                        Some(old) if old.installed == app.installed => {
                            app.with_remote(old.remote.clone())
                        }
                        _ => app,
                    };
                    let is_ignored = ignored.contains(&app.id);
                    Arc::new(app.with_ignored(is_ignored))
                })
                .collect()
        };

        self.apps = apps;
    }

    fn notify(&self) {
        self.observers.notify(&self.apps);
    }
}

impl Drop for AppProvider {
    fn drop(&mut self) {
        if let Some(scan) = self.scan.take() {
            scan.task.abort();
        }
    }
}

async fn scan_task(
    discovery: Arc<dyn BundleDiscovery>,
    checker: Arc<dyn UpdateCheck>,
    max_concurrent_checks: usize,
    tx: mpsc::UnboundedSender<ScanMessage>,
) {
    let discovered = tokio::task::spawn_blocking(move || discovery.discover()).await;
    let apps = match discovered {
        Ok(Ok(apps)) => apps,
        Ok(Err(e)) => {
            let _ = tx.send(ScanMessage::DiscoveryFailed(e.to_string()));
            let _ = tx.send(ScanMessage::Finished);
            return;
        }
        Err(e) => {
            let _ = tx.send(ScanMessage::DiscoveryFailed(format!("discovery panicked: {}", e)));
            let _ = tx.send(ScanMessage::Finished);
            return;
        }
    };

    let _ = tx.send(ScanMessage::Discovered(apps.clone()));

    let permits = Arc::new(Semaphore::new(max_concurrent_checks));
    let mut checks = JoinSet::new();
    for app in apps {
        let app = Arc::new(app);
        let checker = Arc::clone(&checker);
        let permits = Arc::clone(&permits);
        checks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let id = app.id.clone();
            let result = AssertUnwindSafe(checker.check(app))
                .catch_unwind()
                .await
                .unwrap_or(Err(CheckError::Panicked));
            (id, result)
        });
    }

    while let Some(joined) = checks.join_next().await {
        match joined {
            Ok((id, result)) => {
                let _ = tx.send(ScanMessage::Checked(id, result));
            }
            Err(e) => tracing::warn!("Update check task failed: {}", e),
        }
    }

    let _ = tx.send(ScanMessage::Finished);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::bundle::{DiscoveryError, UpdateSource};
    use crate::db::Database;
    use crate::source::CheckFuture;
    use crate::version::Version;

    struct FixedDiscovery(Vec<AppRecord>);

    impl BundleDiscovery for FixedDiscovery {
        fn discover(&self) -> Result<Vec<AppRecord>, DiscoveryError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDiscovery;

    impl BundleDiscovery for FailingDiscovery {
        fn discover(&self) -> Result<Vec<AppRecord>, DiscoveryError> {
            Err(DiscoveryError::NoRoots)
        }
    }

    /// Answers from a table of remote versions; missing ids fail
    struct TableChecker {
        remote: HashMap<String, Option<&'static str>>,
    }

    impl UpdateCheck for TableChecker {
        fn check(&self, app: Arc<AppRecord>) -> CheckFuture {
            let answer = self.remote.get(app.id.as_str()).cloned();
            Box::pin(async move {
                // Finish in reverse alphabetical order
                let delay = 30u64.saturating_sub(app.name.len() as u64 * 3);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                match answer {
                    Some(Some(version)) => Ok(Some(RemoteVersion::new(Version::parse(version).unwrap()))),
                    Some(None) => Ok(None),
                    None => Err(CheckError::InvalidResponse("feed unavailable".into())),
                }
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        StartScanning,
        StartChecking(usize),
        Checked(String),
        Finished,
    }

    struct RecordingDelegate(Arc<Mutex<Vec<Event>>>);

    impl ScanProgressDelegate for RecordingDelegate {
        fn did_start_scanning_for_apps(&mut self) {
            self.0.lock().unwrap().push(Event::StartScanning);
        }
        fn did_start_checking_apps(&mut self, count: usize) {
            self.0.lock().unwrap().push(Event::StartChecking(count));
        }
        fn did_check_app(&mut self, app: &AppRecord) {
            self.0.lock().unwrap().push(Event::Checked(app.id.to_string()));
        }
        fn did_finish_checking_for_updates(&mut self) {
            self.0.lock().unwrap().push(Event::Finished);
        }
    }

    fn installed(id: &str, name: &str) -> AppRecord {
        AppRecord::new(
            id,
            name,
            format!("/apps/{name}"),
            Version::parse("1.0").unwrap(),
            UpdateSource::Feed {
                url: format!("https://example.com/{id}.json"),
            },
        )
    }

    fn provider_with(
        apps: Vec<AppRecord>,
        remote: &[(&str, Option<&'static str>)],
    ) -> (AppProvider, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let checker = TableChecker {
            remote: remote.iter().map(|(id, v)| (id.to_string(), *v)).collect(),
        };
        let provider = AppProvider::new(
            Arc::new(FixedDiscovery(apps)),
            Arc::new(checker),
            db.clone(),
            4,
        );
        (provider, db)
    }

    fn abc() -> Vec<AppRecord> {
        vec![installed("a", "Alpha"), installed("b", "Beta"), installed("c", "Gamma")]
    }

    #[test]
    fn test_scan_progress_saturates() {
        let mut progress = ScanProgress::new(2);
        for _ in 0..5 {
            progress.record();
        }
        assert_eq!(progress.completed, 2);

        let mut empty = ScanProgress::new(0);
        empty.record();
        assert_eq!(empty.completed, 0);
    }

    #[tokio::test]
    async fn test_scan_reports_protocol_and_aggregates() {
        let (mut provider, db) =
            provider_with(abc(), &[("a", Some("1.0")), ("b", Some("2.0")), ("c", Some("1.5"))]);
        db.set_ignored(&AppId::from("c"), true).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        provider.set_progress_delegate(Some(Box::new(RecordingDelegate(Arc::clone(&events)))));

        assert!(provider.run());
        assert!(provider.is_scanning());
        assert!(!provider.run());
        provider.settle().await;
        assert!(!provider.is_scanning());
        assert!(provider.scan_progress().is_none());

        let events = events.lock().unwrap().clone();
        assert_eq!(events.first(), Some(&Event::StartScanning));
        assert_eq!(events.get(1), Some(&Event::StartChecking(3)));
        assert_eq!(events.last(), Some(&Event::Finished));
        let checked: Vec<&Event> = events
            .iter()
            .filter(|e| matches!(e, Event::Checked(_)))
            .collect();
        assert_eq!(checked.len(), 3);

        // A: current, B: update, C: update but ignored
        let c = provider.app(&AppId::from("c")).unwrap();
        assert!(c.update_available && c.ignored);
        assert_eq!(provider.count_of_available_updates(|app| app.is_supported()), 1);
        let updatable: Vec<String> = provider
            .updatable_apps()
            .iter()
            .map(|app| app.id.to_string())
            .collect();
        assert_eq!(updatable, vec!["b"]);
    }

    #[tokio::test]
    async fn test_failed_check_does_not_abort_scan() {
        // No answer for "a": its check fails
        let (mut provider, _db) = provider_with(abc(), &[("b", Some("3.0")), ("c", None)]);

        provider.run();
        provider.settle().await;

        let a = provider.app(&AppId::from("a")).unwrap();
        assert!(a.remote.is_none());
        assert!(!a.update_available);
        assert!(provider.app(&AppId::from("b")).unwrap().update_available);
        assert_eq!(provider.updatable_apps().len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_failure_still_finishes() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut provider = AppProvider::new(
            Arc::new(FailingDiscovery),
            Arc::new(TableChecker {
                remote: HashMap::new(),
            }),
            Arc::new(Database::open_in_memory().unwrap()),
            4,
        );
        provider.set_progress_delegate(Some(Box::new(RecordingDelegate(Arc::clone(&events)))));

        provider.run();
        provider.settle().await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::StartScanning, Event::Finished]
        );
        assert!(!provider.is_scanning());
    }

    #[tokio::test]
    async fn test_observers_see_every_change() {
        let (mut provider, _db) =
            provider_with(abc(), &[("a", Some("1.0")), ("b", Some("2.0")), ("c", Some("1.0"))]);
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notifications);
        let _sub = provider.subscribe(move |apps| {
            let available = apps.iter().filter(|a| a.update_available).count();
            sink.lock().unwrap().push((apps.len(), available));
        });

        provider.run();
        provider.settle().await;

        let notifications = notifications.lock().unwrap().clone();
        // Discovery plus one per check
        assert_eq!(notifications.len(), 4);
        assert_eq!(notifications.last(), Some(&(3, 1)));
    }

    #[tokio::test]
    async fn test_poll_applies_results_incrementally() {
        let (mut provider, _db) = provider_with(abc(), &[("a", Some("2.0"))]);
        provider.run();

        for _ in 0..200 {
            provider.poll();
            if !provider.is_scanning() {
                break;
            }
            if let Some(progress) = provider.scan_progress() {
                assert!(progress.completed <= progress.total);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!provider.is_scanning());
        assert_eq!(provider.apps().len(), 3);
    }

    #[tokio::test]
    async fn test_set_ignored_state_persists_and_notifies() {
        let (mut provider, db) = provider_with(abc(), &[("b", Some("2.0"))]);
        provider.run();
        provider.settle().await;
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let _sub = provider.subscribe(move |_| *counter.lock().unwrap() += 1);

        provider.set_ignored_state(true, &AppId::from("b")).unwrap();
        assert!(provider.updatable_apps().is_empty());
        assert!(db.ignored().unwrap().contains(&AppId::from("b")));

        // Unchanged state does not notify again
        provider.set_ignored_state(true, &AppId::from("b")).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);

        provider.set_ignored_state(false, &AppId::from("b")).unwrap();
        assert_eq!(provider.updatable_apps().len(), 1);
    }

    #[tokio::test]
    async fn test_rescan_keeps_known_results_until_rechecked() {
        let (mut provider, _db) = provider_with(abc(), &[("b", Some("2.0"))]);
        provider.run();
        provider.settle().await;
        assert!(provider.app(&AppId::from("b")).unwrap().update_available);

        let mut seen_during_rescan = Vec::new();
        provider.run();
        while provider.is_scanning() {
            provider.poll();
            if let Some(b) = provider.app(&AppId::from("b")) {
                seen_during_rescan.push(b.update_available);
            }
            tokio::task::yield_now().await;
        }
        assert!(seen_during_rescan.iter().all(|available| *available));
    }

    #[tokio::test]
    async fn test_discover_without_scan() {
        let (mut provider, _db) = provider_with(abc(), &[]);
        provider.discover().unwrap();
        assert_eq!(provider.apps().len(), 3);
        assert!(!provider.is_scanning());
    }
}
