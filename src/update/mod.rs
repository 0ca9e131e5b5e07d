//! Update operations for individual applications.
//!
//! This module handles:
//! - Driving one operation per application and publishing its lifecycle
//!   through the `ProgressHub`
//! - Downloading feed archives with progress tracking
//! - Verifying and extracting archives, then swapping the bundle into place
//! - Handing store-sourced apps off to their store page
//!
//! Executors run on tokio tasks and report through a `ProgressReporter`.
//! Reports are queued and only reach the hub when the queue's owner calls
//! `UpdateQueue::poll`, so every notification happens on one context and
//! each app's states arrive in the order they were reported.

mod download;
mod executor;
mod install;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::bundle::{AppId, AppRecord};
use crate::hub::ProgressHub;
use crate::operation::UpdateState;
use crate::task::{PollResult, poll_task};

pub use download::download_dir;
pub use executor::BundleInstaller;

/// Errors that can occur during an update
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Update cancelled")]
    Cancelled,

    #[error("No update available for {0}")]
    NoUpdate(AppId),

    #[error("{0} cannot be updated from here")]
    Unsupported(AppId),

    #[error("No download link for {0}")]
    MissingDownload(AppId),

    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed with status: {0}")]
    Status(reqwest::StatusCode),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Install failed: {0}")]
    Install(String),

    #[error("Could not open store page: {0}")]
    Open(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Future returned by an executor
pub type UpdateFuture = BoxFuture<'static, Result<(), UpdateError>>;

/// Performs the download → extract → install work for one application.
///
/// Implementations report progress through `progress` and should stop with
/// `UpdateError::Cancelled` soon after `cancel` fires. Terminal states
/// (`None`, `Error`) are published by the queue from the returned result.
pub trait UpdateExecutor: Send + Sync {
    fn execute(
        &self,
        app: Arc<AppRecord>,
        progress: ProgressReporter,
        cancel: CancelToken,
    ) -> UpdateFuture;
}

/// Cancellation signal handed to executors
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<(), UpdateError> {
        if self.is_cancelled() {
            Err(UpdateError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested. Never resolves otherwise.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Queue dropped the operation without cancelling it
            std::future::pending::<()>().await;
        }
    }
}

enum Report {
    State(UpdateState),
    Finished(Result<(), UpdateError>),
}

struct Transition {
    app: AppId,
    generation: u64,
    report: Report,
}

/// Sends state reports for one operation back to the queue
#[derive(Clone)]
pub struct ProgressReporter {
    app: AppId,
    generation: u64,
    tx: mpsc::UnboundedSender<Transition>,
}

impl ProgressReporter {
    pub fn report(&self, state: UpdateState) {
        let _ = self.tx.send(Transition {
            app: self.app.clone(),
            generation: self.generation,
            report: Report::State(state),
        });
    }

    pub fn downloading(&self, loaded: u64, total: u64) {
        self.report(UpdateState::Downloading { loaded, total });
    }

    pub fn extracting(&self, fraction: f64) {
        self.report(UpdateState::Extracting(fraction));
    }
}

struct Operation {
    generation: u64,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    /// Whether the executor has reported anything yet
    started: bool,
}

/// Owns all running update operations.
///
/// At most one operation runs per application. Methods take `&mut self`; the
/// owner is the single context from which hub notifications are delivered.
pub struct UpdateQueue {
    hub: ProgressHub,
    executor: Arc<dyn UpdateExecutor>,
    operations: HashMap<AppId, Operation>,
    tx: mpsc::UnboundedSender<Transition>,
    rx: mpsc::UnboundedReceiver<Transition>,
    next_generation: u64,
}

impl UpdateQueue {
    pub fn new(hub: ProgressHub, executor: Arc<dyn UpdateExecutor>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            hub,
            executor,
            operations: HashMap::new(),
            tx,
            rx,
            next_generation: 0,
        }
    }

    /// Current state of `app`'s operation
    pub fn state(&self, app: &AppId) -> UpdateState {
        self.hub.state(app)
    }

    pub fn in_flight(&self) -> usize {
        self.operations.len()
    }

    /// Start updating `app`. Retries a failed operation.
    ///
    /// Returns `false` without doing anything if an operation is already in
    /// flight for the app.
    pub fn start(&mut self, app: Arc<AppRecord>) -> bool {
        let id = app.id.clone();
        let current = self.hub.state(&id);
        if current.is_in_flight() || self.operations.contains_key(&id) {
            tracing::debug!("{}: update already in flight ({:?})", id, current);
            return false;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let (cancel_tx, cancel_rx) = watch::channel(false);

        self.hub.publish(&id, UpdateState::Pending);
        tracing::info!("Starting update of {} ({})", app.name, id);

        let reporter = ProgressReporter {
            app: id.clone(),
            generation,
            tx: self.tx.clone(),
        };
        let finished_tx = self.tx.clone();
        let executor = Arc::clone(&self.executor);
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let result = executor
                .execute(app, reporter, CancelToken { rx: cancel_rx })
                .await;
            let _ = finished_tx.send(Transition {
                app: task_id,
                generation,
                report: Report::Finished(result),
            });
        });

        self.operations.insert(
            id,
            Operation {
                generation,
                cancel: cancel_tx,
                task: Some(task),
                started: false,
            },
        );
        true
    }

    /// Request cancellation of `app`'s operation.
    ///
    /// `Cancelling` is published immediately; `None` follows once the work
    /// has stopped. Returns `false` if nothing is running.
    pub fn cancel(&mut self, app: &AppId) -> bool {
        let current = self.hub.state(app);
        let Some(operation) = self.operations.get_mut(app) else {
            return false;
        };
        if current == UpdateState::Cancelling || !current.can_transition_to(&UpdateState::Cancelling) {
            return false;
        }

        tracing::info!("Cancelling update of {}", app);
        self.hub.publish(app, UpdateState::Cancelling);
        let _ = operation.cancel.send(true);

        if !operation.started {
            if let Some(task) = &operation.task {
                task.abort();
            }
        }
        true
    }

    /// Clear a failed operation back to `None`
    pub fn acknowledge(&mut self, app: &AppId) {
        if self.hub.state(app).is_error() {
            self.hub.publish(app, UpdateState::None);
        }
    }

    /// Deliver queued reports to the hub and reap finished tasks.
    ///
    /// Returns the number of reports applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(transition) = self.rx.try_recv() {
            self.apply(transition);
            applied += 1;
        }

        let ids: Vec<AppId> = self.operations.keys().cloned().collect();
        for id in ids {
            let Some(operation) = self.operations.get_mut(&id) else {
                continue;
            };
            match poll_task(&mut operation.task) {
                PollResult::Complete(Ok(())) | PollResult::NoTask | PollResult::Pending => {}
                PollResult::Complete(Err(e)) => {
                    let terminal = if e.is_cancelled() {
                        UpdateState::None
                    } else {
                        tracing::error!("Update task for {} panicked: {}", id, e);
                        UpdateState::Error(format!("Update task panicked: {}", e))
                    };
                    self.operations.remove(&id);
                    self.hub.publish(&id, terminal);
                }
            }
        }

        applied
    }

    /// Wait until every running operation has finished.
    pub async fn settle(&mut self) {
        loop {
            self.poll();
            if self.operations.is_empty() {
                return;
            }
            if let Ok(Some(transition)) =
                tokio::time::timeout(Duration::from_millis(50), self.rx.recv()).await
            {
                self.apply(transition);
            }
        }
    }

    fn apply(&mut self, transition: Transition) {
        let Transition {
            app,
            generation,
            report,
        } = transition;

        let Some(operation) = self.operations.get_mut(&app) else {
            tracing::debug!("{}: dropping report for finished operation", app);
            return;
        };
        if operation.generation != generation {
            tracing::debug!("{}: dropping report from a previous operation", app);
            return;
        }

        match report {
            Report::State(state) => {
                operation.started = true;
                let current = self.hub.state(&app);
                if current.can_transition_to(&state) {
                    self.hub.publish(&app, state);
                } else {
                    tracing::debug!("{}: ignoring {:?} while {:?}", app, state, current);
                }
            }
            Report::Finished(result) => {
                let cancel_requested = *operation.cancel.borrow();
                self.operations.remove(&app);

                let terminal = match result {
                    Ok(()) => {
                        tracing::info!("Update of {} complete", app);
                        UpdateState::None
                    }
                    Err(UpdateError::Cancelled) => {
                        tracing::info!("Update of {} cancelled", app);
                        UpdateState::None
                    }
                    Err(e) if cancel_requested => {
                        tracing::info!("Update of {} cancelled ({})", app, e);
                        UpdateState::None
                    }
                    Err(e) => {
                        tracing::warn!("Update of {} failed: {}", app, e);
                        UpdateState::Error(e.to_string())
                    }
                };
                self.hub.publish(&app, terminal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::bundle::UpdateSource;
    use crate::observer::Subscription;
    use crate::version::Version;

    /// Replays a fixed script of states, optionally failing at the end
    struct ScriptedExecutor {
        states: Vec<UpdateState>,
        fail_with: Option<String>,
    }

    impl UpdateExecutor for ScriptedExecutor {
        fn execute(
            &self,
            _app: Arc<AppRecord>,
            progress: ProgressReporter,
            _cancel: CancelToken,
        ) -> UpdateFuture {
            let states = self.states.clone();
            let fail_with = self.fail_with.clone();
            Box::pin(async move {
                for state in states {
                    progress.report(state);
                }
                match fail_with {
                    Some(reason) => Err(UpdateError::Install(reason)),
                    None => Ok(()),
                }
            })
        }
    }

    /// Reports one download tick, then waits for cancellation
    struct BlockingExecutor;

    impl UpdateExecutor for BlockingExecutor {
        fn execute(
            &self,
            _app: Arc<AppRecord>,
            progress: ProgressReporter,
            mut cancel: CancelToken,
        ) -> UpdateFuture {
            Box::pin(async move {
                progress.downloading(10, 100);
                cancel.cancelled().await;
                Err(UpdateError::Cancelled)
            })
        }
    }

    /// Never starts doing anything observable
    struct IdleExecutor;

    impl UpdateExecutor for IdleExecutor {
        fn execute(
            &self,
            _app: Arc<AppRecord>,
            _progress: ProgressReporter,
            _cancel: CancelToken,
        ) -> UpdateFuture {
            Box::pin(std::future::pending())
        }
    }

    fn app(id: &str) -> Arc<AppRecord> {
        Arc::new(AppRecord::new(
            id,
            id,
            format!("/apps/{id}"),
            Version::parse("1.0").unwrap(),
            UpdateSource::Feed {
                url: "https://example.com/feed.json".into(),
            },
        ))
    }

    fn record(hub: &ProgressHub, id: &AppId) -> (Arc<Mutex<Vec<UpdateState>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = hub.subscribe(id, move |state| sink.lock().unwrap().push(state.clone()));
        (seen, sub)
    }

    async fn wait_for(queue: &mut UpdateQueue, id: &AppId, expected: &UpdateState) {
        for _ in 0..200 {
            queue.poll();
            if queue.state(id) == *expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{id} never reached {expected:?}, stuck at {:?}", queue.state(id));
    }

    #[tokio::test]
    async fn test_successful_update_lifecycle() {
        let executor = ScriptedExecutor {
            states: vec![
                UpdateState::Downloading { loaded: 50, total: 100 },
                UpdateState::Downloading { loaded: 100, total: 100 },
                UpdateState::Extracting(0.5),
                UpdateState::Extracting(1.0),
                UpdateState::Installing,
            ],
            fail_with: None,
        };
        let hub = ProgressHub::new();
        let mut queue = UpdateQueue::new(hub.clone(), Arc::new(executor));
        let target = app("com.example.editor");
        let (seen, _sub) = record(&hub, &target.id);

        assert!(queue.start(Arc::clone(&target)));
        queue.settle().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&UpdateState::Pending));
        assert_eq!(seen.last(), Some(&UpdateState::None));
        let fractions: Vec<f64> = seen.iter().filter_map(UpdateState::fraction).collect();
        assert_eq!(fractions, vec![0.375, 0.75, 0.875, 1.0]);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let hub = ProgressHub::new();
        let mut queue = UpdateQueue::new(hub, Arc::new(IdleExecutor));
        let target = app("com.example.editor");

        assert!(queue.start(Arc::clone(&target)));
        assert!(!queue.start(Arc::clone(&target)));
        assert_eq!(queue.in_flight(), 1);
        assert_eq!(queue.state(&target.id), UpdateState::Pending);
    }

    #[tokio::test]
    async fn test_failure_surfaces_as_error_and_retry_reenters_pending() {
        let executor = ScriptedExecutor {
            states: vec![UpdateState::Downloading { loaded: 1, total: 2 }],
            fail_with: Some("disk full".into()),
        };
        let hub = ProgressHub::new();
        let mut queue = UpdateQueue::new(hub, Arc::new(executor));
        let target = app("com.example.editor");

        queue.start(Arc::clone(&target));
        queue.settle().await;

        let state = queue.state(&target.id);
        assert_eq!(state, UpdateState::Error("Install failed: disk full".into()));

        assert!(queue.start(Arc::clone(&target)));
        assert_eq!(queue.state(&target.id), UpdateState::Pending);
        queue.settle().await;

        queue.acknowledge(&target.id);
        assert_eq!(queue.state(&target.id), UpdateState::None);
    }

    #[tokio::test]
    async fn test_cancel_while_downloading() {
        let hub = ProgressHub::new();
        let mut queue = UpdateQueue::new(hub.clone(), Arc::new(BlockingExecutor));
        let target = app("com.example.editor");
        let (seen, _sub) = record(&hub, &target.id);

        queue.start(Arc::clone(&target));
        wait_for(&mut queue, &target.id, &UpdateState::Downloading { loaded: 10, total: 100 }).await;

        assert!(queue.cancel(&target.id));
        assert_eq!(seen.lock().unwrap().last(), Some(&UpdateState::Cancelling));
        assert!(!queue.cancel(&target.id));

        queue.settle().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.last(), Some(&UpdateState::None));
        assert!(!seen.iter().any(UpdateState::is_error));
    }

    #[tokio::test]
    async fn test_cancel_pending_operation_reaches_none() {
        let hub = ProgressHub::new();
        let mut queue = UpdateQueue::new(hub.clone(), Arc::new(IdleExecutor));
        let target = app("com.example.editor");

        queue.start(Arc::clone(&target));
        assert!(queue.cancel(&target.id));
        assert_eq!(queue.state(&target.id), UpdateState::Cancelling);

        queue.settle().await;
        assert_eq!(queue.state(&target.id), UpdateState::None);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_without_operation() {
        let mut queue = UpdateQueue::new(ProgressHub::new(), Arc::new(IdleExecutor));
        assert!(!queue.cancel(&AppId::from("com.example.editor")));
    }
}
