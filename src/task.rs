//! Task polling utilities
//!
//! Background work (scans, update operations) runs on tokio tasks while the
//! owner of the app list applies results from its own context. These helpers
//! let that owner check on a task without blocking.

use futures::FutureExt;
use tokio::task::JoinHandle;

/// Result of polling a task
pub enum PollResult<T> {
    /// No task to poll (task was None)
    NoTask,
    /// Task is still running
    Pending,
    /// Task completed with result (may be Ok or join error)
    Complete(Result<T, tokio::task::JoinError>),
}

/// Poll an optional task handle and take its result if finished.
///
/// # Example
/// ```ignore
/// match poll_task(&mut self.scan_task) {
///     PollResult::Complete(Ok(())) => { /* finished */ }
///     PollResult::Complete(Err(e)) => { /* task panicked or was aborted */ }
///     PollResult::Pending | PollResult::NoTask => {}
/// }
/// ```
pub fn poll_task<T>(task: &mut Option<JoinHandle<T>>) -> PollResult<T> {
    let Some(handle) = task.as_mut() else {
        return PollResult::NoTask;
    };

    if !handle.is_finished() {
        return PollResult::Pending;
    }

    match handle.now_or_never() {
        Some(result) => {
            task.take();
            PollResult::Complete(result)
        }
        None => {
            // Finished but the join output is not ready yet; try again next poll
            tracing::debug!("Task not ready despite is_finished()");
            PollResult::Pending
        }
    }
}
