//! Cancellable periodic polling.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Owns one background poll task.
///
/// The task is aborted when the handle is dropped, so replacing a stored
/// handle stops the previous poll.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Calls `tick` immediately and then every `interval` until it breaks.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn<F, Fut>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick().await.is_break() {
                    break;
                }
            }
        });
        Self { task }
    }

    /// Stops the task.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Returns whether the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
