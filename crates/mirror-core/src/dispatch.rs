//! Fire-and-forget background work.
//!
//! Callers hand over a boxed future and return immediately. There is no
//! cancellation handle; a host that wants work to finish before exiting
//! drains the dispatcher.

use futures::future::BoxFuture;
use std::sync::{Mutex, PoisonError};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

pub type BackgroundTask = BoxFuture<'static, ()>;

pub trait Dispatch: Send + Sync {
    fn dispatch(&self, label: &str, task: BackgroundTask);
}

/// Runs each task on the tokio runtime the caller is already on.
#[derive(Default)]
pub struct TokioDispatcher {
    tasks: Mutex<JoinSet<()>>,
}

impl TokioDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks still running.
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        reap(&mut tasks);
        tasks.len()
    }

    /// Wait for every dispatched task, including ones dispatched while
    /// draining.
    pub async fn drain(&self) {
        loop {
            let mut batch = {
                let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *tasks)
            };
            if batch.is_empty() {
                return;
            }
            while let Some(result) = batch.join_next().await {
                report(result);
            }
        }
    }
}

impl Dispatch for TokioDispatcher {
    fn dispatch(&self, label: &str, task: BackgroundTask) {
        debug!("Dispatching background task: {}", label);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        reap(&mut tasks);
        tasks.spawn(task);
    }
}

/// Collect finished tasks so a long-running host does not accumulate them.
fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        report(result);
    }
}

fn report(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!("Background task panicked: {}", e);
    }
}
