use std::future::Future;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

#[derive(Debug, Default)]
/// Tracks detached per-event units so shutdown can wait for them.
pub struct BackgroundTasks {
    tasks: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spawn<F>(&self, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        while let Some(finished) = tasks.try_join_next() {
            log_join_result(finished);
        }
        tasks.spawn(unit);
    }

    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Waits for every tracked unit to finish and returns how many were
    /// awaited. Units spawned while draining are picked up by a later call.
    pub async fn drain(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        let mut drained = 0_usize;
        while let Some(finished) = tasks.join_next().await {
            log_join_result(finished);
            drained += 1;
        }
        drained
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        tracing::warn!(%error, "background unit terminated abnormally");
    }
}
