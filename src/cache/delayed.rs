use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

use crate::logger;

/// Work deferred by a fixed delay, e.g. a refetch after a mutation.
///
/// The task is detached: dropping the handle lets it run. `cancel` aborts it
/// deterministically, which is what an unmounting view does.
#[derive(Debug)]
pub struct DelayedTask {
    delay: Duration,
    handle: JoinHandle<()>,
}

impl DelayedTask {
    pub fn schedule<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        Self { delay, handle }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            logger!(debug, "cancel delayed task ({:?})", self.delay);
        }

        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Resolves once the task ran or was cancelled.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                logger!(error, "delayed task failed: {}", e);
            }
        }
    }
}
