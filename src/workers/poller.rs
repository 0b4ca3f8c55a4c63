use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use crossbeam::channel::Sender;
use tokio::time::MissedTickBehavior;

use crate::{
    api::Fetch,
    cache::{QueryResult, ResourceQueryKey},
    features::resource::{fetch_resources, Resource, ResourceCache},
    logger,
};

use super::Worker;

#[derive(Debug, Clone)]
pub struct PollEvent {
    pub key: ResourceQueryKey,
    pub result: QueryResult<Vec<Resource>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerResult {
    Terminated,
    /// The receiving side went away
    Disconnected,
}

/// Refetches one key at a fixed interval until terminated.
#[derive(Clone)]
pub struct Poller {
    is_terminated: Arc<AtomicBool>,
    tx: Sender<PollEvent>,
    fetch: Arc<dyn Fetch>,
    cache: ResourceCache,
    key: ResourceQueryKey,
    interval: Duration,
}

impl Poller {
    pub fn new(
        is_terminated: Arc<AtomicBool>,
        tx: Sender<PollEvent>,
        fetch: Arc<dyn Fetch>,
        cache: ResourceCache,
        key: ResourceQueryKey,
        interval: Duration,
    ) -> Self {
        Self {
            is_terminated,
            tx,
            fetch,
            cache,
            key,
            interval,
        }
    }
}

#[async_trait]
impl Worker for Poller {
    type Output = PollerResult;

    async fn run(&self) -> Self::Output {
        logger!(info, "start polling {} every {:?}", self.key, self.interval);

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_terminated.load(Ordering::Relaxed) {
            interval.tick().await;

            if self.is_terminated.load(Ordering::Relaxed) {
                break;
            }

            let fetch = self.fetch.clone();
            let key = self.key.clone();

            let result = self
                .cache
                .refetch(&self.key, move || async move { fetch_resources(&*fetch, &key).await })
                .await;

            if let Err(e) = &result {
                logger!(error, "poll {} failed: {}", self.key, e);
            }

            let event = PollEvent {
                key: self.key.clone(),
                result,
            };

            if self.tx.send(event).is_err() {
                logger!(info, "stop polling {}: receiver dropped", self.key);
                return PollerResult::Disconnected;
            }
        }

        logger!(info, "stop polling {}", self.key);

        PollerResult::Terminated
    }
}
