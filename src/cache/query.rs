use std::{
    collections::BTreeMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::anyhow;
use chrono::Utc;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt as _,
};
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::logger;

use super::{CacheEntry, KeyPrefix, ResourceQueryKey};

/// Error handed to every subscriber of one request.
#[derive(Debug, Clone, Error)]
#[error("{0:#}")]
pub struct QueryError(Arc<anyhow::Error>);

impl QueryError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for QueryError {
    fn from(e: anyhow::Error) -> Self {
        Self(Arc::new(e))
    }
}

pub type QueryResult<T> = Result<Arc<T>, QueryError>;

type SharedRequest<T> = Shared<BoxFuture<'static, QueryResult<T>>>;

struct InFlight<T> {
    seq: u64,
    request: SharedRequest<T>,
}

struct Slot<T> {
    entry: CacheEntry<T>,
    /// Sequence number of the latest request issued for this key
    issued: u64,
    /// Requests up to this sequence number were issued before the last invalidation
    stale_through: u64,
    in_flight: Option<InFlight<T>>,
    tx: watch::Sender<CacheEntry<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        let (tx, _) = watch::channel(CacheEntry::default());

        Self {
            entry: CacheEntry::default(),
            issued: 0,
            stale_through: 0,
            in_flight: None,
            tx,
        }
    }

    fn publish(&self) {
        self.tx.send_replace(self.entry.clone());
    }

    fn invalidate(&mut self) {
        self.stale_through = self.issued;
        self.entry.stale = true;
        self.publish();
    }

    /// In-flight request that a new reader may join
    fn joinable(&self) -> Option<&InFlight<T>> {
        self.in_flight
            .as_ref()
            .filter(|in_flight| self.stale_through < in_flight.seq)
    }
}

struct Inner<T> {
    /// Shared by all keys, so a removed and re-created key never reuses a number
    seq: u64,
    slots: BTreeMap<ResourceQueryKey, Slot<T>>,
}

enum Plan<T> {
    Cached(Arc<T>),
    Join(SharedRequest<T>),
    Issue {
        seq: u64,
        request: SharedRequest<T>,
        tx: oneshot::Sender<QueryResult<T>>,
    },
}

/// Request-coalescing cache keyed by [`ResourceQueryKey`].
///
/// Handles are cheap to clone and share one store. Every request runs on its
/// own task, so a subscriber that goes away never cancels the request for
/// the others. Only the latest request issued for a key may write its entry;
/// superseded responses are dropped.
pub struct QueryCache<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for QueryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> QueryCache<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                seq: 0,
                slots: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached data when fresh, otherwise the in-flight request or a new one.
    ///
    /// `fetcher` runs without the cache lock held, so it may read the cache.
    pub async fn fetch<F, Fut>(&self, key: &ResourceQueryKey, fetcher: F) -> QueryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.query(key, false, fetcher).await
    }

    /// Always issues a new request, superseding any in-flight one.
    pub async fn refetch<F, Fut>(&self, key: &ResourceQueryKey, fetcher: F) -> QueryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.query(key, true, fetcher).await
    }

    async fn query<F, Fut>(
        &self,
        key: &ResourceQueryKey,
        force: bool,
        fetcher: F,
    ) -> QueryResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        match self.plan(key, force) {
            Plan::Cached(data) => Ok(data),
            Plan::Join(request) => request.await,
            Plan::Issue { seq, request, tx } => {
                self.issue(key, seq, fetcher(), tx);
                request.await
            }
        }
    }

    /// Decides under the lock. A new request is registered as in flight
    /// before its fetcher runs, so concurrent readers join it.
    fn plan(&self, key: &ResourceQueryKey, force: bool) -> Plan<T> {
        let mut inner = self.lock();

        inner.seq += 1;
        let seq = inner.seq;

        let slot = inner.slots.entry(key.clone()).or_insert_with(Slot::new);

        if !force {
            if let Some(in_flight) = slot.joinable() {
                logger!(debug, "join request #{} for {}", in_flight.seq, key);

                return Plan::Join(in_flight.request.clone());
            }

            if slot.entry.is_fresh() {
                if let Some(data) = &slot.entry.data {
                    return Plan::Cached(data.clone());
                }
            }
        }

        logger!(debug, "issue request #{} for {}", seq, key);

        slot.issued = seq;
        slot.entry.begin_loading();
        slot.publish();

        let (tx, rx) = oneshot::channel();

        let request = async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(QueryError::from(anyhow!("query task failed"))),
            }
        }
        .boxed()
        .shared();

        slot.in_flight = Some(InFlight {
            seq,
            request: request.clone(),
        });

        Plan::Issue { seq, request, tx }
    }

    fn issue<Fut>(
        &self,
        key: &ResourceQueryKey,
        seq: u64,
        request: Fut,
        tx: oneshot::Sender<QueryResult<T>>,
    ) where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let cache = self.clone();
        let key = key.clone();

        tokio::spawn(async move {
            let result: QueryResult<T> = request.await.map(Arc::new).map_err(QueryError::from);

            cache.complete(&key, seq, &result);

            let _ = tx.send(result);
        });
    }

    fn complete(&self, key: &ResourceQueryKey, seq: u64, result: &QueryResult<T>) {
        let mut inner = self.lock();

        let Some(slot) = inner.slots.get_mut(key) else {
            logger!(debug, "discard response #{} for removed key {}", seq, key);
            return;
        };

        if seq != slot.issued {
            logger!(
                debug,
                "discard superseded response #{} for {} (latest #{})",
                seq,
                key,
                slot.issued
            );
            return;
        }

        slot.in_flight = None;

        let stale = seq <= slot.stale_through;

        match result {
            Ok(data) => slot.entry.succeed(data.clone(), Utc::now(), stale),
            Err(e) => {
                logger!(error, "request #{} for {} failed: {}", seq, key, e);

                slot.entry.fail(e.to_string(), stale)
            }
        }

        slot.publish();
    }

    pub fn entry(&self, key: &ResourceQueryKey) -> Option<CacheEntry<T>> {
        self.lock().slots.get(key).map(|slot| slot.entry.clone())
    }

    pub fn data(&self, key: &ResourceQueryKey) -> Option<Arc<T>> {
        self.lock()
            .slots
            .get(key)
            .and_then(|slot| slot.entry.data.clone())
    }

    /// Marks the entry stale. The next read issues a new request.
    pub fn invalidate(&self, key: &ResourceQueryKey) -> bool {
        let mut inner = self.lock();

        match inner.slots.get_mut(key) {
            Some(slot) => {
                logger!(debug, "invalidate {}", key);
                slot.invalidate();
                true
            }
            None => false,
        }
    }

    pub fn invalidate_prefix(&self, prefix: &KeyPrefix) -> usize {
        let mut inner = self.lock();

        inner
            .slots
            .iter_mut()
            .filter(|(key, _)| prefix.matches(key))
            .map(|(key, slot)| {
                logger!(debug, "invalidate {}", key);
                slot.invalidate();
            })
            .count()
    }

    pub fn remove(&self, key: &ResourceQueryKey) -> Option<CacheEntry<T>> {
        self.lock().slots.remove(key).map(|slot| slot.entry)
    }

    pub fn clear(&self) {
        self.lock().slots.clear();
    }

    pub fn keys(&self) -> Vec<ResourceQueryKey> {
        self.lock().slots.keys().cloned().collect()
    }

    /// Sees every state change of the entry, starting from the current one.
    pub fn subscribe(&self, key: &ResourceQueryKey) -> watch::Receiver<CacheEntry<T>> {
        let mut inner = self.lock();

        inner
            .slots
            .entry(key.clone())
            .or_insert_with(Slot::new)
            .tx
            .subscribe()
    }
}
