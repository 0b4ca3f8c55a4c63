use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;

use crate::{
    api::{endpoint::ResourceTarget, Fetch, FetchResponse},
    cache::{CacheEntry, DelayedTask, QueryError, QueryStatus, ResourceQueryKey},
    features::{
        mutation::{Confirmation, DeleteMode, MutationRequest, Mutator},
        resource::{fetch_resources, Resource, ResourceCache},
    },
    logger,
};

use super::{
    filter::{Filter, ScopeFilter},
    sort::{SortField, SortState},
    table::ResourceTable,
};

/// What the view renders. Only written while mounted.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub resources: Option<Arc<Vec<Resource>>>,
    pub status: QueryStatus,
    /// Inline, dismissible
    pub banner: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ViewState {
    fn apply(&mut self, entry: &CacheEntry<Vec<Resource>>) {
        self.resources = entry.data.clone();
        self.status = entry.status;
        self.fetched_at = entry.fetched_at;

        if entry.status == QueryStatus::Error {
            self.banner = entry.error.clone();
        } else if entry.status == QueryStatus::Success {
            self.banner = None;
        }
    }
}

/// Pending confirmation of a mutation
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmDialog {
    pub mutation: MutationRequest,
    pub confirmation: Confirmation,
    /// Set when the confirmed call failed. The dialog stays open.
    pub error: Option<String>,
}

/// Sortable, filterable list bound to one cache key.
pub struct ResourceListView {
    fetch: Arc<dyn Fetch>,
    cache: ResourceCache,
    mutator: Mutator,
    key: ResourceQueryKey,
    filter: Filter,
    sort: SortState,
    mounted: Arc<AtomicBool>,
    state: Arc<Mutex<ViewState>>,
    watcher: Option<AbortHandle>,
    pending: Vec<DelayedTask>,
    dialog: Option<ConfirmDialog>,
}

impl ResourceListView {
    pub fn new(
        mutator: Mutator,
        fetch: Arc<dyn Fetch>,
        cache: ResourceCache,
        key: ResourceQueryKey,
    ) -> Self {
        Self {
            fetch,
            cache,
            mutator,
            key,
            filter: Filter::default(),
            sort: SortState::default(),
            mounted: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(ViewState::default())),
            watcher: None,
            pending: Vec::new(),
            dialog: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &ResourceQueryKey {
        &self.key
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Starts following the cache entry. Must run inside a tokio runtime.
    pub fn mount(&mut self) {
        if self.is_mounted() {
            return;
        }

        logger!(debug, "mount list view {}", self.key);

        self.mounted.store(true, Ordering::SeqCst);

        let mut rx = self.cache.subscribe(&self.key);
        let mounted = self.mounted.clone();
        let state = self.state.clone();

        let handle = tokio::spawn(async move {
            loop {
                if !mounted.load(Ordering::SeqCst) {
                    break;
                }

                let entry = rx.borrow_and_update().clone();

                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(&entry);

                if rx.changed().await.is_err() {
                    break;
                }
            }
        });

        self.watcher = Some(handle.abort_handle());
    }

    /// Late responses are no longer applied and pending refetches owned by
    /// this view are cancelled. Shared requests keep running.
    pub fn unmount(&mut self) {
        logger!(debug, "unmount list view {}", self.key);

        self.mounted.store(false, Ordering::SeqCst);

        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }

        for task in self.pending.drain(..) {
            task.cancel();
        }

        self.dialog = None;
    }

    pub async fn load(&self) -> Result<(), QueryError> {
        self.query(false).await
    }

    pub async fn refresh(&self) -> Result<(), QueryError> {
        self.query(true).await
    }

    async fn query(&self, force: bool) -> Result<(), QueryError> {
        let fetch = self.fetch.clone();
        let key = self.key.clone();
        let fetcher = move || async move { fetch_resources(&*fetch, &key).await };

        let result = if force {
            self.cache.refetch(&self.key, fetcher).await
        } else {
            self.cache.fetch(&self.key, fetcher).await
        };

        self.sync();

        result.map(|_| ())
    }

    /// Copies the cache entry into the view state if still mounted.
    pub fn sync(&self) {
        if !self.is_mounted() {
            return;
        }

        if let Some(entry) = self.cache.entry(&self.key) {
            self.lock().apply(&entry);
        }
    }

    pub fn state(&self) -> ViewState {
        self.lock().clone()
    }

    pub fn dismiss_banner(&self) {
        self.lock().banner = None;
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn set_filter(&mut self, query: impl AsRef<str>) {
        self.filter.set_query(query);
    }

    pub fn set_scope(&mut self, scope: ScopeFilter) {
        self.filter.set_scope(scope);
    }

    pub fn sort(&self) -> SortState {
        self.sort
    }

    pub fn select_sort(&mut self, field: SortField) {
        self.sort.select(field);
    }

    pub fn set_sort(&mut self, sort: SortState) {
        self.sort = sort;
    }

    /// Filtered and sorted rows of the last applied data
    pub fn rows(&self) -> Vec<Resource> {
        let Some(resources) = self.lock().resources.clone() else {
            return Vec::new();
        };

        let mut visible = self.filter.apply(resources.iter());
        self.sort.sort(&mut visible);

        visible.into_iter().cloned().collect()
    }

    pub fn table(&self, now: DateTime<Utc>) -> ResourceTable {
        let rows = self.rows();
        let rows: Vec<&Resource> = rows.iter().collect();

        ResourceTable::build(&rows, now)
    }

    pub fn dialog(&self) -> Option<&ConfirmDialog> {
        self.dialog.as_ref()
    }

    pub fn request_delete(&mut self, target: &ResourceTarget, mode: DeleteMode) -> &ConfirmDialog {
        self.request_mutation(MutationRequest::delete(target, mode))
    }

    pub fn request_mutation(&mut self, mutation: MutationRequest) -> &ConfirmDialog {
        let confirmation = mutation.confirmation();

        self.dialog.insert(ConfirmDialog {
            mutation,
            confirmation,
            error: None,
        })
    }

    pub fn cancel_dialog(&mut self) {
        self.dialog = None;
    }

    /// Runs the confirmed mutation.
    ///
    /// Success closes the dialog and schedules the refetch. Failure keeps the
    /// dialog open with the error.
    pub async fn confirm(&mut self) -> Result<FetchResponse> {
        let mutation = match &mut self.dialog {
            Some(dialog) => {
                dialog.error = None;
                dialog.mutation.clone()
            }
            None => return Err(anyhow!("nothing to confirm")),
        };

        match self.mutator.execute(mutation).await {
            Ok(outcome) => {
                self.dialog = None;
                self.pending.retain(|task| !task.is_finished());
                self.pending.push(outcome.refetch);

                Ok(outcome.response)
            }
            Err(e) => {
                if let Some(dialog) = &mut self.dialog {
                    dialog.error = Some(format!("{:#}", e));
                }

                Err(e)
            }
        }
    }

    pub fn has_pending_refetch(&self) -> bool {
        self.pending.iter().any(|task| !task.is_finished())
    }

    /// Waits for the scheduled refetches, then syncs the view.
    pub async fn settle(&mut self) {
        for task in self.pending.drain(..) {
            task.wait().await;
        }

        self.sync();
    }
}

impl Drop for ResourceListView {
    fn drop(&mut self) {
        if self.is_mounted() {
            self.unmount();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::sleep;

    use crate::{
        api::{
            mock::{json_response, MockTestFetch},
            ClusterContext, FetchRequest,
        },
        config::RefetchConfig,
    };

    use super::*;

    fn view(fetch: MockTestFetch, key: ResourceQueryKey) -> ResourceListView {
        let fetch: Arc<dyn Fetch> = Arc::new(fetch);
        let cache = ResourceCache::new();
        let mutator = Mutator::new(fetch.clone(), cache.clone(), RefetchConfig::default());

        ResourceListView::new(mutator, fetch, cache, key)
    }

    fn pods_key() -> ResourceQueryKey {
        ResourceQueryKey::new("pods").namespace(Some("default"))
    }

    fn pods_request() -> FetchRequest {
        FetchRequest::get("/api/pods").query("namespace", "default")
    }

    #[tokio::test]
    async fn pods_in_default_namespace() {
        let mut fetch = MockTestFetch::new();

        fetch
            .expect_send()
            .with(eq(pods_request()))
            .times(1)
            .returning(|_| {
                Ok(json_response(
                    StatusCode::OK,
                    json!([{
                        "name": "pod1",
                        "status": "Running",
                        "created": "2024-01-01T00:00:00Z"
                    }]),
                ))
            });

        let mut view = view(fetch, pods_key());
        view.mount();
        view.load().await.unwrap();

        let rows = view.rows();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "pod1");
        assert_eq!(rows[0].status, "Running");

        let table = view.table(Utc::now());
        assert_eq!(table.rows()[0].row[0], "pod1");
        assert_eq!(table.rows()[0].row[1], "Running");
    }

    #[tokio::test]
    async fn failed_load_shows_banner() {
        let mut fetch = MockTestFetch::new();

        fetch.expect_send().returning(|_| {
            Ok(json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "backend unavailable" }),
            ))
        });

        let mut view = view(fetch, pods_key());
        view.mount();

        assert!(view.load().await.is_err());

        let state = view.state();
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(
            state.banner.as_deref(),
            Some("HTTP 500: backend unavailable")
        );

        view.dismiss_banner();
        assert_eq!(view.state().banner, None);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_is_not_applied_after_unmount() {
        let mut fetch = MockTestFetch::new();

        fetch.expect_send().returning(|_| {
            Ok(json_response(StatusCode::OK, json!([{ "name": "pod1" }])))
        });

        let fetch: Arc<dyn Fetch> = Arc::new(fetch);
        let cache = ResourceCache::new();
        let mutator = Mutator::new(fetch.clone(), cache.clone(), RefetchConfig::default());

        let mut view = ResourceListView::new(mutator, fetch.clone(), cache.clone(), pods_key());
        view.mount();
        view.unmount();

        view.load().await.unwrap();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(view.state().resources, None);
        assert_eq!(cache.data(&pods_key()).map(|d| d.len()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn mounted_view_follows_refetch_by_others() {
        let mut fetch = MockTestFetch::new();

        let mut calls = 0;
        fetch.expect_send().returning(move |_| {
            calls += 1;
            let names: Vec<_> = (0..calls)
                .map(|i| json!({ "name": format!("pod{}", i) }))
                .collect();
            Ok(json_response(StatusCode::OK, json!(names)))
        });

        let mut view = view(fetch, pods_key());
        view.mount();
        view.load().await.unwrap();
        assert_eq!(view.rows().len(), 1);

        let cache = view.cache.clone();
        let fetch = view.fetch.clone();
        let key = pods_key();
        cache
            .refetch(&pods_key(), move || async move { fetch_resources(&*fetch, &key).await })
            .await
            .unwrap();

        sleep(Duration::from_millis(1)).await;

        assert_eq!(view.rows().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_keeps_dialog_open() {
        let mut fetch = MockTestFetch::new();

        fetch
            .expect_send()
            .with(eq(pods_request()))
            .times(1)
            .returning(|_| Ok(json_response(StatusCode::OK, json!([{ "name": "web-0" }]))));

        fetch
            .expect_send()
            .withf(|request| request.method == http::Method::DELETE)
            .times(1)
            .returning(|_| {
                Ok(json_response(
                    StatusCode::CONFLICT,
                    json!({ "message": "object is being deleted" }),
                ))
            });

        let mut view = view(fetch, pods_key());
        view.mount();
        view.load().await.unwrap();

        let target = ResourceTarget::namespaced("Pod", "web-0", "default");
        view.request_delete(&target, DeleteMode::Force);

        assert!(view.confirm().await.is_err());

        let dialog = view.dialog().unwrap();
        assert_eq!(
            dialog.error.as_deref(),
            Some("HTTP 409: object is being deleted")
        );
        assert!(!view.has_pending_refetch());
        assert_eq!(view.rows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_cancels_pending_refetch() {
        let mut fetch = MockTestFetch::new();

        fetch.expect_cluster().returning(ClusterContext::default_cluster);

        fetch
            .expect_send()
            .with(eq(pods_request()))
            .times(1)
            .returning(|_| Ok(json_response(StatusCode::OK, json!([{ "name": "web-0" }]))));

        fetch
            .expect_send()
            .withf(|request| request.method == http::Method::DELETE)
            .times(1)
            .returning(|_| Ok(json_response(StatusCode::OK, json!({}))));

        let mut view = view(fetch, pods_key());
        view.mount();
        view.load().await.unwrap();

        let target = ResourceTarget::namespaced("Pod", "web-0", "default");
        view.request_delete(&target, DeleteMode::Graceful);
        view.confirm().await.unwrap();

        assert!(view.dialog().is_none());
        assert!(view.has_pending_refetch());

        view.unmount();
        sleep(Duration::from_secs(1)).await;

        // only the initial GET was issued
        assert!(!view.cache.entry(&pods_key()).unwrap().stale);
    }
}
