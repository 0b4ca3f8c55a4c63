//! One-shot write calls followed by a delayed refetch.
//!
//! Nothing here retries. A failed call returns its error to the caller and
//! leaves the cache untouched.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use anyhow::Result;
use futures::future::join_all;
use strum::Display;

use crate::{
    api::{
        endpoint::{self, ResourceTarget},
        Fetch, FetchRequest, FetchResponse,
    },
    cache::{DelayedTask, KeyPrefix},
    config::RefetchConfig,
    features::resource::{fetch_resources, KnownKind, ResourceCache},
    logger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum MutationKind {
    Delete,
    ForceDelete,
    Install,
    Upgrade,
    Uninstall,
    Apply,
    Update,
}

impl MutationKind {
    /// Time the backend needs before a refetch sees the change
    pub fn refetch_delay(&self, config: &RefetchConfig) -> Duration {
        match self {
            Self::Delete | Self::ForceDelete | Self::Uninstall | Self::Apply | Self::Update => {
                config.delete_delay()
            }
            Self::Install | Self::Upgrade => config.mutation_delay(),
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Delete | Self::ForceDelete | Self::Uninstall)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteMode {
    #[default]
    Graceful,
    /// Skips graceful termination and finalizers
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub title: String,
    pub message: String,
    pub destructive: bool,
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub kind: MutationKind,
    /// What the call acts on, used in confirmation copy and logs
    pub subject: String,
    pub request: FetchRequest,
    pub invalidates: Vec<KeyPrefix>,
}

impl MutationRequest {
    pub fn new(kind: MutationKind, subject: impl Into<String>, request: FetchRequest) -> Self {
        Self {
            kind,
            subject: subject.into(),
            request,
            invalidates: Vec::new(),
        }
    }

    pub fn invalidate(mut self, prefix: KeyPrefix) -> Self {
        self.invalidates.push(prefix);
        self
    }

    /// `DELETE /api/resource?kind=&name=&namespace=&force=`
    pub fn delete(target: &ResourceTarget, mode: DeleteMode) -> Self {
        let (kind, force) = match mode {
            DeleteMode::Graceful => (MutationKind::Delete, false),
            DeleteMode::Force => (MutationKind::ForceDelete, true),
        };

        let request = FetchRequest::delete(endpoint::RESOURCE)
            .query_pairs(target.query())
            .query("force", force.to_string());

        Self::new(kind, target.to_string(), request).invalidate(target_prefix(target))
    }

    pub fn confirmation(&self) -> Confirmation {
        let (title, message) = match self.kind {
            MutationKind::Delete => (
                "Delete".to_string(),
                format!("Delete {}?", self.subject),
            ),
            MutationKind::ForceDelete => (
                "Force delete".to_string(),
                format!(
                    "Force delete {}? Graceful termination and finalizers are skipped. \
                     The object is removed immediately.",
                    self.subject
                ),
            ),
            MutationKind::Install => (
                "Install".to_string(),
                format!("Install {}?", self.subject),
            ),
            MutationKind::Upgrade => (
                "Upgrade".to_string(),
                format!("Upgrade {}?", self.subject),
            ),
            MutationKind::Uninstall => (
                "Uninstall".to_string(),
                format!("Uninstall {}? All resources of the release are deleted.", self.subject),
            ),
            MutationKind::Apply => ("Apply".to_string(), format!("Apply {}?", self.subject)),
            MutationKind::Update => ("Update".to_string(), format!("Update {}?", self.subject)),
        };

        Confirmation {
            title,
            message,
            destructive: self.kind.is_destructive(),
        }
    }
}

/// Cache entries listing `target`'s kind in its namespace (and all-namespaces listings).
pub fn target_prefix(target: &ResourceTarget) -> KeyPrefix {
    let mut prefix = KeyPrefix::all();

    if let Ok(kind) = KnownKind::from_str(&target.kind) {
        prefix = prefix.kind(kind.collection());
    }

    if let Some(ns) = &target.namespace {
        prefix = prefix.namespace(ns);
    }

    prefix
}

pub trait Confirm: Send + Sync {
    fn confirm(&self, confirmation: &Confirmation) -> Result<bool>;
}

/// Interactive yes/no prompt on the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptConfirm;

impl Confirm for PromptConfirm {
    fn confirm(&self, confirmation: &Confirmation) -> Result<bool> {
        let answer = dialoguer::Confirm::new()
            .with_prompt(confirmation.message.to_string())
            .default(!confirmation.destructive)
            .interact()?;

        Ok(answer)
    }
}

/// `--yes`
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _: &Confirmation) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Debug)]
pub struct MutationOutcome {
    pub response: FetchResponse,
    /// Invalidation and refetch of the affected keys
    pub refetch: DelayedTask,
}

#[derive(Clone)]
pub struct Mutator {
    fetch: Arc<dyn Fetch>,
    cache: ResourceCache,
    delays: RefetchConfig,
}

impl Mutator {
    pub fn new(fetch: Arc<dyn Fetch>, cache: ResourceCache, delays: RefetchConfig) -> Self {
        Self {
            fetch,
            cache,
            delays,
        }
    }

    pub fn delays(&self) -> &RefetchConfig {
        &self.delays
    }

    pub async fn execute(&self, mutation: MutationRequest) -> Result<MutationOutcome> {
        let MutationRequest {
            kind,
            subject,
            request,
            invalidates,
        } = mutation;

        logger!(info, "{} {}", kind, subject);

        let response = match self.fetch.send(request).await {
            Ok(response) => response.error_for_status()?,
            Err(e) => {
                logger!(error, "{} {} failed: {:#}", kind, subject, e);
                return Err(e);
            }
        };

        let delay = kind.refetch_delay(&self.delays);

        logger!(debug, "{} {} done, refetch in {:?}", kind, subject, delay);

        Ok(MutationOutcome {
            response,
            refetch: self.schedule_refetch(invalidates, delay),
        })
    }

    /// Invalidates matching entries after `delay` and refetches them.
    pub fn schedule_refetch(&self, prefixes: Vec<KeyPrefix>, delay: Duration) -> DelayedTask {
        let cache = self.cache.clone();
        let fetch = self.fetch.clone();

        DelayedTask::schedule(delay, async move {
            let cluster = fetch.cluster();

            let prefixes: Vec<KeyPrefix> = prefixes
                .into_iter()
                .map(|prefix| prefix.cluster(&cluster))
                .collect();

            for prefix in &prefixes {
                cache.invalidate_prefix(prefix);
            }

            let keys: Vec<_> = cache
                .keys()
                .into_iter()
                .filter(|key| prefixes.iter().any(|prefix| prefix.matches(key)))
                .collect();

            let refetches = keys.iter().map(|key| {
                let fetch = fetch.clone();
                let owned = key.clone();

                cache.refetch(key, move || async move { fetch_resources(&*fetch, &owned).await })
            });

            for result in join_all(refetches).await {
                if let Err(e) = result {
                    logger!(error, "refetch after mutation failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::StatusCode;
    use mockall::predicate::{always, eq};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::{advance, sleep};

    use crate::{
        api::{
            mock::{json_response, MockTestFetch},
            ClusterContext,
        },
        cache::ResourceQueryKey,
        mock_expect,
    };

    use super::*;

    #[test]
    fn force_delete_request_and_copy() {
        let target = ResourceTarget::namespaced("Pod", "web-0", "default");

        let graceful = MutationRequest::delete(&target, DeleteMode::Graceful);
        let force = MutationRequest::delete(&target, DeleteMode::Force);

        assert_eq!(graceful.request.query_value("force"), Some("false"));
        assert_eq!(force.request.query_value("force"), Some("true"));
        assert_eq!(force.request.query_value("namespace"), Some("default"));
        assert_eq!(force.kind, MutationKind::ForceDelete);

        assert_ne!(graceful.confirmation().message, force.confirmation().message);
        assert!(force.confirmation().message.starts_with("Force delete Pod/web-0"));
        assert!(force.confirmation().destructive);
    }

    #[test]
    fn delays_per_kind() {
        let config = RefetchConfig::default();

        assert_eq!(
            MutationKind::Delete.refetch_delay(&config),
            Duration::from_millis(500)
        );
        assert_eq!(
            MutationKind::Install.refetch_delay(&config),
            Duration::from_millis(2000)
        );
        assert_eq!(
            MutationKind::Uninstall.refetch_delay(&config),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn target_prefix_uses_collection_name() {
        let prefix = target_prefix(&ResourceTarget::namespaced("Deployment", "web", "ns1"));

        assert!(prefix.matches(&ResourceQueryKey::new("deployments").namespace(Some("ns1"))));
        assert!(!prefix.matches(&ResourceQueryKey::new("pods").namespace(Some("ns1"))));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_mutation_keeps_cache() {
        let mut fetch = MockTestFetch::new();

        fetch
            .expect_cluster()
            .returning(ClusterContext::default_cluster);

        mock_expect!(
            fetch,
            send,
            always(),
            Ok(json_response(
                StatusCode::FORBIDDEN,
                json!({ "message": "pods \"web-0\" is forbidden" })
            ))
        );

        let cache = ResourceCache::new();
        let mutator = Mutator::new(Arc::new(fetch), cache.clone(), RefetchConfig::default());

        let target = ResourceTarget::namespaced("Pod", "web-0", "default");

        let err = mutator
            .execute(MutationRequest::delete(&target, DeleteMode::Graceful))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "HTTP 403: pods \"web-0\" is forbidden");
        assert!(cache.keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_delete_refetches_after_delay() {
        let gets = Arc::new(AtomicUsize::new(0));

        let mut fetch = MockTestFetch::new();

        fetch
            .expect_cluster()
            .returning(ClusterContext::default_cluster);

        fetch
            .expect_send()
            .with(eq(FetchRequest::get("/api/pods").query("namespace", "default")))
            .returning({
                let gets = gets.clone();
                move |_| {
                    gets.fetch_add(1, Ordering::SeqCst);
                    Ok(json_response(StatusCode::OK, json!([])))
                }
            });

        fetch
            .expect_send()
            .with(eq(FetchRequest::delete("/api/resource")
                .query("kind", "Pod")
                .query("name", "web-0")
                .query("namespace", "default")
                .query("force", "false")))
            .times(1)
            .returning(|_| Ok(json_response(StatusCode::OK, json!({}))));

        let fetch: Arc<dyn Fetch> = Arc::new(fetch);
        let cache = ResourceCache::new();
        let key = ResourceQueryKey::new("pods").namespace(Some("default"));

        {
            let fetch = fetch.clone();
            let owned = key.clone();
            cache
                .fetch(&key, move || async move { fetch_resources(&*fetch, &owned).await })
                .await
                .unwrap();
        }
        assert_eq!(gets.load(Ordering::SeqCst), 1);

        let mutator = Mutator::new(fetch, cache.clone(), RefetchConfig::default());

        let target = ResourceTarget::namespaced("Pod", "web-0", "default");
        let outcome = mutator
            .execute(MutationRequest::delete(&target, DeleteMode::Graceful))
            .await
            .unwrap();

        advance(Duration::from_millis(499)).await;
        assert_eq!(gets.load(Ordering::SeqCst), 1);
        assert!(!cache.entry(&key).unwrap().stale);

        sleep(Duration::from_millis(1)).await;
        outcome.refetch.wait().await;

        assert_eq!(gets.load(Ordering::SeqCst), 2);
        assert!(cache.entry(&key).unwrap().is_fresh());
    }
}
