//! Helm releases: listing through the cache and the asynchronous
//! install/upgrade/uninstall jobs run by the backend.

use std::{fmt, sync::Arc};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    api::{endpoint, Fetch, FetchRequest, FetchResponse},
    cache::{DelayedTask, KeyPrefix, QueryResult, ResourceQueryKey},
    error::Error,
    features::{
        mutation::{MutationKind, MutationRequest, Mutator},
        resource::{fetch_resources, KnownKind, Resource, ResourceCache},
    },
    logger,
};

pub fn releases_collection() -> &'static str {
    KnownKind::HelmRelease.collection()
}

/// Cache key of the release listing in `namespace`, all namespaces for `None`
pub fn releases_key(fetch: &dyn Fetch, namespace: Option<&str>) -> ResourceQueryKey {
    ResourceQueryKey::new(releases_collection())
        .cluster(&fetch.cluster())
        .namespace(namespace)
}

fn releases_prefix(namespace: &str) -> KeyPrefix {
    KeyPrefix::all()
        .kind(releases_collection())
        .namespace(namespace)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobAccepted {
    job_id: JobId,
}

/// Job id from a `{"jobId": "..."}` body
pub fn job_id(response: &FetchResponse) -> Result<JobId, Error> {
    let accepted: JobAccepted = response.json()?;
    Ok(accepted.job_id)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstallRequest {
    pub name: String,
    pub namespace: String,
    /// `repo/chart` reference
    pub chart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpgradeRequest {
    #[serde(skip)]
    pub name: String,
    pub namespace: String,
    pub chart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

fn validate_release(name: &str, namespace: &str, chart: Option<&str>) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::validation("release name is required"));
    }

    if namespace.is_empty() {
        return Err(Error::validation("namespace is required"));
    }

    if chart.is_some_and(str::is_empty) {
        return Err(Error::validation("chart is required"));
    }

    Ok(())
}

fn subject(name: &str, namespace: &str) -> String {
    format!("HelmRelease/{} (namespace {})", name, namespace)
}

pub fn install(request: &InstallRequest) -> Result<MutationRequest, Error> {
    validate_release(&request.name, &request.namespace, Some(&request.chart))?;

    let body = serde_json::to_value(request)?;

    Ok(MutationRequest::new(
        MutationKind::Install,
        subject(&request.name, &request.namespace),
        FetchRequest::post(endpoint::HELM_RELEASES).json_body(body),
    )
    .invalidate(releases_prefix(&request.namespace)))
}

pub fn upgrade(request: &UpgradeRequest) -> Result<MutationRequest, Error> {
    validate_release(&request.name, &request.namespace, Some(&request.chart))?;

    let body = serde_json::to_value(request)?;

    Ok(MutationRequest::new(
        MutationKind::Upgrade,
        subject(&request.name, &request.namespace),
        FetchRequest::put(endpoint::helm_release(&request.name)).json_body(body),
    )
    .invalidate(releases_prefix(&request.namespace)))
}

pub fn uninstall(name: &str, namespace: &str) -> Result<MutationRequest, Error> {
    validate_release(name, namespace, None)?;

    Ok(MutationRequest::new(
        MutationKind::Uninstall,
        subject(name, namespace),
        FetchRequest::delete(endpoint::helm_release(name)).query("namespace", namespace),
    )
    .invalidate(releases_prefix(namespace)))
}

#[derive(Debug)]
pub struct HelmJob {
    pub job_id: JobId,
    pub refetch: DelayedTask,
}

pub struct Helm {
    fetch: Arc<dyn Fetch>,
    cache: ResourceCache,
    mutator: Mutator,
}

impl Helm {
    pub fn new(mutator: Mutator, fetch: Arc<dyn Fetch>, cache: ResourceCache) -> Self {
        Self {
            fetch,
            cache,
            mutator,
        }
    }

    pub async fn releases(&self, namespace: Option<&str>) -> QueryResult<Vec<Resource>> {
        let key = releases_key(&*self.fetch, namespace);
        let fetch = self.fetch.clone();
        let owned = key.clone();

        self.cache
            .fetch(&key, move || async move { fetch_resources(&*fetch, &owned).await })
            .await
    }

    pub async fn install(&self, request: &InstallRequest) -> Result<HelmJob> {
        self.run(install(request)?).await
    }

    pub async fn upgrade(&self, request: &UpgradeRequest) -> Result<HelmJob> {
        self.run(upgrade(request)?).await
    }

    pub async fn uninstall(&self, name: &str, namespace: &str) -> Result<HelmJob> {
        self.run(uninstall(name, namespace)?).await
    }

    async fn run(&self, mutation: MutationRequest) -> Result<HelmJob> {
        let outcome = self.mutator.execute(mutation).await?;

        let job_id = match job_id(&outcome.response) {
            Ok(id) => id,
            Err(e) => {
                outcome.refetch.cancel();
                return Err(e.into());
            }
        };

        logger!(info, "helm job {} accepted", job_id);

        Ok(HelmJob {
            job_id,
            refetch: outcome.refetch,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use http::StatusCode;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::sleep;

    use crate::{
        api::{
            mock::{json_response, MockTestFetch},
            ClusterContext,
        },
        config::RefetchConfig,
        features::list::ResourceListView,
    };

    use super::*;

    #[test]
    fn install_body() {
        let mutation = install(&InstallRequest {
            name: "myapp".into(),
            namespace: "ns1".into(),
            chart: "bitnami/nginx".into(),
            version: Some("15.0.0".into()),
            values: None,
        })
        .unwrap();

        assert_eq!(mutation.kind, MutationKind::Install);
        assert_eq!(mutation.request.path, "/api/helm/releases");
        assert_eq!(
            mutation.request,
            FetchRequest::post("/api/helm/releases").json_body(json!({
                "name": "myapp",
                "namespace": "ns1",
                "chart": "bitnami/nginx",
                "version": "15.0.0",
            }))
        );
    }

    #[test]
    fn upgrade_puts_to_release_path() {
        let mutation = upgrade(&UpgradeRequest {
            name: "myapp".into(),
            namespace: "ns1".into(),
            chart: "bitnami/nginx".into(),
            version: None,
            values: Some(json!({ "replicaCount": 2 })),
        })
        .unwrap();

        assert_eq!(
            mutation.request,
            FetchRequest::put("/api/helm/releases/myapp").json_body(json!({
                "namespace": "ns1",
                "chart": "bitnami/nginx",
                "values": { "replicaCount": 2 },
            }))
        );
    }

    #[test]
    fn uninstall_requires_namespace() {
        assert_eq!(
            uninstall("myapp", "").unwrap_err().to_string(),
            "Validation: namespace is required"
        );
    }

    #[test]
    fn parse_job_id() {
        let response = json_response(StatusCode::ACCEPTED, json!({ "jobId": "job-42" }));

        assert_eq!(job_id(&response).unwrap().as_str(), "job-42");
    }

    #[tokio::test(start_paused = true)]
    async fn uninstalled_release_disappears_after_delay() {
        let uninstalled = Arc::new(AtomicBool::new(false));

        let mut fetch = MockTestFetch::new();

        fetch
            .expect_cluster()
            .returning(ClusterContext::default_cluster);

        fetch
            .expect_send()
            .with(eq(
                FetchRequest::get("/api/helm/releases").query("namespace", "ns1")
            ))
            .returning({
                let uninstalled = uninstalled.clone();
                move |_| {
                    let mut releases = vec![json!({ "name": "other", "namespace": "ns1" })];

                    if !uninstalled.load(Ordering::SeqCst) {
                        releases.push(json!({ "name": "myapp", "namespace": "ns1" }));
                    }

                    Ok(json_response(StatusCode::OK, json!(releases)))
                }
            });

        fetch
            .expect_send()
            .with(eq(
                FetchRequest::delete("/api/helm/releases/myapp").query("namespace", "ns1")
            ))
            .times(1)
            .returning({
                let uninstalled = uninstalled.clone();
                move |_| {
                    uninstalled.store(true, Ordering::SeqCst);
                    Ok(json_response(StatusCode::ACCEPTED, json!({ "jobId": "job-1" })))
                }
            });

        let fetch: Arc<dyn Fetch> = Arc::new(fetch);
        let cache = ResourceCache::new();
        let mutator = Mutator::new(fetch.clone(), cache.clone(), RefetchConfig::default());
        let key = releases_key(&*fetch, Some("ns1"));

        let mut view = ResourceListView::new(mutator, fetch, cache, key);
        view.mount();
        view.load().await.unwrap();

        let names = |view: &ResourceListView| -> Vec<String> {
            view.rows().into_iter().map(|r| r.name).collect()
        };

        assert_eq!(names(&view), vec!["myapp", "other"]);
        assert_eq!(view.rows()[0].kind, "HelmRelease");

        view.request_mutation(uninstall("myapp", "ns1").unwrap());
        let response = view.confirm().await.unwrap();
        assert_eq!(job_id(&response).unwrap().as_str(), "job-1");

        sleep(Duration::from_millis(499)).await;
        view.sync();
        assert_eq!(names(&view), vec!["myapp", "other"]);

        view.settle().await;

        assert_eq!(names(&view), vec!["other"]);
    }
}
