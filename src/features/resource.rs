//! Backend projection of cluster objects.
//!
//! `details` differs per kind. Known kinds decode into a dedicated struct,
//! everything else keeps the raw JSON.

use std::{collections::BTreeMap, str::FromStr};

use anyhow::Result;
use chrono::{DateTime, Utc};
use enum_dispatch::enum_dispatch;
use serde::Deserialize;
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{
    api::{endpoint, fetch_json, Fetch, FetchRequest},
    cache::{QueryCache, ResourceQueryKey},
    logger,
};

pub type ResourceCache = QueryCache<Vec<Resource>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum KnownKind {
    #[strum(to_string = "Pod", serialize = "pods", serialize = "po")]
    Pod,
    #[strum(to_string = "Deployment", serialize = "deployments", serialize = "deploy")]
    Deployment,
    #[strum(to_string = "Service", serialize = "services", serialize = "svc")]
    Service,
    #[strum(to_string = "ConfigMap", serialize = "configmaps", serialize = "cm")]
    ConfigMap,
    #[strum(to_string = "Secret", serialize = "secrets")]
    Secret,
    #[strum(
        to_string = "CustomResourceDefinition",
        serialize = "customresourcedefinitions",
        serialize = "crds",
        serialize = "crd"
    )]
    CustomResourceDefinition,
    #[strum(
        to_string = "HelmRelease",
        serialize = "helm/releases",
        serialize = "releases",
        serialize = "release"
    )]
    HelmRelease,
    #[strum(to_string = "ResourceQuota", serialize = "resourcequotas", serialize = "quota")]
    ResourceQuota,
    #[strum(
        to_string = "PersistentVolumeClaim",
        serialize = "persistentvolumeclaims",
        serialize = "pvc"
    )]
    PersistentVolumeClaim,
    #[strum(to_string = "Node", serialize = "nodes", serialize = "no")]
    Node,
}

impl KnownKind {
    /// Collection segment under `/api/`
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Pod => "pods",
            Self::Deployment => "deployments",
            Self::Service => "services",
            Self::ConfigMap => "configmaps",
            Self::Secret => "secrets",
            Self::CustomResourceDefinition => "customresourcedefinitions",
            Self::HelmRelease => "helm/releases",
            Self::ResourceQuota => "resourcequotas",
            Self::PersistentVolumeClaim => "persistentvolumeclaims",
            Self::Node => "nodes",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Self::CustomResourceDefinition | Self::Node)
    }
}

/// Per-kind columns of a list row.
#[enum_dispatch]
pub trait DetailColumns {
    fn header(&self) -> &'static [&'static str];

    fn columns(&self) -> Vec<String>;

    fn cpu(&self) -> Option<&str> {
        None
    }

    fn memory(&self) -> Option<&str> {
        None
    }

    fn size(&self) -> Option<&str> {
        None
    }

    fn restarts(&self) -> Option<u32> {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodDetails {
    pub ready: String,
    pub restarts: u32,
    pub node: String,
    pub ip: String,
    pub cpu: String,
    pub memory: String,
}

impl DetailColumns for PodDetails {
    fn header(&self) -> &'static [&'static str] {
        &["READY", "RESTARTS", "CPU", "MEMORY", "NODE"]
    }

    fn columns(&self) -> Vec<String> {
        vec![
            self.ready.to_string(),
            self.restarts.to_string(),
            self.cpu.to_string(),
            self.memory.to_string(),
            self.node.to_string(),
        ]
    }

    fn cpu(&self) -> Option<&str> {
        Some(&self.cpu)
    }

    fn memory(&self) -> Option<&str> {
        Some(&self.memory)
    }

    fn restarts(&self) -> Option<u32> {
        Some(self.restarts)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentDetails {
    pub ready: String,
    pub up_to_date: u32,
    pub available: u32,
    pub images: Vec<String>,
}

impl DetailColumns for DeploymentDetails {
    fn header(&self) -> &'static [&'static str] {
        &["READY", "UP-TO-DATE", "AVAILABLE", "IMAGES"]
    }

    fn columns(&self) -> Vec<String> {
        vec![
            self.ready.to_string(),
            self.up_to_date.to_string(),
            self.available.to_string(),
            self.images.join(","),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub cluster_ip: String,
    pub external_ip: String,
    pub ports: Vec<String>,
}

impl DetailColumns for ServiceDetails {
    fn header(&self) -> &'static [&'static str] {
        &["TYPE", "CLUSTER-IP", "EXTERNAL-IP", "PORTS"]
    }

    fn columns(&self) -> Vec<String> {
        vec![
            self.type_.to_string(),
            self.cluster_ip.to_string(),
            none_if_empty(&self.external_ip),
            self.ports.join(","),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigMapDetails {
    pub keys: Vec<String>,
}

impl DetailColumns for ConfigMapDetails {
    fn header(&self) -> &'static [&'static str] {
        &["DATA"]
    }

    fn columns(&self) -> Vec<String> {
        vec![self.keys.len().to_string()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub keys: Vec<String>,
}

impl DetailColumns for SecretDetails {
    fn header(&self) -> &'static [&'static str] {
        &["TYPE", "DATA"]
    }

    fn columns(&self) -> Vec<String> {
        vec![self.type_.to_string(), self.keys.len().to_string()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrdDetails {
    pub group: String,
    pub versions: Vec<String>,
    pub scope: String,
}

impl DetailColumns for CrdDetails {
    fn header(&self) -> &'static [&'static str] {
        &["GROUP", "VERSIONS", "SCOPE"]
    }

    fn columns(&self) -> Vec<String> {
        vec![
            self.group.to_string(),
            self.versions.join(","),
            self.scope.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmReleaseDetails {
    pub chart: String,
    pub app_version: String,
    pub revision: u32,
    pub updated: String,
}

impl DetailColumns for HelmReleaseDetails {
    fn header(&self) -> &'static [&'static str] {
        &["CHART", "APP VERSION", "REVISION"]
    }

    fn columns(&self) -> Vec<String> {
        vec![
            self.chart.to_string(),
            self.app_version.to_string(),
            self.revision.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceQuotaDetails {
    pub hard: BTreeMap<String, String>,
    pub used: BTreeMap<String, String>,
}

impl DetailColumns for ResourceQuotaDetails {
    fn header(&self) -> &'static [&'static str] {
        &["REQUEST"]
    }

    fn columns(&self) -> Vec<String> {
        let request = self
            .hard
            .iter()
            .map(|(name, hard)| {
                let used = self.used.get(name).map(String::as_str).unwrap_or("0");
                format!("{}: {}/{}", name, used, hard)
            })
            .collect::<Vec<_>>()
            .join(", ");

        vec![request]
    }

    fn cpu(&self) -> Option<&str> {
        self.used
            .get("requests.cpu")
            .or_else(|| self.used.get("cpu"))
            .map(String::as_str)
    }

    fn memory(&self) -> Option<&str> {
        self.used
            .get("requests.memory")
            .or_else(|| self.used.get("memory"))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PvcDetails {
    pub capacity: String,
    pub access_modes: Vec<String>,
    pub storage_class: String,
    pub volume: String,
}

impl DetailColumns for PvcDetails {
    fn header(&self) -> &'static [&'static str] {
        &["VOLUME", "CAPACITY", "ACCESS MODES", "STORAGECLASS"]
    }

    fn columns(&self) -> Vec<String> {
        vec![
            self.volume.to_string(),
            self.capacity.to_string(),
            self.access_modes.join(","),
            self.storage_class.to_string(),
        ]
    }

    fn size(&self) -> Option<&str> {
        Some(&self.capacity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeDetails {
    pub roles: Vec<String>,
    pub version: String,
    pub cpu: String,
    pub memory: String,
}

impl DetailColumns for NodeDetails {
    fn header(&self) -> &'static [&'static str] {
        &["ROLES", "VERSION", "CPU", "MEMORY"]
    }

    fn columns(&self) -> Vec<String> {
        vec![
            none_if_empty(&self.roles.join(",")),
            self.version.to_string(),
            self.cpu.to_string(),
            self.memory.to_string(),
        ]
    }

    fn cpu(&self) -> Option<&str> {
        Some(&self.cpu)
    }

    fn memory(&self) -> Option<&str> {
        Some(&self.memory)
    }
}

/// Details of a kind without a dedicated shape
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OtherDetails(pub Value);

impl DetailColumns for OtherDetails {
    fn header(&self) -> &'static [&'static str] {
        &[]
    }

    fn columns(&self) -> Vec<String> {
        Vec::new()
    }
}

#[enum_dispatch(DetailColumns)]
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDetails {
    Pod(PodDetails),
    Deployment(DeploymentDetails),
    Service(ServiceDetails),
    ConfigMap(ConfigMapDetails),
    Secret(SecretDetails),
    CustomResourceDefinition(CrdDetails),
    HelmRelease(HelmReleaseDetails),
    ResourceQuota(ResourceQuotaDetails),
    PersistentVolumeClaim(PvcDetails),
    Node(NodeDetails),
    Other(OtherDetails),
}

impl Default for ResourceDetails {
    fn default() -> Self {
        Self::Other(OtherDetails::default())
    }
}

impl ResourceDetails {
    pub fn decode(kind: Option<KnownKind>, value: Value) -> Self {
        let Some(kind) = kind else {
            return Self::Other(OtherDetails(value));
        };

        let object = if value.is_null() {
            Value::Object(Default::default())
        } else {
            value
        };

        let decoded = match kind {
            KnownKind::Pod => decode_as::<PodDetails>(&object),
            KnownKind::Deployment => decode_as::<DeploymentDetails>(&object),
            KnownKind::Service => decode_as::<ServiceDetails>(&object),
            KnownKind::ConfigMap => decode_as::<ConfigMapDetails>(&object),
            KnownKind::Secret => decode_as::<SecretDetails>(&object),
            KnownKind::CustomResourceDefinition => decode_as::<CrdDetails>(&object),
            KnownKind::HelmRelease => decode_as::<HelmReleaseDetails>(&object),
            KnownKind::ResourceQuota => decode_as::<ResourceQuotaDetails>(&object),
            KnownKind::PersistentVolumeClaim => decode_as::<PvcDetails>(&object),
            KnownKind::Node => decode_as::<NodeDetails>(&object),
        };

        match decoded {
            Ok(details) => details,
            Err(e) => {
                logger!(warn, "unexpected {} details: {}", kind, e);
                Self::Other(OtherDetails(object))
            }
        }
    }
}

fn decode_as<T>(value: &Value) -> serde_json::Result<ResourceDetails>
where
    T: for<'de> Deserialize<'de> + Into<ResourceDetails>,
{
    T::deserialize(value).map(Into::into)
}

fn none_if_empty(s: &str) -> String {
    if s.is_empty() {
        "<none>".to_string()
    } else {
        s.to_string()
    }
}

/// Row as sent by the backend. Any field may be missing or `null`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawResource {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub created: Option<String>,
    pub details: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawResource")]
pub struct Resource {
    pub name: String,
    /// Empty for cluster scoped objects
    pub namespace: String,
    pub kind: String,
    pub status: String,
    pub created: String,
    pub details: ResourceDetails,
}

impl From<RawResource> for Resource {
    fn from(raw: RawResource) -> Self {
        Self::from_raw(raw, None)
    }
}

impl Resource {
    /// `fallback_kind` applies when the backend omits `kind` on items of a
    /// single kind collection.
    pub fn from_raw(raw: RawResource, fallback_kind: Option<KnownKind>) -> Self {
        let RawResource {
            name,
            namespace,
            kind,
            status,
            created,
            details,
        } = raw;

        let kind = match kind {
            Some(kind) if !kind.is_empty() => kind,
            _ => fallback_kind.map(|k| k.to_string()).unwrap_or_default(),
        };

        let known = KnownKind::from_str(&kind).ok();

        Self {
            name: name.unwrap_or_default(),
            namespace: namespace.unwrap_or_default(),
            status: status.unwrap_or_default(),
            created: created.unwrap_or_default(),
            details: ResourceDetails::decode(known, details),
            kind,
        }
    }

    pub fn known_kind(&self) -> Option<KnownKind> {
        KnownKind::from_str(&self.kind).ok()
    }

    /// `kind/name`, the string the list filter matches against
    pub fn label(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

pub fn collection_request(key: &ResourceQueryKey) -> FetchRequest {
    FetchRequest::get(endpoint::collection(&key.kind)).query_pairs(key.query())
}

/// Fetches the collection addressed by `key`.
pub async fn fetch_resources<F>(fetch: &F, key: &ResourceQueryKey) -> Result<Vec<Resource>>
where
    F: Fetch + ?Sized,
{
    let fallback = KnownKind::from_str(&key.kind).ok();

    let raw: Vec<RawResource> = fetch_json(fetch, collection_request(key)).await?;

    Ok(raw
        .into_iter()
        .map(|raw| Resource::from_raw(raw, fallback))
        .collect())
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use indoc::indoc;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use crate::{
        api::mock::{json_response, MockTestFetch},
        mock_expect,
    };

    use super::*;

    #[rstest]
    #[case("pods", KnownKind::Pod)]
    #[case("Pod", KnownKind::Pod)]
    #[case("deploy", KnownKind::Deployment)]
    #[case("helm/releases", KnownKind::HelmRelease)]
    #[case("CRD", KnownKind::CustomResourceDefinition)]
    #[case("pvc", KnownKind::PersistentVolumeClaim)]
    fn known_kind_aliases(#[case] input: &str, #[case] expected: KnownKind) {
        assert_eq!(KnownKind::from_str(input).unwrap(), expected);
    }

    #[test]
    fn known_kind_displays_canonical_name() {
        assert_eq!(KnownKind::ConfigMap.to_string(), "ConfigMap");
        assert_eq!(KnownKind::HelmRelease.collection(), "helm/releases");
    }

    #[test]
    fn pod_details_decode() {
        let data = indoc! { r#"
            {
              "name": "web-0",
              "namespace": "default",
              "kind": "Pod",
              "status": "Running",
              "created": "2024-01-01T00:00:00Z",
              "details": {
                "ready": "1/1",
                "restarts": 3,
                "cpu": "100m",
                "memory": "128Mi"
              }
            }
        "# };

        let resource: Resource = serde_json::from_str(data).unwrap();

        assert_eq!(
            resource.details,
            ResourceDetails::Pod(PodDetails {
                ready: "1/1".into(),
                restarts: 3,
                cpu: "100m".into(),
                memory: "128Mi".into(),
                ..Default::default()
            })
        );
        assert_eq!(resource.details.cpu(), Some("100m"));
        assert_eq!(resource.details.restarts(), Some(3));
        assert_eq!(resource.label(), "Pod/web-0");
        assert_eq!(
            resource.created_at().unwrap().to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn unknown_kind_keeps_raw_details() {
        let resource: Resource = serde_json::from_value(json!({
            "name": "cert",
            "kind": "Certificate",
            "details": { "issuer": "letsencrypt" }
        }))
        .unwrap();

        assert_eq!(
            resource.details,
            ResourceDetails::Other(OtherDetails(json!({ "issuer": "letsencrypt" })))
        );
        assert!(resource.details.header().is_empty());
        assert!(resource.is_cluster_scoped());
    }

    #[test]
    fn malformed_details_fall_back_to_raw() {
        let resource: Resource = serde_json::from_value(json!({
            "name": "web",
            "kind": "Deployment",
            "details": { "upToDate": "many" }
        }))
        .unwrap();

        assert!(matches!(resource.details, ResourceDetails::Other(_)));
    }

    #[tokio::test]
    async fn fetch_resources_fills_collection_kind() {
        let mut fetch = MockTestFetch::new();

        let key = ResourceQueryKey::new("pods").namespace(Some("default"));

        mock_expect!(
            fetch,
            send,
            eq(FetchRequest::get("/api/pods").query("namespace", "default")),
            Ok(json_response(
                StatusCode::OK,
                json!([{ "name": "pod1", "status": "Running", "created": "2024-01-01T00:00:00Z" }])
            ))
        );

        let resources = fetch_resources(&fetch, &key).await.unwrap();

        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].kind, "Pod");
        assert!(matches!(resources[0].details, ResourceDetails::Pod(_)));
    }

    #[tokio::test]
    async fn null_fields_do_not_fail_the_collection() {
        let mut fetch = MockTestFetch::new();

        let key = ResourceQueryKey::new("pods").namespace(Some("default"));

        mock_expect!(
            fetch,
            send,
            eq(FetchRequest::get("/api/pods").query("namespace", "default")),
            Ok(json_response(
                StatusCode::OK,
                json!([
                    {
                        "name": "n1",
                        "namespace": null,
                        "kind": null,
                        "status": null,
                        "created": null,
                        "details": null
                    },
                    { "name": "pod1" }
                ])
            ))
        );

        let resources = fetch_resources(&fetch, &key).await.unwrap();

        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name, "n1");
        assert_eq!(resources[0].namespace, "");
        assert_eq!(resources[0].kind, "Pod");
        assert_eq!(resources[0].status, "");
        assert_eq!(resources[0].created_at(), None);
        assert_eq!(resources[1].name, "pod1");
    }
}
