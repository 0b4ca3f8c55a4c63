//! Built-in documents offered when creating a resource.

use std::{collections::BTreeMap, str::FromStr};

use anyhow::Result;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            ConfigMap, Container, ContainerPort, Namespace, PersistentVolumeClaim,
            PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, ResourceQuota,
            ResourceQuotaSpec, Secret, Service, ServicePort, ServiceSpec,
            VolumeResourceRequirements,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
};
use serde_json::json;
use strum::{Display, EnumIter, EnumString};

use crate::error::Error;

pub const TEMPLATE_NAME: &str = "example";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum TemplateKind {
    #[strum(to_string = "ConfigMap", serialize = "cm")]
    ConfigMap,
    Secret,
    #[strum(to_string = "Deployment", serialize = "deploy")]
    Deployment,
    #[strum(to_string = "Service", serialize = "svc")]
    Service,
    #[strum(to_string = "Namespace", serialize = "ns")]
    Namespace,
    #[strum(to_string = "ResourceQuota", serialize = "quota")]
    ResourceQuota,
    #[strum(to_string = "PersistentVolumeClaim", serialize = "pvc")]
    PersistentVolumeClaim,
}

fn metadata(namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(TEMPLATE_NAME.to_string()),
        namespace: namespace.map(ToString::to_string),
        ..Default::default()
    }
}

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), TEMPLATE_NAME.to_string())])
}

fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}

fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_yaml::to_string(value).map_err(Error::from)?)
}

impl TemplateKind {
    pub fn render(&self, namespace: Option<&str>) -> Result<String> {
        match self {
            Self::ConfigMap => to_yaml(&ConfigMap {
                metadata: metadata(namespace),
                data: Some(BTreeMap::from([("key".to_string(), "value".to_string())])),
                ..Default::default()
            }),
            Self::Secret => to_yaml(&Secret {
                metadata: metadata(namespace),
                type_: Some("Opaque".to_string()),
                string_data: Some(BTreeMap::from([(
                    "password".to_string(),
                    "changeme".to_string(),
                )])),
                ..Default::default()
            }),
            Self::Deployment => to_yaml(&Deployment {
                metadata: metadata(namespace),
                spec: Some(DeploymentSpec {
                    replicas: Some(1),
                    selector: LabelSelector {
                        match_labels: Some(labels()),
                        ..Default::default()
                    },
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels()),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            containers: vec![Container {
                                name: TEMPLATE_NAME.to_string(),
                                image: Some("nginx:latest".to_string()),
                                ports: Some(vec![ContainerPort {
                                    container_port: 80,
                                    ..Default::default()
                                }]),
                                ..Default::default()
                            }],
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Self::Service => to_yaml(&Service {
                metadata: metadata(namespace),
                spec: Some(ServiceSpec {
                    selector: Some(labels()),
                    ports: Some(vec![ServicePort {
                        port: 80,
                        target_port: Some(IntOrString::Int(80)),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Self::Namespace => to_yaml(&Namespace {
                metadata: metadata(None),
                ..Default::default()
            }),
            Self::ResourceQuota => to_yaml(&ResourceQuota {
                metadata: metadata(namespace),
                spec: Some(ResourceQuotaSpec {
                    hard: Some(quantities(&[
                        ("pods", "10"),
                        ("requests.cpu", "1"),
                        ("requests.memory", "1Gi"),
                    ])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Self::PersistentVolumeClaim => to_yaml(&PersistentVolumeClaim {
                metadata: metadata(namespace),
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(quantities(&[("storage", "1Gi")])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }
}

/// Template for `kind`, or a bare `apiVersion`/`kind`/`metadata` skeleton.
pub fn template(kind: &str, namespace: Option<&str>) -> Result<String> {
    if let Ok(kind) = TemplateKind::from_str(kind) {
        return kind.render(namespace);
    }

    let mut metadata = json!({ "name": TEMPLATE_NAME });

    if let Some(ns) = namespace {
        metadata["namespace"] = json!(ns);
    }

    to_yaml(&json!({
        "apiVersion": "v1",
        "kind": kind,
        "metadata": metadata,
    }))
}
