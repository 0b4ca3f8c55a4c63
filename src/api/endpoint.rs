//! Paths and query pairs of the dashboard backend.

use std::fmt;

pub const RESOURCE: &str = "/api/resource";
pub const RESOURCE_YAML: &str = "/api/resource/yaml";
pub const RESOURCE_IMPORT: &str = "/api/resource/import";
pub const HELM_RELEASES: &str = "/api/helm/releases";
pub const POD_EXEC: &str = "/api/pods/exec";

pub type QueryPairs = Vec<(String, String)>;

/// `/api/<collection>`, e.g. `pods` or `helm/releases`
pub fn collection(collection: &str) -> String {
    format!("/api/{}", collection.trim_matches('/'))
}

pub fn helm_release(name: &str) -> String {
    format!("{}/{}", HELM_RELEASES, name)
}

/// A single object addressed by kind, name and (for namespaced kinds) namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceTarget {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceTarget {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    pub fn namespaced(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let namespace: String = namespace.into();

        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: (!namespace.is_empty()).then_some(namespace),
        }
    }

    pub fn query(&self) -> QueryPairs {
        let mut pairs = vec![
            ("kind".to_string(), self.kind.to_string()),
            ("name".to_string(), self.name.to_string()),
        ];

        if let Some(ns) = &self.namespace {
            pairs.push(("namespace".to_string(), ns.to_string()));
        }

        pairs
    }
}

impl fmt::Display for ResourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} (namespace {})", self.kind, self.name, ns),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}
