use std::{collections::BTreeMap, fmt};

use crate::api::{endpoint::QueryPairs, ClusterContext};

/// Identity of one cached collection: `(cluster, namespace, kind, extra params)`.
///
/// `namespace == None` addresses the all-namespaces listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceQueryKey {
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub kind: String,
    pub extra: BTreeMap<String, String>,
}

impl ResourceQueryKey {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            cluster: None,
            namespace: None,
            kind: kind.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn cluster(mut self, cluster: &ClusterContext) -> Self {
        self.cluster = cluster.cluster_id().map(ToString::to_string);
        self
    }

    pub fn namespace(mut self, namespace: Option<impl Into<String>>) -> Self {
        self.namespace = namespace.map(Into::into).filter(|ns: &String| !ns.is_empty());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Query pairs sent with the collection GET
    pub fn query(&self) -> QueryPairs {
        let mut pairs = QueryPairs::new();

        if let Some(cluster) = &self.cluster {
            pairs.push(("cluster".to_string(), cluster.to_string()));
        }

        if let Some(ns) = &self.namespace {
            pairs.push(("namespace".to_string(), ns.to_string()));
        }

        pairs.extend(
            self.extra
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        pairs
    }
}

impl fmt::Display for ResourceQueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/{}",
            self.kind,
            self.cluster.as_deref().unwrap_or("<default>"),
            self.namespace.as_deref().unwrap_or("*")
        )?;

        for (k, v) in &self.extra {
            write!(f, "&{}={}", k, v)?;
        }

        Ok(())
    }
}

/// Partial key used to invalidate many entries at once. `None` fields match anything.
///
/// A namespace prefix also matches all-namespaces keys, since those listings
/// contain the namespace's objects too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPrefix {
    cluster: Option<Option<String>>,
    namespace: Option<String>,
    kind: Option<String>,
}

impl KeyPrefix {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn cluster(mut self, cluster: &ClusterContext) -> Self {
        self.cluster = Some(cluster.cluster_id().map(ToString::to_string));
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace: String = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn matches(&self, key: &ResourceQueryKey) -> bool {
        if let Some(cluster) = &self.cluster {
            if *cluster != key.cluster {
                return false;
            }
        }

        if let Some(kind) = &self.kind {
            if *kind != key.kind {
                return false;
            }
        }

        match (&self.namespace, &key.namespace) {
            (Some(prefix), Some(ns)) => prefix == ns,
            _ => true,
        }
    }
}

impl From<&ResourceQueryKey> for KeyPrefix {
    fn from(key: &ResourceQueryKey) -> Self {
        Self {
            cluster: Some(key.cluster.clone()),
            namespace: key.namespace.clone(),
            kind: Some(key.kind.clone()),
        }
    }
}
