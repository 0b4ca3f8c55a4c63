use strum::{Display, EnumIter, EnumString};

use crate::features::resource::Resource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ScopeFilter {
    #[default]
    All,
    Namespaced,
    Cluster,
}

impl ScopeFilter {
    pub fn accepts(&self, resource: &Resource) -> bool {
        match self {
            Self::All => true,
            Self::Namespaced => !resource.is_cluster_scoped(),
            Self::Cluster => resource.is_cluster_scoped(),
        }
    }
}

/// Client side filter over already fetched rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    query: String,
    scope: ScopeFilter,
}

impl Filter {
    pub fn new(query: impl AsRef<str>, scope: ScopeFilter) -> Self {
        Self {
            query: query.as_ref().trim().to_lowercase(),
            scope,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn scope(&self) -> ScopeFilter {
        self.scope
    }

    pub fn set_query(&mut self, query: impl AsRef<str>) {
        self.query = query.as_ref().trim().to_lowercase();
    }

    pub fn set_scope(&mut self, scope: ScopeFilter) {
        self.scope = scope;
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.scope == ScopeFilter::All
    }

    /// Case-insensitive substring match on `kind/name`, then the scope.
    pub fn matches(&self, resource: &Resource) -> bool {
        if !self.scope.accepts(resource) {
            return false;
        }

        self.query.is_empty() || resource.label().to_lowercase().contains(&self.query)
    }

    /// Keeps the input order.
    pub fn apply<'a, I>(&self, resources: I) -> Vec<&'a Resource>
    where
        I: IntoIterator<Item = &'a Resource>,
    {
        resources.into_iter().filter(|r| self.matches(r)).collect()
    }
}
