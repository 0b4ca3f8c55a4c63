use std::path::PathBuf;

use anyhow::Result;
use kube::config::Kubeconfig;

use crate::logger;

/// Which backend cluster a request targets. `None` is the backend's default cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClusterContext {
    cluster_id: Option<String>,
}

impl ClusterContext {
    pub fn new(cluster_id: Option<String>) -> Self {
        Self {
            cluster_id: cluster_id.filter(|id| !id.is_empty()),
        }
    }

    pub fn default_cluster() -> Self {
        Self::default()
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    pub fn switch(&mut self, cluster_id: Option<String>) {
        logger!(
            info,
            "switch cluster {:?} -> {:?}",
            self.cluster_id,
            cluster_id
        );

        self.cluster_id = cluster_id.filter(|id| !id.is_empty());
    }

    /// `cluster` query pair, omitted for the default cluster
    pub fn query_pair(&self) -> Option<(String, String)> {
        self.cluster_id
            .as_ref()
            .map(|id| ("cluster".to_string(), id.to_string()))
    }

    /// Explicit id first, then the kubeconfig `current-context` when allowed.
    pub fn resolve(
        explicit: Option<String>,
        from_kubeconfig: bool,
        kubeconfig: Option<PathBuf>,
    ) -> Result<Self> {
        if explicit.as_deref().is_some_and(|id| !id.is_empty()) {
            return Ok(Self::new(explicit));
        }

        if !from_kubeconfig {
            return Ok(Self::default_cluster());
        }

        let kubeconfig = read_kubeconfig(kubeconfig)?;

        Ok(Self::new(kubeconfig.current_context))
    }
}

fn read_kubeconfig(path: Option<PathBuf>) -> Result<Kubeconfig> {
    let kubeconfig = if let Some(path) = path {
        Kubeconfig::read_from(path)?
    } else {
        Kubeconfig::read()?
    };

    Ok(kubeconfig)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = indoc! {
        r#"
            apiVersion: v1
            clusters:
              - cluster:
                  server: https://192.168.0.1
                name: cluster-1
            contexts:
              - context:
                  cluster: cluster-1
                  user: user-1
                name: dev
            current-context: dev
            kind: Config
            preferences: {}
            users:
              - name: user-1
                user:
                  token: user-1
            "#
    };

    #[test]
    fn explicit_cluster_wins() {
        let ctx = ClusterContext::resolve(Some("prod".into()), true, None).unwrap();

        assert_eq!(ctx.cluster_id(), Some("prod"));
    }

    #[test]
    fn empty_id_means_default_cluster() {
        let ctx = ClusterContext::new(Some(String::new()));

        assert_eq!(ctx, ClusterContext::default_cluster());
        assert_eq!(ctx.query_pair(), None);
    }

    #[test]
    fn current_context_from_kubeconfig() {
        let dir = std::env::temp_dir().join("kubeconsole-cluster-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config");
        std::fs::write(&path, CONFIG).unwrap();

        let ctx = ClusterContext::resolve(None, true, Some(path)).unwrap();

        assert_eq!(ctx.cluster_id(), Some("dev"));
        assert_eq!(
            ctx.query_pair(),
            Some(("cluster".to_string(), "dev".to_string()))
        );
    }

    #[test]
    fn switch_changes_target() {
        let mut ctx = ClusterContext::default_cluster();

        ctx.switch(Some("staging".into()));

        assert_eq!(ctx.cluster_id(), Some("staging"));

        ctx.switch(None);

        assert_eq!(ctx.cluster_id(), None);
    }
}
