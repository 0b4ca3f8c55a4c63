use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub enum ConfigLoadOption {
    #[default]
    Default,

    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Dashboard backend, e.g. `http://localhost:8080`
    pub base_url: String,
    /// Target cluster id. Unset means the backend's default cluster.
    pub cluster: Option<String>,
    /// Use the kubeconfig `current-context` as cluster id when `cluster` is unset
    pub cluster_from_kubeconfig: bool,
    /// Session cookie in `name=value` form
    pub session_cookie: Option<String>,
    /// Transport timeout. The cache layer itself never times out.
    pub timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            cluster: None,
            cluster_from_kubeconfig: false,
            session_cookie: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RefetchConfig {
    pub delete_delay_ms: u64,
    pub mutation_delay_ms: u64,
    pub poll_interval_secs: u64,
}

impl Default for RefetchConfig {
    fn default() -> Self {
        Self {
            delete_delay_ms: 500,
            mutation_delay_ms: 2000,
            poll_interval_secs: 5,
        }
    }
}

impl RefetchConfig {
    pub fn delete_delay(&self) -> Duration {
        Duration::from_millis(self.delete_delay_ms)
    }

    pub fn mutation_delay(&self) -> Duration {
        Duration::from_millis(self.mutation_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
}

#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub refetch: RefetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(option: ConfigLoadOption) -> Result<Self> {
        Self::figment(option).extract_lossy().map_err(Into::into)
    }

    fn figment(option: ConfigLoadOption) -> Figment {
        let figment = Figment::new();

        match option {
            ConfigLoadOption::Default => figment.merge(Serialized::defaults(Self::default())),
            ConfigLoadOption::Path(path) => figment
                .merge(Serialized::defaults(Self::default()))
                .merge(Yaml::file(path)),
        }
        .merge(Env::prefixed("KUBECONSOLE_").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_when_no_file() {
        Jail::expect_with(|_| {
            let config = Config::load(ConfigLoadOption::Default).unwrap();

            assert_eq!(config.server, ServerConfig::default());
            assert_eq!(config.refetch.delete_delay(), Duration::from_millis(500));
            assert_eq!(config.refetch.mutation_delay(), Duration::from_millis(2000));

            Ok(())
        });
    }

    #[test]
    fn file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                indoc! {r#"
                    server:
                      base_url: https://dashboard.example.com
                      cluster: prod
                    refetch:
                      delete_delay_ms: 750
                "#},
            )?;
            jail.set_env("KUBECONSOLE_SERVER__CLUSTER", "staging");

            let config = Config::load(ConfigLoadOption::Path("config.yaml".into())).unwrap();

            assert_eq!(config.server.base_url, "https://dashboard.example.com");
            assert_eq!(config.server.cluster.as_deref(), Some("staging"));
            assert_eq!(config.refetch.delete_delay_ms, 750);
            assert_eq!(config.refetch.mutation_delay_ms, 2000);

            Ok(())
        });
    }
}
