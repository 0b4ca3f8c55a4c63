use std::{path::PathBuf, str::FromStr as _};

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};

use crate::features::{
    list::{
        filter::ScopeFilter,
        sort::{SortDirection, SortField, SortState},
    },
    resource::KnownKind,
};

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// List resources of a kind
    List(ListArgs),

    /// Print the YAML of a resource
    Get(TargetArgs),

    /// Print the built-in template of a kind
    Template {
        kind: String,

        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Create or update resources from a YAML file
    Apply {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Replace a resource with the YAML from a file
    Replace {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Delete a resource
    Delete {
        #[command(flatten)]
        target: TargetArgs,

        /// Skip graceful termination and finalizers
        #[arg(long)]
        force: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Create or edit a ResourceQuota
    Quota(QuotaArgs),

    /// Helm releases
    #[command(subcommand)]
    Helm(HelmCommand),

    /// Open a shell in a pod container
    Exec {
        pod: String,

        #[arg(short, long, default_value = "default")]
        namespace: String,

        #[arg(short, long)]
        container: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    pub kind: String,

    pub name: String,

    #[arg(short, long)]
    pub namespace: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Kind or collection, e.g. pods, deploy, helm/releases
    pub kind: String,

    #[arg(short, long, conflicts_with = "all_namespaces")]
    pub namespace: Option<String>,

    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// Case-insensitive substring of name, namespace, kind or status
    #[arg(short, long)]
    pub filter: Option<String>,

    /// all|namespaced|cluster
    #[arg(long, default_value = "all")]
    pub scope: ScopeFilter,

    /// name|namespace|kind|status|created|cpu|memory|size|restarts
    #[arg(long, default_value = "name")]
    pub sort: SortField,

    #[arg(long)]
    pub desc: bool,

    /// Refetch at the configured poll interval until interrupted
    #[arg(short, long)]
    pub watch: bool,
}

impl ListArgs {
    pub fn collection(&self) -> String {
        collection(&self.kind)
    }

    /// `None` lists all namespaces.
    pub fn namespace(&self) -> Option<String> {
        if self.all_namespaces {
            None
        } else {
            Some(
                self.namespace
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
            )
        }
    }

    pub fn sort_state(&self) -> SortState {
        let direction = if self.desc {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        };

        SortState::new(self.sort, direction)
    }
}

#[derive(Args, Debug, Clone)]
pub struct QuotaArgs {
    pub name: String,

    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Limit as resource=quantity (e.g. --hard pods=10 --hard requests.cpu=2)
    #[arg(long = "hard", value_parser = parse_limit)]
    pub limits: Vec<(String, String)>,

    /// Drop a limit of an existing quota
    #[arg(long = "remove")]
    pub remove: Vec<String>,

    /// Start from the quota stored on the cluster
    #[arg(short, long)]
    pub edit: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum HelmCommand {
    /// List releases
    List {
        #[arg(short, long, conflicts_with = "all_namespaces")]
        namespace: Option<String>,

        #[arg(short = 'A', long)]
        all_namespaces: bool,
    },

    /// Install a chart as a new release
    Install(ReleaseArgs),

    /// Upgrade a release
    Upgrade(ReleaseArgs),

    /// Uninstall a release
    Uninstall {
        name: String,

        #[arg(short, long, default_value = "default")]
        namespace: String,

        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ReleaseArgs {
    pub name: String,

    /// Chart reference, e.g. bitnami/nginx
    pub chart: String,

    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    #[arg(long)]
    pub version: Option<String>,

    /// YAML values file
    #[arg(short = 'f', long)]
    pub values: Option<PathBuf>,
}

/// Collection name under `/api/` for a kind, alias or collection.
pub fn collection(kind: &str) -> String {
    match KnownKind::from_str(kind) {
        Ok(kind) => kind.collection().to_string(),
        Err(_) => kind.to_lowercase(),
    }
}

/// Canonical kind for a kind or alias.
pub fn canonical_kind(kind: &str) -> String {
    match KnownKind::from_str(kind) {
        Ok(kind) => kind.to_string(),
        Err(_) => kind.to_string(),
    }
}

fn parse_limit(s: &str) -> Result<(String, String)> {
    let (resource, quantity) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected resource=quantity, got {:?}", s))?;

    let resource = resource.trim();
    let quantity = quantity.trim();

    if resource.is_empty() || quantity.is_empty() {
        return Err(anyhow!("expected resource=quantity, got {:?}", s));
    }

    Ok((resource.to_string(), quantity.to_string()))
}

#[cfg(test)]
mod tests {
    use clap::{error::ErrorKind, Parser};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::cmd::Command;

    use super::*;

    fn parse(args: &[&str]) -> SubCommand {
        let mut argv = vec!["kubeconsole"];
        argv.extend_from_slice(args);

        Command::try_parse_from(argv).unwrap().subcommand
    }

    #[test]
    fn list_defaults() {
        let SubCommand::List(args) = parse(&["list", "po"]) else {
            panic!("expected list");
        };

        assert_eq!(args.collection(), "pods");
        assert_eq!(args.namespace().as_deref(), Some("default"));
        assert_eq!(args.sort_state(), SortState::default());
        assert_eq!(args.scope, ScopeFilter::All);
        assert!(!args.watch);
    }

    #[test]
    fn list_with_filter_and_sort() {
        let SubCommand::List(args) = parse(&[
            "list", "deploy", "-A", "--filter", "web", "--sort", "created", "--desc", "--scope",
            "namespaced",
        ]) else {
            panic!("expected list");
        };

        assert_eq!(args.collection(), "deployments");
        assert_eq!(args.namespace(), None);
        assert_eq!(args.filter.as_deref(), Some("web"));
        assert_eq!(
            args.sort_state(),
            SortState::new(SortField::Created, SortDirection::Descending)
        );
        assert_eq!(args.scope, ScopeFilter::Namespaced);
    }

    #[test]
    fn list_namespace_conflicts_with_all_namespaces() {
        let cmd = Command::try_parse_from(["kubeconsole", "list", "pods", "-A", "-n", "default"]);
        assert_eq!(cmd.unwrap_err().kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn unknown_sort_field_is_rejected() {
        let cmd = Command::try_parse_from(["kubeconsole", "list", "pods", "--sort", "color"]);
        assert_eq!(cmd.unwrap_err().kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn quota_limits() {
        let SubCommand::Quota(args) = parse(&[
            "quota",
            "team-quota",
            "-n",
            "team-a",
            "--hard",
            "pods=10",
            "--hard",
            "requests.cpu=2",
        ]) else {
            panic!("expected quota");
        };

        assert_eq!(
            args.limits,
            vec![
                ("pods".to_string(), "10".to_string()),
                ("requests.cpu".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn delete_force_yes() {
        let SubCommand::Delete { target, force, yes } =
            parse(&["delete", "pod", "web-0", "-n", "default", "--force", "-y"])
        else {
            panic!("expected delete");
        };

        assert_eq!(target.kind, "pod");
        assert_eq!(target.namespace.as_deref(), Some("default"));
        assert!(force);
        assert!(yes);
    }

    #[rstest]
    #[case("pods", "pods")]
    #[case("svc", "services")]
    #[case("HelmRelease", "helm/releases")]
    #[case("Certificates", "certificates")]
    fn collection_of_kind(#[case] kind: &str, #[case] expected: &str) {
        assert_eq!(collection(kind), expected);
    }

    #[rstest]
    #[case("pods=")]
    #[case("=10")]
    #[case("pods")]
    fn invalid_limit(#[case] input: &str) {
        assert!(parse_limit(input).is_err());
    }
}
