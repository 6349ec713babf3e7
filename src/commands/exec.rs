//! Exec command - Migrate namespaces between clusters
//!
//! Exports the selected namespaces from the source cluster into a scratch
//! archive, then replays the archive into the destination cluster. Objects
//! the destination rejects are reported but do not fail the command; only
//! an aborted run exits non-zero.

use std::path::PathBuf;

use clap::Args;
use migrator_common::{ClusterEndpoint, PLUGINS_KUBECONFIG_ENV};
use migrator_migrate::{MigrationRequest, MigrationResult, Migrator};
use tracing::info;

use crate::{Error, Result};

/// Migrate namespaces from a source cluster to a destination cluster
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Kubeconfig of the source cluster
    #[arg(short = 's', long = "source")]
    pub source: PathBuf,

    /// Kubeconfig of the destination cluster
    #[arg(short = 'd', long = "destination")]
    pub destination: PathBuf,

    /// Namespaces to migrate, comma-separated
    #[arg(short = 'n', long = "namespaces", value_delimiter = ',', required = true)]
    pub namespaces: Vec<String>,

    /// Directory holding plugin executables
    #[arg(short = 'p', long = "plugins")]
    pub plugins: PathBuf,

    /// Scratch directory for the transfer archive
    #[arg(short = 'c', long = "cache")]
    pub cache: PathBuf,

    /// Shared kubeconfig path read by plugins
    #[arg(long = "plugins-kubeconfig", env = PLUGINS_KUBECONFIG_ENV)]
    pub plugins_kubeconfig: PathBuf,
}

impl ExecArgs {
    /// Build the migration request, rejecting empty namespace names
    pub fn request(&self) -> Result<MigrationRequest> {
        let namespaces: Vec<String> = self
            .namespaces
            .iter()
            .map(|ns| ns.trim().to_string())
            .collect();
        if namespaces.is_empty() || namespaces.iter().any(String::is_empty) {
            return Err(Error::validation("namespace names must not be empty"));
        }

        Ok(MigrationRequest {
            source: ClusterEndpoint::source(&self.source),
            destination: ClusterEndpoint::destination(&self.destination),
            namespaces,
            plugin_dir: self.plugins.clone(),
            cache_dir: self.cache.clone(),
            shared_credential: self.plugins_kubeconfig.clone(),
        })
    }
}

pub async fn run(args: ExecArgs) -> Result<()> {
    let request = args.request()?;
    let report = Migrator::new().run(&request).await;

    match report.result {
        MigrationResult::Completed { completion, outcome } => {
            info!(
                restored = outcome.restored(),
                errors = outcome.errors().len(),
                warnings = outcome.warnings().len(),
                "Migration {}", completion
            );
            Ok(())
        }
        MigrationResult::Aborted { step, error } => Err(Error::Migration {
            step,
            source: error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Commands};
    use clap::Parser;

    fn parse(args: &[&str]) -> std::result::Result<ExecArgs, clap::Error> {
        let cli = Cli::try_parse_from(args)?;
        match cli.command {
            Commands::Exec(args) => Ok(args),
        }
    }

    #[test]
    fn parses_all_flags() {
        let args = parse(&[
            "migrate",
            "exec",
            "-s",
            "/tmp/source.yaml",
            "-d",
            "/tmp/dest.yaml",
            "-n",
            "webapp,payments",
            "-p",
            "/opt/plugins",
            "-c",
            "/var/cache/migrate",
            "--plugins-kubeconfig",
            "/tmp/plugins/kubeconfig",
        ])
        .unwrap();

        assert_eq!(args.namespaces, vec!["webapp", "payments"]);
        let request = args.request().unwrap();
        assert_eq!(request.source.kubeconfig(), PathBuf::from("/tmp/source.yaml"));
        assert_eq!(
            request.destination.role(),
            migrator_common::ClusterRole::Destination
        );
        assert_eq!(request.plugin_dir, PathBuf::from("/opt/plugins"));
        assert_eq!(request.cache_dir, PathBuf::from("/var/cache/migrate"));
        assert_eq!(
            request.shared_credential,
            PathBuf::from("/tmp/plugins/kubeconfig")
        );
    }

    #[test]
    fn long_flags_and_global_options() {
        let cli = Cli::try_parse_from([
            "migrate",
            "--log-format",
            "json",
            "exec",
            "--source",
            "a",
            "--destination",
            "b",
            "--namespaces",
            "webapp",
            "--plugins",
            "p",
            "--cache",
            "c",
            "--plugins-kubeconfig",
            "k",
        ])
        .unwrap();

        assert_eq!(cli.log_format, crate::logging::LogFormat::Json);
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn namespaces_are_required() {
        let err = parse(&[
            "migrate",
            "exec",
            "-s",
            "a",
            "-d",
            "b",
            "-p",
            "p",
            "-c",
            "c",
            "--plugins-kubeconfig",
            "k",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn shared_kubeconfig_is_required() {
        if std::env::var_os(PLUGINS_KUBECONFIG_ENV).is_some() {
            return;
        }
        let err = parse(&[
            "migrate", "exec", "-s", "a", "-d", "b", "-n", "webapp", "-p", "p", "-c", "c",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn empty_namespace_is_rejected() {
        let args = parse(&[
            "migrate",
            "exec",
            "-s",
            "a",
            "-d",
            "b",
            "-n",
            "webapp, ",
            "-p",
            "p",
            "-c",
            "c",
            "--plugins-kubeconfig",
            "k",
        ])
        .unwrap();

        assert!(matches!(args.request(), Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn missing_cache_dir_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let args = ExecArgs {
            source: dir.path().join("source.yaml"),
            destination: dir.path().join("dest.yaml"),
            namespaces: vec!["webapp".to_string()],
            plugins: dir.path().join("plugins"),
            cache: dir.path().join("missing"),
            plugins_kubeconfig: dir.path().join("shared"),
        };

        let err = run(args).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Migration {
                step: migrator_migrate::MigrationStep::AllocateMedium,
                ..
            }
        ));
    }
}
