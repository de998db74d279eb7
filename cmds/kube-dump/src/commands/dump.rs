//! Dump command handler.
//!
//! Connects to the cluster, runs the pipeline and reports the outcome to
//! the log and the notification webhook.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use tracing::instrument;

use crate::{
	archive::Compression,
	catalog::CatalogOverrides,
	config::{parse_list, ArchiveSettings, DumpConfig, DumpMode, GitSettings, NotifySettings},
	dump::{OutputLayout, RunStatus},
	git::GitCli,
	k8s::{
		client::{ClusterConnection, ConnectionSettings},
		cluster::KubeCluster,
	},
	notify::{self, Outcome},
	pipeline,
};

#[derive(Args, Debug, Clone)]
pub struct DumpArgs {
	/// Directory the manifests are written to
	#[arg(short = 'd', long, env = "DESTINATION_DIR", default_value = "./data")]
	pub destination_dir: PathBuf,

	/// Delete previous dump directories (everything except .git) before dumping
	#[arg(short = 'f', long, env = "FORCE_REMOVE")]
	pub force_remove: bool,

	/// Seconds to wait before --force-remove deletes anything
	#[arg(long, env = "FORCE_REMOVE_DELAY", default_value_t = 5)]
	pub force_remove_delay: u64,

	/// Keep namespaced manifests exactly as the API returns them
	#[arg(long, env = "DETAILED")]
	pub detailed: bool,

	/// Write each kind into its own subdirectory
	#[arg(long, env = "OUTPUT_BY_TYPE")]
	pub output_by_type: bool,

	/// Write all instances of a kind into a single file
	#[arg(long, env = "FLAT")]
	pub flat: bool,

	/// Comma-separated namespaces to dump. All namespaces if unset
	#[arg(short = 'n', long, env = "NAMESPACES")]
	pub namespaces: Option<String>,

	/// Comma-separated namespaced kinds to dump. Discovered if unset
	#[arg(short = 'r', long, env = "NAMESPACED_RESOURCES")]
	pub namespaced_resources: Option<String>,

	/// Comma-separated cluster-scoped kinds to dump. Discovered if unset
	#[arg(short = 'k', long, env = "CLUSTER_RESOURCES")]
	pub cluster_resources: Option<String>,

	/// Path to the kubeconfig file. Disables in-cluster detection
	#[arg(long, env = "KUBE_CONFIG")]
	pub kube_config: Option<PathBuf>,

	/// Kubeconfig context to use instead of the current one
	#[arg(long, env = "KUBE_CONTEXT")]
	pub kube_context: Option<String>,

	/// Kubeconfig cluster to use instead of the one the context references
	#[arg(long, env = "KUBE_CLUSTER")]
	pub kube_cluster: Option<String>,

	/// Skip TLS certificate verification of the API server
	#[arg(long, env = "KUBE_INSECURE_TLS")]
	pub kube_insecure_tls: bool,

	/// Commit the dump to a git repository in the destination directory
	#[arg(short = 'c', long, env = "GIT_COMMIT")]
	pub git_commit: bool,

	/// Commit and push the dump
	#[arg(short = 'p', long, env = "GIT_PUSH")]
	pub git_push: bool,

	/// Branch to commit to. The current branch if unset
	#[arg(short = 'b', long, env = "GIT_BRANCH")]
	pub git_branch: Option<String>,

	/// Commit author name
	#[arg(long, env = "GIT_COMMIT_USER")]
	pub git_commit_user: Option<String>,

	/// Commit author email
	#[arg(long, env = "GIT_COMMIT_EMAIL")]
	pub git_commit_email: Option<String>,

	/// Name of the remote to push to
	#[arg(long, env = "GIT_REMOTE_NAME", default_value = crate::config::DEFAULT_REMOTE_NAME)]
	pub git_remote_name: String,

	/// URL of the remote, registered if the repository lacks it
	#[arg(long, env = "GIT_REMOTE_URL")]
	pub git_remote_url: Option<String>,

	/// Pack the destination directory into a tarball
	#[arg(short = 'a', long, env = "ARCHIVE")]
	pub archive: bool,

	/// Delete archives older than this many days
	#[arg(long, env = "ARCHIVE_ROTATE_DAYS")]
	pub archive_rotate_days: Option<u32>,

	/// Archive compression: gz, xz, bz2. Plain tar otherwise
	#[arg(long, env = "ARCHIVE_TYPE")]
	pub archive_type: Option<String>,

	/// Cluster name shown in notifications
	#[arg(long, env = "CLUSTER_NAME")]
	pub cluster_name: Option<String>,

	/// Chat webhook URL for run notifications
	#[arg(long, env = "SLACK_URL")]
	pub slack_url: Option<String>,

	/// Channel for run notifications. Required for notifications to be sent
	#[arg(long, env = "SLACK_CHANNEL")]
	pub slack_channel: Option<String>,
}

impl DumpArgs {
	/// Resolve the arguments into the run configuration.
	pub fn into_config(self, mode: DumpMode) -> DumpConfig {
		DumpConfig {
			destination: self.destination_dir,
			mode,
			force_remove: self
				.force_remove
				.then(|| Duration::from_secs(self.force_remove_delay)),
			detailed: self.detailed,
			layout: OutputLayout {
				by_type: self.output_by_type,
				aggregate: self.flat,
			},
			overrides: CatalogOverrides {
				namespaces: parse_list(self.namespaces.as_deref()),
				namespaced_kinds: parse_list(self.namespaced_resources.as_deref()),
				cluster_kinds: parse_list(self.cluster_resources.as_deref()),
			},
			connection: ConnectionSettings {
				kube_config: self.kube_config,
				context: self.kube_context,
				cluster: self.kube_cluster,
				insecure_tls: self.kube_insecure_tls,
			},
			git: GitSettings {
				commit: self.git_commit,
				push: self.git_push,
				branch: self.git_branch,
				commit_user: self.git_commit_user,
				commit_email: self.git_commit_email,
				remote_name: self.git_remote_name,
				remote_url: self.git_remote_url,
			},
			archive: ArchiveSettings {
				enabled: self.archive,
				compression: Compression::from_type(self.archive_type.as_deref()),
				rotate_days: self.archive_rotate_days,
			},
			notify: NotifySettings {
				cluster_name: self.cluster_name,
				webhook_url: self.slack_url,
				channel: self.slack_channel,
			},
		}
	}
}

/// Run the dump command.
pub fn run(args: DumpArgs, mode: DumpMode) -> Result<()> {
	let config = args.into_config(mode);

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	runtime.block_on(run_async(&config)).map(drop)
}

/// Dump, then notify and log the outcome.
///
/// Fatal errors are notified as a failed run before being returned.
pub async fn run_async(config: &DumpConfig) -> Result<RunStatus> {
	let started = Local::now();
	let clock = std::time::Instant::now();

	let result = dump(config, started).await.and_then(|status| {
		if status.is_success() {
			Ok(status)
		} else {
			anyhow::bail!("dump did not complete ({} checkpoints)", status.checkpoints())
		}
	});

	let elapsed = clock.elapsed();
	match &result {
		Ok(status) => tracing::info!(
			dumped = status.summary.dumped,
			failed = status.summary.failed,
			skipped = status.summary.skipped,
			missing_namespaces = status.summary.missing_namespaces,
			elapsed_secs = elapsed.as_secs_f64(),
			destination = %config.destination.display(),
			"dump finished"
		),
		Err(e) => tracing::error!(
			error = %format!("{e:#}"),
			elapsed_secs = elapsed.as_secs_f64(),
			"dump failed"
		),
	}

	notify::notify(&config.notify, Outcome::from_success(result.is_ok())).await;
	result
}

#[instrument(skip_all)]
async fn dump(config: &DumpConfig, started: chrono::DateTime<Local>) -> Result<RunStatus> {
	let connection = ClusterConnection::resolve(&config.connection)
		.await
		.context("connecting to cluster")?;
	tracing::info!(
		context = %connection.context().name,
		cluster = %connection.context().cluster,
		version = %connection.server_version().git_version,
		"connected"
	);

	let cluster = KubeCluster::discover(&connection)
		.await
		.context("discovering API resources")?;

	let git = if config.git.enabled() {
		Some(GitCli::new().context("setting up git")?)
	} else {
		None
	};

	pipeline::run(config, connection.context(), &cluster, git.as_ref(), started).await
}

#[cfg(test)]
mod tests {
	use clap::Parser;

	use super::*;

	#[derive(Parser)]
	struct TestCli {
		#[command(flatten)]
		args: DumpArgs,
	}

	fn parse(args: &[&str]) -> DumpConfig {
		let cli = TestCli::try_parse_from(std::iter::once("kube-dump").chain(args.iter().copied())).unwrap();
		cli.args.into_config(DumpMode::All)
	}

	#[test]
	fn test_flags_resolve_into_config() {
		let config = parse(&[
			"-d",
			"/backups",
			"-f",
			"--force-remove-delay",
			"0",
			"-n",
			"default, kube-system,default",
			"-k",
			"",
			"--flat",
			"-p",
			"--git-remote-url",
			"git@example.com:org/backups.git",
			"-a",
			"--archive-type",
			"xz",
			"--archive-rotate-days",
			"7",
		]);

		assert_eq!(config.destination, PathBuf::from("/backups"));
		assert_eq!(config.force_remove, Some(Duration::ZERO));
		assert_eq!(
			config.overrides.namespaces,
			Some(vec!["default".to_string(), "kube-system".to_string()])
		);
		assert_eq!(config.overrides.namespaced_kinds, None);
		assert_eq!(config.overrides.cluster_kinds, Some(vec![]));
		assert!(config.layout.aggregate);
		assert!(!config.layout.by_type);
		assert!(config.git.push);
		assert!(config.git.enabled());
		assert_eq!(config.git.remote_name, "origin");
		assert_eq!(config.archive.compression, Compression::Xz);
		assert_eq!(config.archive.rotate_days, Some(7));
	}

	#[test]
	fn test_defaults() {
		let config = parse(&[]);
		assert_eq!(config.destination, PathBuf::from("./data"));
		assert_eq!(config.force_remove, None);
		assert!(!config.git.enabled());
		assert!(!config.archive.enabled);
		assert_eq!(config.layout, OutputLayout::default());
	}
}
