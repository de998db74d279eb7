//! Fetching, sanitizing and writing resource instances.
//!
//! Instances are processed in catalog order: every namespaced kind of every
//! namespace first, then the cluster-scoped kinds. A failing instance is
//! logged and counted, it never stops the run.

use std::{
	collections::HashSet,
	fmt, fs,
	io::{self, Write},
	path::{Path, PathBuf},
	time::Duration,
};

use thiserror::Error;
use tracing::instrument;

use crate::{
	catalog::ResourceCatalog,
	k8s::{ClusterApi, ClusterError, ResourceKind, SERVICE_ACCOUNT_TOKEN_TYPE},
	sanitize::{sanitize, ManifestFilter, SanitizeError},
};

/// Directory holding cluster-scoped resources, next to the namespace directories.
pub const CLUSTER_DIR: &str = "cluster";

/// Directory that force-remove never touches.
const GIT_DIR: &str = ".git";

/// Separator between documents of an aggregate file.
const DOCUMENT_SEPARATOR: &str = "---\n";

#[derive(Debug, Error)]
pub enum DumpError {
	#[error("creating destination directory {path}")]
	CreateRoot {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("removing previous dump directory {path}")]
	ForceRemove {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error(transparent)]
	Cluster(#[from] ClusterError),

	#[error(transparent)]
	Sanitize(#[from] SanitizeError),

	#[error("writing {path}")]
	Write {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Where each instance is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputLayout {
	/// One subdirectory per kind instead of a `_<kind>` filename suffix.
	pub by_type: bool,
	/// One `all` file per kind instead of one file per instance.
	pub aggregate: bool,
}

impl OutputLayout {
	/// `<dest>/<namespace|cluster>/[<kind>/]<filename>`
	pub fn path_for(
		&self,
		destination: &Path,
		namespace: Option<&str>,
		kind: &ResourceKind,
		instance: &str,
	) -> PathBuf {
		let mut path = destination.join(namespace.unwrap_or(CLUSTER_DIR));
		if self.by_type {
			path.push(&kind.name);
		}

		let stem = if self.aggregate {
			"all".to_string()
		} else {
			instance.replace(':', "-")
		};
		let filename = if self.by_type {
			format!("{stem}.yaml")
		} else {
			format!("{stem}_{}.yaml", kind.name)
		};
		path.push(filename);
		path
	}
}

/// Step at which an instance failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	Fetching,
	Sanitizing,
	Writing,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Stage::Fetching => write!(f, "fetching"),
			Stage::Sanitizing => write!(f, "sanitizing"),
			Stage::Writing => write!(f, "writing"),
		}
	}
}

/// Outcome of a single instance.
#[derive(Debug)]
pub enum DumpResult {
	Written(PathBuf),
	/// Excluded on purpose, e.g. service account token secrets.
	Skipped,
	Failed { stage: Stage, error: DumpError },
}

/// Points of the run that advance the success counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
	RootCreated,
	NamespaceCompleted,
	ClusterScopeCompleted,
	RunAcknowledged,
}

/// Per-instance tallies, reported at the end of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
	pub dumped: usize,
	pub failed: usize,
	pub skipped: usize,
	pub missing_namespaces: usize,
}

/// Run-level state threaded through every stage.
///
/// Success is judged on the checkpoint counter alone. Instance failures
/// only show up in the summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatus {
	checkpoints: i64,
	pub summary: DumpSummary,
}

impl RunStatus {
	pub fn checkpoint(&mut self, checkpoint: Checkpoint) {
		self.checkpoints += 1;
		tracing::trace!(?checkpoint, count = self.checkpoints, "checkpoint reached");
	}

	pub fn checkpoints(&self) -> i64 {
		self.checkpoints
	}

	pub fn is_success(&self) -> bool {
		self.checkpoints >= 0
	}

	pub fn record(&mut self, result: &DumpResult) {
		match result {
			DumpResult::Written(_) => self.summary.dumped += 1,
			DumpResult::Skipped => self.summary.skipped += 1,
			DumpResult::Failed { .. } => self.summary.failed += 1,
		}
	}
}

/// Create the destination root. With `force_remove`, every top-level
/// directory except `.git` is deleted after the given delay.
#[instrument(skip(status))]
pub async fn prepare_destination(
	destination: &Path,
	force_remove: Option<Duration>,
	status: &mut RunStatus,
) -> Result<(), DumpError> {
	fs::create_dir_all(destination).map_err(|source| DumpError::CreateRoot {
		path: destination.to_path_buf(),
		source,
	})?;

	if let Some(delay) = force_remove {
		tracing::warn!(
			destination = %destination.display(),
			delay_secs = delay.as_secs(),
			"force remove enabled, previous dump directories will be deleted"
		);
		tokio::time::sleep(delay).await;
		remove_previous_dump(destination)?;
	}

	status.checkpoint(Checkpoint::RootCreated);
	Ok(())
}

fn remove_previous_dump(destination: &Path) -> Result<(), DumpError> {
	let to_remove_err = |path: &Path| {
		let path = path.to_path_buf();
		move |source: io::Error| DumpError::ForceRemove { path, source }
	};

	let entries = fs::read_dir(destination).map_err(to_remove_err(destination))?;
	for entry in entries {
		let entry = entry.map_err(to_remove_err(destination))?;
		let path = entry.path();
		if entry.file_name() == GIT_DIR {
			continue;
		}
		let is_dir = entry.file_type().map_err(to_remove_err(&path))?.is_dir();
		if is_dir {
			tracing::debug!(path = %path.display(), "removing");
			fs::remove_dir_all(&path).map_err(to_remove_err(&path))?;
		}
	}
	Ok(())
}

/// Writes every catalog instance under one destination.
pub struct DumpEngine<'a, C> {
	cluster: &'a C,
	destination: PathBuf,
	layout: OutputLayout,
	detailed: bool,
	/// Aggregate files already truncated during this run.
	started: HashSet<PathBuf>,
}

impl<'a, C: ClusterApi> DumpEngine<'a, C> {
	pub fn new(cluster: &'a C, destination: impl Into<PathBuf>, layout: OutputLayout, detailed: bool) -> Self {
		Self {
			cluster,
			destination: destination.into(),
			layout,
			detailed,
			started: HashSet::new(),
		}
	}

	#[instrument(skip_all)]
	pub async fn dump_namespaces(&mut self, catalog: &ResourceCatalog, status: &mut RunStatus) {
		for namespace in &catalog.namespaces {
			tracing::info!(namespace = %namespace, "dumping namespace");
			for kind in &catalog.namespaced_kinds {
				self.dump_kind(kind, Some(namespace), status).await;
			}
			status.checkpoint(Checkpoint::NamespaceCompleted);
		}
	}

	#[instrument(skip_all)]
	pub async fn dump_cluster(&mut self, catalog: &ResourceCatalog, status: &mut RunStatus) {
		if catalog.cluster_kinds.is_empty() {
			return;
		}
		tracing::info!("dumping cluster-scoped resources");
		for kind in &catalog.cluster_kinds {
			self.dump_kind(kind, None, status).await;
		}
		status.checkpoint(Checkpoint::ClusterScopeCompleted);
	}

	async fn dump_kind(&mut self, kind: &ResourceKind, namespace: Option<&str>, status: &mut RunStatus) {
		let names = match self.cluster.list_instance_names(kind, namespace).await {
			Ok(names) => names,
			Err(e) => {
				tracing::warn!(kind = %kind, namespace, error = %e, "cannot list resources, skipping kind");
				return;
			}
		};

		for name in names {
			let result = self.dump_instance(kind, namespace, &name).await;
			match &result {
				DumpResult::Written(path) => {
					tracing::debug!(kind = %kind, namespace, name = %name, path = %path.display(), "dumped");
				}
				DumpResult::Skipped => {
					tracing::debug!(kind = %kind, namespace, name = %name, "skipped");
				}
				DumpResult::Failed { stage, error } => {
					tracing::warn!(
						kind = %kind,
						namespace,
						name = %name,
						%stage,
						error = %error,
						"failed to dump resource"
					);
				}
			}
			status.record(&result);
		}
	}

	/// Fetch, sanitize and write one instance.
	pub async fn dump_instance(&mut self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> DumpResult {
		let failed = |stage, error: DumpError| DumpResult::Failed { stage, error };

		if kind.is_secret() {
			match self
				.cluster
				.has_type(kind, namespace, name, SERVICE_ACCOUNT_TOKEN_TYPE)
				.await
			{
				Ok(true) => return DumpResult::Skipped,
				Ok(false) => {}
				Err(e) => return failed(Stage::Fetching, e.into()),
			}
		}

		let value = match self.cluster.get_resource(kind, namespace, name).await {
			Ok(value) => value,
			Err(e) => return failed(Stage::Fetching, e.into()),
		};

		let filter = ManifestFilter::for_scope(kind.scope, self.detailed);
		let yaml = match sanitize(value, filter) {
			Ok(yaml) => yaml,
			Err(e) => return failed(Stage::Sanitizing, e.into()),
		};

		let path = self.layout.path_for(&self.destination, namespace, kind, name);
		match self.write(&path, &yaml) {
			Ok(()) => DumpResult::Written(path),
			Err(source) => failed(Stage::Writing, DumpError::Write { path, source }),
		}
	}

	fn write(&mut self, path: &Path, yaml: &str) -> io::Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}

		let mut document = String::with_capacity(yaml.len() + DOCUMENT_SEPARATOR.len() + 1);
		let mut file = if !self.layout.aggregate || self.started.insert(path.to_path_buf()) {
			fs::File::create(path)?
		} else {
			document.push_str(DOCUMENT_SEPARATOR);
			fs::OpenOptions::new().append(true).open(path)?
		};

		document.push_str(yaml);
		if !document.ends_with('\n') {
			document.push('\n');
		}
		file.write_all(document.as_bytes())
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;
	use crate::test_utils::FakeCluster;

	#[rstest]
	#[case(false, false, "dest/default/web-1_pod.yaml")]
	#[case(true, false, "dest/default/pod/web-1.yaml")]
	#[case(false, true, "dest/default/all_pod.yaml")]
	#[case(true, true, "dest/default/pod/all.yaml")]
	fn test_layout_paths(#[case] by_type: bool, #[case] aggregate: bool, #[case] expected: &str) {
		let layout = OutputLayout { by_type, aggregate };
		let path = layout.path_for(Path::new("dest"), Some("default"), &ResourceKind::namespaced("pod"), "web:1");
		assert_eq!(path, PathBuf::from(expected));
	}

	#[test]
	fn test_cluster_scope_path() {
		let layout = OutputLayout::default();
		let kind = ResourceKind::cluster("clusterroles.rbac.authorization.k8s.io");
		let path = layout.path_for(Path::new("dest"), None, &kind, "system:admin");
		assert_eq!(
			path,
			PathBuf::from("dest/cluster/system-admin_clusterroles.rbac.authorization.k8s.io.yaml")
		);
	}

	fn cluster() -> FakeCluster {
		FakeCluster::default()
			.with_namespace("default")
			.with_object(
				"pod",
				Some("default"),
				json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "a", "uid": "1"}, "status": {}}),
			)
			.with_object(
				"pod",
				Some("default"),
				json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "b", "uid": "2"}}),
			)
			.with_object(
				"secret",
				Some("default"),
				json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "token"}, "type": SERVICE_ACCOUNT_TOKEN_TYPE}),
			)
			.with_object(
				"secret",
				Some("default"),
				json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "creds"}, "type": "Opaque"}),
			)
	}

	fn catalog() -> ResourceCatalog {
		ResourceCatalog {
			namespaces: vec!["default".to_string()],
			namespaced_kinds: vec![ResourceKind::namespaced("pod"), ResourceKind::namespaced("secret")],
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_aggregate_file_is_truncated_once_per_run() {
		let dir = tempfile::tempdir().unwrap();
		let cluster = cluster();
		let layout = OutputLayout {
			by_type: false,
			aggregate: true,
		};

		for _ in 0..2 {
			let mut status = RunStatus::default();
			let mut engine = DumpEngine::new(&cluster, dir.path(), layout, false);
			engine.dump_namespaces(&catalog(), &mut status).await;
			assert_eq!(status.summary.dumped, 3);
			assert_eq!(status.summary.skipped, 1);
		}

		let pods = fs::read_to_string(dir.path().join("default/all_pod.yaml")).unwrap();
		assert_eq!(pods.matches("---\n").count(), 1);
		assert!(pods.contains("name: a\n"));
		assert!(pods.contains("name: b\n"));
		assert!(!pods.contains("uid"));
		assert!(!pods.contains("status"));

		let secrets = fs::read_to_string(dir.path().join("default/all_secret.yaml")).unwrap();
		assert!(secrets.contains("name: creds"));
		assert!(!secrets.contains("name: token"));
		assert!(!secrets.contains("---"));
	}

	#[tokio::test]
	async fn test_service_account_token_is_skipped_before_fetch() {
		let dir = tempfile::tempdir().unwrap();
		let cluster = cluster();
		let mut engine = DumpEngine::new(&cluster, dir.path(), OutputLayout::default(), false);

		let result = engine
			.dump_instance(&ResourceKind::namespaced("secret"), Some("default"), "token")
			.await;
		assert!(matches!(result, DumpResult::Skipped));
		assert_eq!(cluster.calls("has_type"), 1);
		assert_eq!(cluster.calls("get_resource"), 0);
		assert!(!dir.path().join("default/token_secret.yaml").exists());
	}

	#[tokio::test]
	async fn test_failures_are_counted_and_run_continues() {
		let dir = tempfile::tempdir().unwrap();
		let cluster = cluster().with_failing_get("pod", "a");
		let mut status = RunStatus::default();
		let mut engine = DumpEngine::new(&cluster, dir.path(), OutputLayout::default(), false);

		engine.dump_namespaces(&catalog(), &mut status).await;

		assert_eq!(status.summary.failed, 1);
		assert_eq!(status.summary.dumped, 2);
		assert!(status.is_success());
		assert_eq!(status.checkpoints(), 1);
		assert!(dir.path().join("default/b_pod.yaml").exists());
		assert!(!dir.path().join("default/a_pod.yaml").exists());
	}

	#[tokio::test]
	async fn test_detailed_mode_keeps_namespaced_fields() {
		let dir = tempfile::tempdir().unwrap();
		let cluster = cluster();
		let mut engine = DumpEngine::new(&cluster, dir.path(), OutputLayout::default(), true);

		let result = engine
			.dump_instance(&ResourceKind::namespaced("pod"), Some("default"), "a")
			.await;
		let path = match result {
			DumpResult::Written(path) => path,
			other => panic!("expected a written file, got {other:?}"),
		};
		let yaml = fs::read_to_string(path).unwrap();
		assert!(yaml.contains("uid: '1'") || yaml.contains("uid: \"1\""));
		assert!(yaml.contains("status:"));
	}

	#[tokio::test]
	async fn test_force_remove_keeps_git_and_files() {
		let dir = tempfile::tempdir().unwrap();
		fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
		fs::create_dir_all(dir.path().join("default")).unwrap();
		fs::create_dir_all(dir.path().join("cluster")).unwrap();
		fs::write(dir.path().join("default/old_pod.yaml"), "x").unwrap();
		fs::write(dir.path().join("dump_2024.01.01_00-00.tar.gz"), "x").unwrap();

		let mut status = RunStatus::default();
		prepare_destination(dir.path(), Some(Duration::ZERO), &mut status)
			.await
			.unwrap();

		assert!(dir.path().join(".git/objects").is_dir());
		assert!(!dir.path().join("default").exists());
		assert!(!dir.path().join("cluster").exists());
		assert!(dir.path().join("dump_2024.01.01_00-00.tar.gz").is_file());
		assert_eq!(status.checkpoints(), 1);
	}

	#[tokio::test]
	async fn test_prepare_creates_missing_root() {
		let dir = tempfile::tempdir().unwrap();
		let root = dir.path().join("nested/dump");
		let mut status = RunStatus::default();
		prepare_destination(&root, None, &mut status).await.unwrap();
		assert!(root.is_dir());
	}
}
