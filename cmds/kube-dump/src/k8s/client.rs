//! Kubernetes cluster connection management.
//!
//! Resolves which kubeconfig context a run talks to, either by validating
//! the requested context/cluster names or, inside a pod, by synthesizing a
//! context from the mounted service account.

use std::{
	fmt,
	path::{Path, PathBuf},
	time::Duration,
};

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

use crate::yaml::{self, YamlError};

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Directory the kubelet mounts service account credentials into.
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Name used for the synthesized in-cluster cluster, user and context entries.
pub const IN_CLUSTER_CONTEXT: &str = "kube-dump";

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your kubeconfig")]
	ContextNotFound(String),

	#[error("no cluster named `{0}` was found. Please check your kubeconfig")]
	ClusterNotFound(String),

	#[error("no context requested and the kubeconfig has no current context")]
	NoCurrentContext,

	#[error("cannot determine kubeconfig location: no home directory")]
	NoHomeDirectory,

	#[error("kubernetes API at {server} is unreachable")]
	Unreachable {
		server: String,
		#[source]
		source: kube::Error,
	},

	#[error("writing kubeconfig to {path}")]
	WriteKubeconfig {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("serializing kubeconfig")]
	SerializeKubeconfig(#[source] YamlError),

	#[error("building in-cluster kubeconfig")]
	InClusterKubeconfig(#[source] serde_json::Error),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Connection parameters requested by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
	/// Explicit kubeconfig file. Disables in-cluster detection.
	pub kube_config: Option<PathBuf>,
	pub context: Option<String>,
	/// Cluster to use instead of the one the context references.
	pub cluster: Option<String>,
	pub insecure_tls: bool,
}

/// The context a run is bound to. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterContext {
	pub name: String,
	pub cluster: String,
	pub config_path: PathBuf,
	pub insecure_tls: bool,
}

/// Signals that the process runs inside a pod with a mounted service account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InClusterEnv {
	pub host: String,
	pub port: String,
	pub token_path: PathBuf,
	pub ca_path: PathBuf,
}

impl InClusterEnv {
	/// Detect in-cluster signals from the process environment.
	pub fn detect() -> Option<Self> {
		let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
		let port = std::env::var("KUBERNETES_SERVICE_PORT").ok()?;
		Self::from_parts(&host, &port, Path::new(SERVICE_ACCOUNT_DIR))
	}

	/// Build from explicit values; `None` unless the token file exists.
	pub fn from_parts(host: &str, port: &str, account_dir: &Path) -> Option<Self> {
		if host.is_empty() || port.is_empty() {
			return None;
		}
		let token_path = account_dir.join("token");
		if !token_path.is_file() {
			return None;
		}
		Some(Self {
			host: host.to_string(),
			port: port.to_string(),
			token_path,
			ca_path: account_dir.join("ca.crt"),
		})
	}

	/// HTTPS endpoint of the API server.
	pub fn server(&self) -> String {
		if self.host.contains(':') {
			format!("https://[{}]:{}", self.host, self.port)
		} else {
			format!("https://{}:{}", self.host, self.port)
		}
	}

	/// Kubeconfig holding a single context that authenticates with the
	/// mounted token and trusts the mounted CA.
	pub fn kubeconfig(&self) -> Result<Kubeconfig, ConnectionError> {
		let value = json!({
			"apiVersion": "v1",
			"kind": "Config",
			"clusters": [{
				"name": IN_CLUSTER_CONTEXT,
				"cluster": {
					"server": self.server(),
					"certificate-authority": self.ca_path.to_string_lossy(),
				},
			}],
			"users": [{
				"name": IN_CLUSTER_CONTEXT,
				"user": {"tokenFile": self.token_path.to_string_lossy()},
			}],
			"contexts": [{
				"name": IN_CLUSTER_CONTEXT,
				"context": {"cluster": IN_CLUSTER_CONTEXT, "user": IN_CLUSTER_CONTEXT},
			}],
			"current-context": IN_CLUSTER_CONTEXT,
		});
		serde_json::from_value(value).map_err(ConnectionError::InClusterKubeconfig)
	}
}

/// Represents a connection to a Kubernetes cluster.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	context: ClusterContext,
}

impl fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("context", &self.context)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the requested settings and the ambient environment.
	///
	/// Inside a pod without an explicit kubeconfig, the service account is
	/// used and persisted as the current context of the active kubeconfig.
	#[instrument(skip_all)]
	pub async fn resolve(settings: &ConnectionSettings) -> Result<Self, ConnectionError> {
		if settings.kube_config.is_none() {
			if let Some(env) = InClusterEnv::detect() {
				tracing::info!(server = %env.server(), "running in-cluster, using service account");
				let path = active_kubeconfig_path(None)?;
				return Self::in_cluster(&env, settings.insecure_tls, &path).await;
			}
		}

		let (kubeconfig, path) = match &settings.kube_config {
			Some(path) => (Kubeconfig::read_from(path)?, path.clone()),
			None => (Kubeconfig::read()?, active_kubeconfig_path(None)?),
		};
		Self::from_kubeconfig(settings, kubeconfig, path).await
	}

	/// Connect through a parsed kubeconfig.
	#[instrument(skip_all)]
	pub async fn from_kubeconfig(
		settings: &ConnectionSettings,
		kubeconfig: Kubeconfig,
		config_path: PathBuf,
	) -> Result<Self, ConnectionError> {
		let context = resolve_context(settings, &kubeconfig, config_path)?;
		tracing::debug!(context = %context.name, cluster = %context.cluster, "resolved context");

		let config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: Some(context.name.clone()),
				cluster: settings.cluster.clone(),
				..Default::default()
			},
		)
		.await?;

		Self::connect(config, context).await
	}

	/// Probe the API with the mounted service account, then record the
	/// synthesized context in `config_path`.
	///
	/// A failed probe is fatal. Failing to record the context is only
	/// logged, the connection is usable either way.
	#[instrument(skip_all, fields(server = %env.server()))]
	pub async fn in_cluster(
		env: &InClusterEnv,
		insecure_tls: bool,
		config_path: &Path,
	) -> Result<Self, ConnectionError> {
		let synthesized = env.kubeconfig()?;
		let config = Config::from_custom_kubeconfig(
			synthesized.clone(),
			&KubeConfigOptions {
				context: Some(IN_CLUSTER_CONTEXT.to_string()),
				..Default::default()
			},
		)
		.await?;

		let context = ClusterContext {
			name: IN_CLUSTER_CONTEXT.to_string(),
			cluster: IN_CLUSTER_CONTEXT.to_string(),
			config_path: config_path.to_path_buf(),
			insecure_tls,
		};
		let connection = Self::connect(config, context).await?;

		match store_context(config_path, synthesized) {
			Ok(()) => tracing::info!(path = %config_path.display(), "stored in-cluster context"),
			Err(e) => tracing::warn!(
				path = %config_path.display(),
				error = %e,
				"cannot store in-cluster context, continuing without it"
			),
		}

		Ok(connection)
	}

	async fn connect(mut config: Config, context: ClusterContext) -> Result<Self, ConnectionError> {
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		if context.insecure_tls {
			config.accept_invalid_certs = true;
		}
		let server = config.cluster_url.to_string();
		let client = Client::try_from(config)?;

		// Liveness probe
		let server_version = client
			.apiserver_version()
			.await
			.map_err(|source| ConnectionError::Unreachable { server, source })?;
		tracing::debug!(version = %server_version.git_version, "connected to cluster");

		Ok(Self {
			client,
			server_version,
			context,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	pub fn context(&self) -> &ClusterContext {
		&self.context
	}
}

/// Pick the context and cluster for a run.
///
/// Requested names must match kubeconfig entries exactly. Without a
/// requested context the current context is used; a requested cluster
/// replaces the one that context references.
pub fn resolve_context(
	settings: &ConnectionSettings,
	kubeconfig: &Kubeconfig,
	config_path: PathBuf,
) -> Result<ClusterContext, ConnectionError> {
	let name = match &settings.context {
		Some(name) => name.clone(),
		None => kubeconfig
			.current_context
			.clone()
			.filter(|name| !name.is_empty())
			.ok_or(ConnectionError::NoCurrentContext)?,
	};

	let named = kubeconfig
		.contexts
		.iter()
		.find(|c| c.name == name)
		.ok_or_else(|| ConnectionError::ContextNotFound(name.clone()))?;

	let cluster = match &settings.cluster {
		Some(cluster) => {
			if !kubeconfig.clusters.iter().any(|c| &c.name == cluster) {
				return Err(ConnectionError::ClusterNotFound(cluster.clone()));
			}
			cluster.clone()
		}
		None => named
			.context
			.as_ref()
			.map(|ctx| ctx.cluster.clone())
			.unwrap_or_default(),
	};

	Ok(ClusterContext {
		name,
		cluster,
		config_path,
		insecure_tls: settings.insecure_tls,
	})
}

/// Add the entries of `synthesized` to `existing`, replacing same-named
/// ones, and make its current context current.
pub fn merge_kubeconfig(mut existing: Kubeconfig, synthesized: Kubeconfig) -> Kubeconfig {
	for cluster in synthesized.clusters {
		existing.clusters.retain(|c| c.name != cluster.name);
		existing.clusters.push(cluster);
	}
	for user in synthesized.auth_infos {
		existing.auth_infos.retain(|u| u.name != user.name);
		existing.auth_infos.push(user);
	}
	for context in synthesized.contexts {
		existing.contexts.retain(|c| c.name != context.name);
		existing.contexts.push(context);
	}
	if synthesized.current_context.is_some() {
		existing.current_context = synthesized.current_context;
	}
	existing
}

/// Kubeconfig file that in-cluster setup writes to: an explicit path, the
/// first `KUBECONFIG` entry, or `~/.kube/config`.
pub fn active_kubeconfig_path(explicit: Option<&Path>) -> Result<PathBuf, ConnectionError> {
	if let Some(path) = explicit {
		return Ok(path.to_path_buf());
	}
	if let Some(first) = std::env::var_os("KUBECONFIG")
		.as_deref()
		.and_then(|paths| std::env::split_paths(paths).find(|p| !p.as_os_str().is_empty()))
	{
		return Ok(first);
	}
	dirs::home_dir()
		.map(|home| home.join(".kube").join("config"))
		.ok_or(ConnectionError::NoHomeDirectory)
}

/// Merge `synthesized` into the kubeconfig at `path`, creating it if needed.
fn store_context(path: &Path, synthesized: Kubeconfig) -> Result<(), ConnectionError> {
	let existing = if path.is_file() {
		Kubeconfig::read_from(path)?
	} else {
		Kubeconfig::default()
	};
	write_kubeconfig(path, &merge_kubeconfig(existing, synthesized))
}

fn write_kubeconfig(path: &Path, kubeconfig: &Kubeconfig) -> Result<(), ConnectionError> {
	let value = serde_json::to_value(kubeconfig).map_err(ConnectionError::InClusterKubeconfig)?;
	let text = yaml::to_yaml(&value).map_err(ConnectionError::SerializeKubeconfig)?;

	let write = || -> std::io::Result<()> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, text)
	};
	write().map_err(|source| ConnectionError::WriteKubeconfig {
		path: path.to_path_buf(),
		source,
	})
}
