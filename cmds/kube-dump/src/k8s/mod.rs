//! Kubernetes access for the dump pipeline.
//!
//! The pipeline only talks to the cluster through [`ClusterApi`]. The
//! kube-rs backed implementation lives in [`cluster::KubeCluster`]; context
//! resolution and the connection itself live in [`client`].

pub mod client;
pub mod cluster;
pub mod discovery;

use std::fmt;

use thiserror::Error;

use self::discovery::DiscoveryError;

/// Secret type of automatically managed service account tokens.
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}

impl fmt::Display for ResourceScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ResourceScope::Namespaced => write!(f, "namespaced"),
			ResourceScope::ClusterWide => write!(f, "cluster"),
		}
	}
}

/// A resource kind as named on the command line or by discovery.
///
/// The name is used verbatim in output paths, so `pod` and `pods` produce
/// different directories even though both resolve to the same API resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKind {
	pub name: String,
	pub scope: ResourceScope,
}

impl ResourceKind {
	pub fn namespaced(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			scope: ResourceScope::Namespaced,
		}
	}

	pub fn cluster(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			scope: ResourceScope::ClusterWide,
		}
	}

	/// Whether this kind names core secrets.
	pub fn is_secret(&self) -> bool {
		matches!(
			self.name.to_ascii_lowercase().as_str(),
			"secret" | "secrets"
		)
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.name)
	}
}

/// Errors returned by cluster capabilities.
#[derive(Debug, Error)]
pub enum ClusterError {
	#[error("building API resource catalog")]
	Discovery(#[source] DiscoveryError),

	#[error("unknown resource kind `{0}`")]
	UnknownKind(String),

	#[error("listing namespaces")]
	ListNamespaces(#[source] Box<kube::Error>),

	#[error("checking if namespace '{namespace}' exists")]
	NamespaceCheck {
		namespace: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("listing {kind}{}", in_namespace(namespace.as_deref()))]
	List {
		kind: String,
		namespace: Option<String>,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("fetching {kind}/{name}{}", in_namespace(namespace.as_deref()))]
	Get {
		kind: String,
		name: String,
		namespace: Option<String>,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("{kind}/{name} not found{}", in_namespace(namespace.as_deref()))]
	NotFound {
		kind: String,
		name: String,
		namespace: Option<String>,
	},

	#[error("serializing {kind}/{name}")]
	Serialize {
		kind: String,
		name: String,
		#[source]
		source: serde_json::Error,
	},
}

fn in_namespace(namespace: Option<&str>) -> String {
	namespace
		.map(|ns| format!(" in namespace {ns}"))
		.unwrap_or_default()
}

/// Read-only cluster capabilities needed by the catalog and the dump engine.
///
/// Calls are issued one at a time; implementations need not be `Sync`.
#[allow(async_fn_in_trait)]
pub trait ClusterApi {
	/// Names of all namespaces, in the order the API returns them.
	async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError>;

	async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError>;

	/// Listable resource kinds of the given scope.
	async fn list_resource_kinds(
		&self,
		scope: ResourceScope,
	) -> Result<Vec<ResourceKind>, ClusterError>;

	/// Names of every instance of `kind`, sorted.
	async fn list_instance_names(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
	) -> Result<Vec<String>, ClusterError>;

	/// Whether the instance's top-level `type` field equals `type_name`.
	///
	/// Reads metadata only. Used to skip secrets before their data is
	/// retrieved for dumping.
	async fn has_type(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
		name: &str,
		type_name: &str,
	) -> Result<bool, ClusterError>;

	/// Full JSON representation of an instance, including `apiVersion` and `kind`.
	async fn get_resource(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
		name: &str,
	) -> Result<serde_json::Value, ClusterError>;
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case("secret", true)]
	#[case("secrets", true)]
	#[case("Secret", true)]
	#[case("secretproviderclasses.secrets-store.csi.x-k8s.io", false)]
	#[case("configmap", false)]
	fn test_is_secret(#[case] name: &str, #[case] expected: bool) {
		assert_eq!(ResourceKind::namespaced(name).is_secret(), expected);
	}

	#[test]
	fn test_error_mentions_namespace() {
		let err = ClusterError::NotFound {
			kind: "pod".to_string(),
			name: "web".to_string(),
			namespace: Some("default".to_string()),
		};
		assert_eq!(err.to_string(), "pod/web not found in namespace default");

		let err = ClusterError::NotFound {
			kind: "clusterroles.rbac.authorization.k8s.io".to_string(),
			name: "admin".to_string(),
			namespace: None,
		};
		assert_eq!(
			err.to_string(),
			"clusterroles.rbac.authorization.k8s.io/admin not found"
		);
	}
}
