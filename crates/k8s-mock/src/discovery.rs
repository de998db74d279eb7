//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

/// Discovery mode for the mock server.
#[derive(Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// Pre-configured discovery responses.
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	/// Keyed by group version, e.g. `apps/v1`.
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::namespaced("bindings", "Binding").with_verbs(&["create"]),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([
				(
					"apps/v1".to_string(),
					vec![MockApiResource::namespaced("deployments", "Deployment")],
				),
				(
					"rbac.authorization.k8s.io/v1".to_string(),
					vec![
						MockApiResource::namespaced("roles", "Role"),
						MockApiResource::cluster_scoped("clusterroles", "ClusterRole"),
					],
				),
				(
					"metrics.k8s.io/v1beta1".to_string(),
					vec![
						MockApiResource::namespaced("pods", "PodMetrics").with_verbs(&["get", "list"]),
						MockApiResource::cluster_scoped("nodes", "NodeMetrics").with_verbs(&["get", "list"]),
					],
				),
			]),
		}
	}
}

impl MockDiscovery {
	/// Find the resource served under `plural` in `group_version` (`v1` for core).
	pub fn find(&self, group_version: &str, plural: &str) -> Option<&MockApiResource> {
		let resources = if group_version == "v1" {
			&self.core_resources
		} else {
			self.group_resources.get(group_version)?
		};
		resources.iter().find(|r| r.name == plural)
	}

	/// Find the resource of `kind` in `group_version`.
	pub fn find_kind(&self, group_version: &str, kind: &str) -> Option<&MockApiResource> {
		let resources = if group_version.contains('/') {
			self.group_resources.get(group_version)?
		} else {
			&self.core_resources
		};
		resources.iter().find(|r| r.kind == kind)
	}
}

/// A mock API resource definition.
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

const READ_VERBS: [&str; 3] = ["get", "list", "watch"];

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
			verbs: READ_VERBS.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self {
			namespaced: false,
			..Self::namespaced(name, kind)
		}
	}

	pub fn with_verbs(mut self, verbs: &[&str]) -> Self {
		self.verbs = verbs.iter().map(|v| (*v).to_string()).collect();
		self
	}
}
