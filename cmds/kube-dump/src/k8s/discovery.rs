//! Kubernetes API resource discovery.
//!
//! Builds the list of dumpable resource kinds from the cluster's discovery
//! API and resolves user-supplied kind names against it.

use kube::{
	discovery::{verbs, ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tracing::instrument;

use super::ResourceScope;

/// API groups whose objects are never dumped.
const SKIPPED_GROUPS: &[&str] = &["metrics.k8s.io"];

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),
}

/// Discovered API resource with its scope.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
}

impl DiscoveredResource {
	/// Name in `kubectl api-resources` form: the plural, qualified by group
	/// for everything outside the core group.
	pub fn name(&self) -> String {
		let ar = &self.api_resource;
		if ar.group.is_empty() {
			ar.plural.clone()
		} else {
			format!("{}.{}", ar.plural, ar.group)
		}
	}

	fn matches(&self, ident: &str) -> bool {
		let ar = &self.api_resource;
		let kind = ar.kind.to_ascii_lowercase();
		if ar.plural.eq_ignore_ascii_case(ident) || kind == ident {
			return true;
		}
		match ident.split_once('.') {
			Some((name, group)) => {
				group == ar.group && (ar.plural.eq_ignore_ascii_case(name) || kind == name)
			}
			None => false,
		}
	}
}

/// Listable API resources of the preferred version of every group.
///
/// Resources are kept sorted by group then plural name, which is the order
/// `kubectl api-resources` prints them in.
#[derive(Debug, Clone, Default)]
pub struct ApiResourceCache {
	resources: Vec<DiscoveredResource>,
}

impl ApiResourceCache {
	/// Build the cache by querying the cluster's discovery API.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only 2 API calls,
	/// and falls back to per-group discovery for older clusters.
	#[instrument(skip_all)]
	pub async fn build(client: &Client) -> Result<Self, DiscoveryError> {
		match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				Ok(Self::from_discovery(&discovery))
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available");
				let discovery = Discovery::new(client.clone())
					.run()
					.await
					.map_err(DiscoveryError::FullDiscovery)?;
				Ok(Self::from_discovery(&discovery))
			}
		}
	}

	fn from_discovery(discovery: &Discovery) -> Self {
		let mut resources = Vec::new();

		for group in discovery.groups() {
			if SKIPPED_GROUPS.contains(&group.name()) {
				continue;
			}
			for (ar, caps) in group.recommended_resources() {
				if !caps.supports_operation(verbs::LIST) || !caps.supports_operation(verbs::GET) {
					tracing::trace!(resource = %ar.plural, group = %ar.group, "not listable, skipping");
					continue;
				}
				let scope = match caps.scope {
					Scope::Namespaced => ResourceScope::Namespaced,
					Scope::Cluster => ResourceScope::ClusterWide,
				};
				resources.push(DiscoveredResource {
					api_resource: ar,
					scope,
				});
			}
		}

		Self::from_resources(resources)
	}

	/// Build the cache from already discovered resources.
	pub fn from_resources(mut resources: Vec<DiscoveredResource>) -> Self {
		resources.sort_by(|a, b| {
			(&a.api_resource.group, &a.api_resource.plural)
				.cmp(&(&b.api_resource.group, &b.api_resource.plural))
		});
		Self { resources }
	}

	/// Resources of the given scope, in catalog order.
	pub fn kinds(&self, scope: ResourceScope) -> impl Iterator<Item = &DiscoveredResource> {
		self.resources.iter().filter(move |r| r.scope == scope)
	}

	/// Resolve a kind identifier such as `pods`, `Deployment`, `ingresses.networking.k8s.io`
	/// or `deployment.apps`.
	///
	/// Exact catalog names win over looser matches; among loose matches the
	/// core group sorts first.
	pub fn resolve(&self, ident: &str) -> Option<&DiscoveredResource> {
		let ident = ident.to_ascii_lowercase();
		self.resources
			.iter()
			.find(|r| r.name().eq_ignore_ascii_case(&ident))
			.or_else(|| self.resources.iter().find(|r| r.matches(&ident)))
	}
}

#[cfg(test)]
mod tests {
	use kube::core::GroupVersionKind;
	use rstest::rstest;

	use super::*;

	fn resource(group: &str, version: &str, kind: &str, plural: &str, scope: ResourceScope) -> DiscoveredResource {
		DiscoveredResource {
			api_resource: ApiResource::from_gvk_with_plural(
				&GroupVersionKind::gvk(group, version, kind),
				plural,
			),
			scope,
		}
	}

	fn cache() -> ApiResourceCache {
		ApiResourceCache::from_resources(vec![
			resource("networking.k8s.io", "v1", "Ingress", "ingresses", ResourceScope::Namespaced),
			resource("apps", "v1", "Deployment", "deployments", ResourceScope::Namespaced),
			resource("", "v1", "Pod", "pods", ResourceScope::Namespaced),
			resource("", "v1", "Event", "events", ResourceScope::Namespaced),
			resource("events.k8s.io", "v1", "Event", "events", ResourceScope::Namespaced),
			resource("", "v1", "Namespace", "namespaces", ResourceScope::ClusterWide),
			resource(
				"rbac.authorization.k8s.io",
				"v1",
				"ClusterRole",
				"clusterroles",
				ResourceScope::ClusterWide,
			),
		])
	}

	#[test]
	fn test_kinds_are_sorted_by_group_then_plural() {
		let cache = cache();
		let names: Vec<_> = cache.kinds(ResourceScope::Namespaced).map(DiscoveredResource::name).collect();
		assert_eq!(
			names,
			vec![
				"events",
				"pods",
				"deployments.apps",
				"events.events.k8s.io",
				"ingresses.networking.k8s.io",
			]
		);

		let names: Vec<_> = cache.kinds(ResourceScope::ClusterWide).map(DiscoveredResource::name).collect();
		assert_eq!(names, vec!["namespaces", "clusterroles.rbac.authorization.k8s.io"]);
	}

	#[rstest]
	#[case("pods", "", "pods")]
	#[case("pod", "", "pods")]
	#[case("Pod", "", "pods")]
	#[case("deployment", "apps", "deployments")]
	#[case("deployments.apps", "apps", "deployments")]
	#[case("deployment.apps", "apps", "deployments")]
	#[case("ingresses.networking.k8s.io", "networking.k8s.io", "ingresses")]
	#[case("events", "", "events")]
	#[case("events.events.k8s.io", "events.k8s.io", "events")]
	fn test_resolve(#[case] ident: &str, #[case] group: &str, #[case] plural: &str) {
		let cache = cache();
		let found = cache.resolve(ident).unwrap();
		assert_eq!(found.api_resource.group, group);
		assert_eq!(found.api_resource.plural, plural);
	}

	#[test]
	fn test_resolve_unknown() {
		assert!(cache().resolve("widgets").is_none());
		assert!(cache().resolve("pods.apps").is_none());
	}
}
