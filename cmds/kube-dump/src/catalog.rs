//! Namespaces and resource kinds a run will dump.

use tracing::instrument;

use crate::{
	config::DumpMode,
	k8s::{ClusterApi, ClusterError, ResourceKind, ResourceScope},
};

/// User-supplied replacements for discovery.
///
/// `None` means "discover". An empty kind list skips that scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogOverrides {
	pub namespaces: Option<Vec<String>>,
	pub namespaced_kinds: Option<Vec<String>>,
	pub cluster_kinds: Option<Vec<String>>,
}

/// Working set of a run, fixed before the first instance is fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceCatalog {
	pub namespaces: Vec<String>,
	pub namespaced_kinds: Vec<ResourceKind>,
	pub cluster_kinds: Vec<ResourceKind>,
	/// Requested namespaces that do not exist in the cluster.
	pub missing_namespaces: Vec<String>,
}

impl ResourceCatalog {
	/// Resolve the catalog, querying the cluster only for what `mode` dumps
	/// and the overrides leave open.
	#[instrument(skip_all, fields(mode = ?mode))]
	pub async fn resolve<C: ClusterApi>(
		cluster: &C,
		overrides: &CatalogOverrides,
		mode: DumpMode,
	) -> Result<Self, ClusterError> {
		let mut catalog = Self::default();

		if mode.includes(ResourceScope::Namespaced) {
			match &overrides.namespaces {
				Some(requested) => {
					for namespace in requested {
						if cluster.namespace_exists(namespace).await? {
							catalog.namespaces.push(namespace.clone());
						} else {
							tracing::warn!(namespace = %namespace, "namespace not found, skipping");
							catalog.missing_namespaces.push(namespace.clone());
						}
					}
				}
				None => catalog.namespaces = cluster.list_namespaces().await?,
			}

			catalog.namespaced_kinds =
				resolve_kinds(cluster, overrides.namespaced_kinds.as_deref(), ResourceScope::Namespaced).await?;
		}

		if mode.includes(ResourceScope::ClusterWide) {
			catalog.cluster_kinds =
				resolve_kinds(cluster, overrides.cluster_kinds.as_deref(), ResourceScope::ClusterWide).await?;
		}

		tracing::info!(
			namespaces = catalog.namespaces.len(),
			namespaced_kinds = catalog.namespaced_kinds.len(),
			cluster_kinds = catalog.cluster_kinds.len(),
			"resolved resource catalog"
		);
		Ok(catalog)
	}
}

async fn resolve_kinds<C: ClusterApi>(
	cluster: &C,
	requested: Option<&[String]>,
	scope: ResourceScope,
) -> Result<Vec<ResourceKind>, ClusterError> {
	match requested {
		Some(names) => Ok(names
			.iter()
			.map(|name| ResourceKind {
				name: name.clone(),
				scope,
			})
			.collect()),
		None => cluster.list_resource_kinds(scope).await,
	}
}
