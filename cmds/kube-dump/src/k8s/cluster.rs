//! [`ClusterApi`] over a live kube client.

use k8s_openapi::api::core::v1::Namespace;
use kube::{
	api::{Api, DynamicObject, ListParams},
	Client,
};
use serde_json::Value;
use tracing::instrument;

use super::{
	client::ClusterConnection,
	discovery::{ApiResourceCache, DiscoveredResource},
	ClusterApi, ClusterError, ResourceKind, ResourceScope,
};

/// Read-only view of a cluster backed by the discovery cache.
#[derive(Clone)]
pub struct KubeCluster {
	client: Client,
	api_cache: ApiResourceCache,
}

impl KubeCluster {
	/// Run discovery once and keep the result for the whole run.
	#[instrument(skip_all)]
	pub async fn discover(connection: &ClusterConnection) -> Result<Self, ClusterError> {
		let client = connection.client().clone();
		let api_cache = ApiResourceCache::build(&client)
			.await
			.map_err(ClusterError::Discovery)?;
		tracing::debug!(
			namespaced = api_cache.kinds(ResourceScope::Namespaced).count(),
			cluster = api_cache.kinds(ResourceScope::ClusterWide).count(),
			"built API resource catalog"
		);
		Ok(Self { client, api_cache })
	}

	fn lookup(&self, kind: &ResourceKind) -> Result<&DiscoveredResource, ClusterError> {
		self.api_cache
			.resolve(&kind.name)
			.ok_or_else(|| ClusterError::UnknownKind(kind.name.clone()))
	}

	/// Create a dynamic API for the given resource.
	fn dynamic_api(
		&self,
		ar: &kube::discovery::ApiResource,
		namespace: Option<&str>,
	) -> Api<DynamicObject> {
		match namespace {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
			None => Api::all_with(self.client.clone(), ar),
		}
	}

	async fn fetch(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
		name: &str,
	) -> Result<(DynamicObject, &DiscoveredResource), ClusterError> {
		let discovered = self.lookup(kind)?;
		let api = self.dynamic_api(&discovered.api_resource, namespace);

		let object = api
			.get_opt(name)
			.await
			.map_err(|e| ClusterError::Get {
				kind: kind.name.clone(),
				name: name.to_string(),
				namespace: namespace.map(str::to_string),
				source: Box::new(e),
			})?
			.ok_or_else(|| ClusterError::NotFound {
				kind: kind.name.clone(),
				name: name.to_string(),
				namespace: namespace.map(str::to_string),
			})?;
		Ok((object, discovered))
	}
}

impl ClusterApi for KubeCluster {
	#[instrument(skip(self))]
	async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
		let api: Api<Namespace> = Api::all(self.client.clone());
		let list = api
			.list_metadata(&ListParams::default())
			.await
			.map_err(|e| ClusterError::ListNamespaces(Box::new(e)))?;
		Ok(list
			.items
			.into_iter()
			.filter_map(|ns| ns.metadata.name)
			.collect())
	}

	/// Check if a namespace exists.
	#[instrument(skip(self))]
	async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
		let api: Api<Namespace> = Api::all(self.client.clone());
		match api
			.get_opt(name)
			.await
			.map_err(|e| ClusterError::NamespaceCheck {
				namespace: name.to_string(),
				source: Box::new(e),
			})? {
			Some(_) => Ok(true),
			None => Ok(false),
		}
	}

	async fn list_resource_kinds(
		&self,
		scope: ResourceScope,
	) -> Result<Vec<ResourceKind>, ClusterError> {
		Ok(self
			.api_cache
			.kinds(scope)
			.map(|r| ResourceKind {
				name: r.name(),
				scope,
			})
			.collect())
	}

	#[instrument(skip(self), fields(kind = %kind))]
	async fn list_instance_names(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
	) -> Result<Vec<String>, ClusterError> {
		let discovered = self.lookup(kind)?;
		let api = self.dynamic_api(&discovered.api_resource, namespace);
		let list = api
			.list_metadata(&ListParams::default())
			.await
			.map_err(|e| ClusterError::List {
				kind: kind.name.clone(),
				namespace: namespace.map(str::to_string),
				source: Box::new(e),
			})?;

		let mut names: Vec<String> = list
			.items
			.into_iter()
			.filter_map(|item| item.metadata.name)
			.collect();
		names.sort();
		Ok(names)
	}

	#[instrument(skip(self), fields(kind = %kind))]
	async fn has_type(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
		name: &str,
		type_name: &str,
	) -> Result<bool, ClusterError> {
		let discovered = self.lookup(kind)?;
		let api = self.dynamic_api(&discovered.api_resource, namespace);
		let params = ListParams::default().fields(&format!("metadata.name={name},type={type_name}"));
		let list = api
			.list_metadata(&params)
			.await
			.map_err(|e| ClusterError::Get {
				kind: kind.name.clone(),
				name: name.to_string(),
				namespace: namespace.map(str::to_string),
				source: Box::new(e),
			})?;
		Ok(!list.items.is_empty())
	}

	#[instrument(skip(self), fields(kind = %kind))]
	async fn get_resource(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
		name: &str,
	) -> Result<Value, ClusterError> {
		let (object, discovered) = self.fetch(kind, namespace, name).await?;
		let mut value = serde_json::to_value(&object).map_err(|source| ClusterError::Serialize {
			kind: kind.name.clone(),
			name: name.to_string(),
			source,
		})?;

		// Individual GETs normally carry type information, fill it in if not
		if let Value::Object(map) = &mut value {
			let ar = &discovered.api_resource;
			map.entry("apiVersion")
				.or_insert_with(|| Value::String(ar.api_version.clone()));
			map.entry("kind")
				.or_insert_with(|| Value::String(ar.kind.clone()));
		}
		Ok(value)
	}
}
