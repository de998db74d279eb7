//! HTTP-based read-only mock Kubernetes server using wiremock.
//!
//! Serves a real HTTP endpoint so clients can connect through a generated
//! kubeconfig.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use bon::Builder;
use kube::config::{AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{DiscoveryMode, MockApiResource, MockDiscovery},
	helpers::{cluster_wide_path, collection_path, is_collection, matches_field_selector, parse_resource_path},
};

/// Objects keyed by (collection path, name).
type ResourceMap = BTreeMap<(String, String), serde_json::Value>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// Namespaces that exist. `default` when empty.
	#[builder(default)]
	namespaces: Vec<String>,
	/// Resources to serve as raw manifests. API paths are derived from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<serde_json::Value>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let discovery = MockDiscovery::default();

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources = ResourceMap::new();
		let namespaces = if self.namespaces.is_empty() {
			vec!["default".to_string()]
		} else {
			self.namespaces
		};
		for namespace in namespaces {
			let manifest = serde_json::json!({
				"apiVersion": "v1",
				"kind": "Namespace",
				"metadata": {"name": namespace},
			});
			resources.insert(("/api/v1/namespaces".to_string(), namespace), manifest);
		}
		for manifest in self.resources {
			if let Some(key) = collection_path(&manifest, &discovery) {
				trace!(collection = %key.0, name = %key.1, "Registered resource");
				resources.insert(key, manifest);
			}
		}

		mount_version(&server).await;
		mount_discovery(&server, &discovery, self.discovery_mode).await;
		mount_resources(&server, Arc::new(resources), Arc::new(discovery)).await;

		RunningHttpMockK8sServer { server }
	}
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// Paths, with query strings, of every request received so far.
	pub async fn received_paths(&self) -> Vec<String> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.map(|req| match req.url.query().filter(|q| !q.is_empty()) {
				Some(query) => format!("{}?{query}", req.url.path()),
				None => req.url.path().to_string(),
			})
			.collect()
	}

	/// Write [`Self::kubeconfig`] to `path`.
	///
	/// JSON is valid YAML, so the file loads like any other kubeconfig.
	pub fn write_kubeconfig(&self, path: &Path) -> std::io::Result<()> {
		let content = serde_json::to_vec_pretty(&self.kubeconfig()).map_err(std::io::Error::other)?;
		std::fs::write(path, content)
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn scope(namespaced: bool) -> &'static str {
	if namespaced {
		"Namespaced"
	} else {
		"Cluster"
	}
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	let core_aggregated_resources: Vec<_> = discovery
		.core_resources
		.iter()
		.map(|r| {
			serde_json::json!({
				"resource": r.name,
				"responseKind": {
					"group": "",
					"version": "v1",
					"kind": r.kind
				},
				"scope": scope(r.namespaced),
				"verbs": r.verbs,
			})
		})
		.collect();

	let aggregated_core_body = serde_json::json!({
		"kind": "APIGroupDiscoveryList",
		"apiVersion": "apidiscovery.k8s.io/v2",
		"items": [{
			"metadata": {
				"name": ""
			},
			"versions": [{
				"version": "v1",
				"resources": core_aggregated_resources,
				"freshness": "Current"
			}]
		}]
	});

	let aggregated_groups: Vec<_> = discovery
		.group_resources
		.iter()
		.map(|(gv, rs)| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			let resources: Vec<_> = rs
				.iter()
				.map(|r| {
					serde_json::json!({
						"resource": r.name,
						"responseKind": {
							"group": group,
							"version": version,
							"kind": r.kind
						},
						"scope": scope(r.namespaced),
						"verbs": r.verbs,
					})
				})
				.collect();

			serde_json::json!({
				"metadata": {
					"name": group
				},
				"versions": [{
					"version": version,
					"resources": resources,
					"freshness": "Current"
				}]
			})
		})
		.collect();

	let aggregated_apis_body = serde_json::json!({
		"kind": "APIGroupDiscoveryList",
		"apiVersion": "apidiscovery.k8s.io/v2",
		"items": aggregated_groups
	});

	// Aggregated responses must carry this content type to be recognized
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	match mode {
		DiscoveryMode::Aggregated => {
			// set_body_json would overwrite the content type
			let core_body = serde_json::to_vec(&aggregated_core_body)
				.expect("serializing discovery JSON should never fail");
			let apis_body = serde_json::to_vec(&aggregated_apis_body)
				.expect("serializing discovery JSON should never fail");

			Mock::given(method("GET"))
				.and(path("/api"))
				.and(header_regex("accept", "apidiscovery"))
				.respond_with(
					ResponseTemplate::new(200)
						.set_body_raw(core_body, AGGREGATED_DISCOVERY_CONTENT_TYPE),
				)
				.mount(server)
				.await;

			Mock::given(method("GET"))
				.and(path("/apis"))
				.and(header_regex("accept", "apidiscovery"))
				.respond_with(
					ResponseTemplate::new(200)
						.set_body_raw(apis_body, AGGREGATED_DISCOVERY_CONTENT_TYPE),
				)
				.mount(server)
				.await;
		}
		DiscoveryMode::Legacy => {
			for endpoint in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(406))
					.mount(server)
					.await;
			}
		}
	}

	// Legacy discovery endpoints
	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			serde_json::json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	let resource_list = |group_version: &str, resources: &[MockApiResource]| {
		let resources: Vec<_> = resources
			.iter()
			.map(|r| {
				serde_json::json!({
					"name": r.name,
					"singularName": "",
					"namespaced": r.namespaced,
					"kind": r.kind,
					"verbs": r.verbs,
				})
			})
			.collect();
		serde_json::json!({
			"kind": "APIResourceList",
			"apiVersion": "v1",
			"groupVersion": group_version,
			"resources": resources
		})
	};

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(ResponseTemplate::new(200).set_body_json(resource_list("v1", &discovery.core_resources)))
		.mount(server)
		.await;

	for (gv, rs) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{gv}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(resource_list(gv, rs)))
			.mount(server)
			.await;
	}
}

fn list_body(items: Vec<serde_json::Value>) -> serde_json::Value {
	serde_json::json!({
		"kind": "List",
		"apiVersion": "v1",
		"metadata": {"resourceVersion": "1"},
		"items": items
	})
}

fn not_found(name: &str) -> ResponseTemplate {
	ResponseTemplate::new(404).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": format!("\"{name}\" not found"),
		"reason": "NotFound",
		"code": 404
	}))
}

/// GET of single objects and collections, namespaced or cluster-wide.
async fn mount_resources(server: &MockServer, resources: Arc<ResourceMap>, discovery: Arc<MockDiscovery>) {
	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let path_str = req.url.path().trim_end_matches('/');

			let (collection, name) = parse_resource_path(path_str);
			if let Some(resource) = resources.get(&(collection, name.clone())) {
				return ResponseTemplate::new(200).set_body_json(resource.clone());
			}

			if !is_collection(path_str, &discovery) {
				return not_found(&name);
			}

			let selector = req
				.url
				.query_pairs()
				.find(|(key, _)| key == "fieldSelector")
				.map(|(_, value)| value.into_owned());
			let items = resources
				.iter()
				.filter(|((collection, _), _)| {
					collection == path_str || cluster_wide_path(collection).as_deref() == Some(path_str)
				})
				.filter(|(_, v)| selector.as_deref().is_none_or(|s| matches_field_selector(v, s)))
				.map(|(_, v)| v.clone())
				.collect();
			ResponseTemplate::new(200).set_body_json(list_body(items))
		})
		.mount(server)
		.await;
}
