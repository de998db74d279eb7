//! API path helpers for the mock server.

use crate::discovery::MockDiscovery;

/// Split a Kubernetes API path into (collection path, resource name).
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps/my-config` -> (`/api/v1/namespaces/default/configmaps`, `my-config`)
/// - `/api/v1/namespaces/my-ns` -> (`/api/v1/namespaces`, `my-ns`)
pub fn parse_resource_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	match path.rsplit_once('/') {
		Some((collection, name)) => (collection.to_string(), name.to_string()),
		None => (path.to_string(), String::new()),
	}
}

/// Cluster-wide form of a namespaced collection path.
///
/// `/apis/apps/v1/namespaces/default/deployments` -> `/apis/apps/v1/deployments`
pub fn cluster_wide_path(path: &str) -> Option<String> {
	let (before, after) = path.split_once("/namespaces/")?;
	let (_, resource) = after.split_once('/')?;
	Some(format!("{before}/{resource}"))
}

/// Group version and the segments following it.
///
/// `/api/v1/pods` -> (`v1`, [`pods`]), `/apis/apps/v1/deployments` -> (`apps/v1`, [`deployments`])
fn split_api_path(path: &str) -> Option<(String, Vec<&str>)> {
	let path = path.trim_end_matches('/');
	if let Some(rest) = path.strip_prefix("/api/v1") {
		let segments = rest.split('/').filter(|s| !s.is_empty()).collect();
		return Some(("v1".to_string(), segments));
	}
	let rest = path.strip_prefix("/apis/")?;
	let mut segments = rest.split('/');
	let group = segments.next()?;
	let version = segments.next()?;
	Some((format!("{group}/{version}"), segments.collect()))
}

/// Whether `path` addresses a collection known to discovery, i.e. a LIST request.
pub fn is_collection(path: &str, discovery: &MockDiscovery) -> bool {
	let Some((group_version, segments)) = split_api_path(path) else {
		return false;
	};
	match segments.as_slice() {
		[plural] => discovery.find(&group_version, plural).is_some(),
		["namespaces", _, plural] => discovery
			.find(&group_version, plural)
			.is_some_and(|r| r.namespaced),
		_ => false,
	}
}

/// Whether a manifest satisfies a `fieldSelector` of `key=value` terms.
///
/// Keys are dotted paths into the manifest (`metadata.name`, `type`).
/// `!=` terms are not supported and never match.
pub fn matches_field_selector(manifest: &serde_json::Value, selector: &str) -> bool {
	selector
		.split(',')
		.filter(|term| !term.is_empty())
		.all(|term| {
			let Some((key, expected)) = term.split_once('=') else {
				return false;
			};
			if key.ends_with('!') {
				return false;
			}
			let expected = expected.strip_prefix('=').unwrap_or(expected);
			key.split('.')
				.try_fold(manifest, |value, segment| value.get(segment))
				.and_then(serde_json::Value::as_str)
				== Some(expected)
		})
}

/// Collection path a manifest is served under.
pub fn collection_path(manifest: &serde_json::Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let metadata = manifest.get("metadata")?;
	let name = metadata.get("name")?.as_str()?.to_string();
	let resource = discovery.find_kind(api_version, kind)?;

	let prefix = if api_version.contains('/') {
		format!("/apis/{api_version}")
	} else {
		format!("/api/{api_version}")
	};
	let path = if resource.namespaced {
		let namespace = metadata
			.get("namespace")
			.and_then(|n| n.as_str())
			.unwrap_or("default");
		format!("{prefix}/namespaces/{namespace}/{}", resource.name)
	} else {
		format!("{prefix}/{}", resource.name)
	};
	Some((path, name))
}
