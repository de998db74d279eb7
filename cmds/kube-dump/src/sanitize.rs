//! Removal of server-assigned fields so dumped manifests can be re-applied.

use serde_json::Value;
use thiserror::Error;

use crate::{
	k8s::ResourceScope,
	yaml::{self, YamlError},
};

#[derive(Debug, Error)]
pub enum SanitizeError {
	#[error("resource is not a JSON object")]
	NotAnObject,

	#[error("rendering YAML")]
	Yaml(#[source] YamlError),
}

/// A single field deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
	/// Key under `.metadata.annotations`.
	Annotation(&'static str),
	/// Key under `.metadata`.
	Metadata(&'static str),
	/// Key under `.spec`.
	Spec(&'static str),
	/// The whole `.status` subtree.
	Status,
}

const NAMESPACED_REMOVALS: &[Field] = &[
	Field::Annotation("kubectl.kubernetes.io/last-applied-configuration"),
	Field::Annotation("control-plane.alpha.kubernetes.io/leader"),
	Field::Annotation("autoscaling.alpha.kubernetes.io/conditions"),
	Field::Annotation("autoscaling.alpha.kubernetes.io/current-metrics"),
	Field::Annotation("deployment.kubernetes.io/revision"),
	Field::Annotation("kubectl.kubernetes.io/restartedAt"),
	Field::Annotation("kubernetes.io/service-account.uid"),
	Field::Annotation("pv.kubernetes.io/bind-completed"),
	Field::Annotation("pv.kubernetes.io/bound-by-controller"),
	Field::Metadata("uid"),
	Field::Metadata("resourceVersion"),
	Field::Metadata("selfLink"),
	Field::Metadata("generation"),
	Field::Metadata("creationTimestamp"),
	Field::Metadata("managedFields"),
	Field::Metadata("finalizers"),
	Field::Spec("clusterIP"),
	Field::Spec("progressDeadlineSeconds"),
	Field::Spec("revisionHistoryLimit"),
	Field::Spec("volumeName"),
	Field::Spec("volumeMode"),
	Field::Status,
];

const CLUSTER_REMOVALS: &[Field] = &[
	Field::Annotation("kubectl.kubernetes.io/last-applied-configuration"),
	Field::Annotation("control-plane.alpha.kubernetes.io/leader"),
	Field::Metadata("uid"),
	Field::Metadata("selfLink"),
	Field::Metadata("resourceVersion"),
	Field::Metadata("creationTimestamp"),
	Field::Metadata("generation"),
];

/// Ordered list of field deletions for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestFilter {
	removals: &'static [Field],
}

impl ManifestFilter {
	/// Filter for `scope`. Detailed mode keeps namespaced objects intact;
	/// cluster-scoped objects are always filtered.
	pub fn for_scope(scope: ResourceScope, detailed: bool) -> Self {
		let removals: &'static [Field] = match scope {
			ResourceScope::Namespaced if detailed => &[],
			ResourceScope::Namespaced => NAMESPACED_REMOVALS,
			ResourceScope::ClusterWide => CLUSTER_REMOVALS,
		};
		Self { removals }
	}

	pub fn is_identity(&self) -> bool {
		self.removals.is_empty()
	}

	/// Apply every deletion in order. Missing fields are ignored.
	pub fn apply(&self, value: &mut Value) {
		if self.is_identity() {
			return;
		}
		let Some(object) = value.as_object_mut() else {
			return;
		};

		for field in self.removals {
			match field {
				Field::Annotation(key) => {
					if let Some(annotations) = object
						.get_mut("metadata")
						.and_then(|m| m.get_mut("annotations"))
						.and_then(Value::as_object_mut)
					{
						annotations.remove(*key);
					}
				}
				Field::Metadata(key) => {
					if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
						metadata.remove(*key);
					}
				}
				Field::Spec(key) => {
					if let Some(spec) = object.get_mut("spec").and_then(Value::as_object_mut) {
						spec.remove(*key);
					}
				}
				Field::Status => {
					object.remove("status");
				}
			}
		}

		if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
			let emptied = metadata
				.get("annotations")
				.and_then(Value::as_object)
				.is_some_and(serde_json::Map::is_empty);
			if emptied {
				metadata.remove("annotations");
			}
		}
	}
}

/// Filter a fetched object and render it as YAML.
pub fn sanitize(mut value: Value, filter: ManifestFilter) -> Result<String, SanitizeError> {
	if !value.is_object() {
		return Err(SanitizeError::NotAnObject);
	}
	filter.apply(&mut value);
	yaml::to_yaml(&value).map_err(SanitizeError::Yaml)
}
