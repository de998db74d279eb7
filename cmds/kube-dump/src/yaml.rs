//! YAML serialization of sanitized manifests.
//!
//! Keys are sorted before serialization so that re-dumping an unchanged
//! object always yields the same bytes.

use serde_json::Value as JsonValue;

/// Error produced by the YAML serializer.
pub type YamlError = serde_saphyr::ser_error::Error;

/// Sort all JSON object keys recursively by code point, like `jq --sort-keys`.
pub fn sort_json_keys(value: JsonValue) -> JsonValue {
	match value {
		JsonValue::Object(map) => {
			let mut entries: Vec<(String, JsonValue)> = map.into_iter().collect();
			entries.sort_by(|(a, _), (b, _)| a.cmp(b));

			let sorted: serde_json::Map<String, JsonValue> = entries
				.into_iter()
				.map(|(k, v)| (k, sort_json_keys(v)))
				.collect();
			JsonValue::Object(sorted)
		}
		// Array order is meaningful, only the elements are sorted
		JsonValue::Array(arr) => JsonValue::Array(arr.into_iter().map(sort_json_keys).collect()),
		other => other,
	}
}

/// Serialize a JSON value to block-style YAML with sorted keys.
pub fn to_yaml(value: &JsonValue) -> Result<String, YamlError> {
	let sorted = sort_json_keys(value.clone());

	let options = serde_saphyr::SerializerOptions {
		indent_step: 2,
		indent_array: Some(0),
		prefer_block_scalars: true,
		empty_map_as_braces: true,
		empty_array_as_brackets: true,
		line_width: Some(80),
		scientific_notation_threshold: Some(1000000),
		scientific_notation_small_threshold: Some(0.0001),
		quote_ambiguous_keys: true,
		quote_numeric_strings: true,
		..Default::default()
	};

	let mut output = String::new();
	serde_saphyr::to_fmt_writer_with_options(&mut output, &sorted, options)?;
	Ok(output)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_sort_json_keys_recursive() {
		let value = json!({
			"spec": {"replicas": 1, "containers": [{"name": "a", "image": "b"}]},
			"apiVersion": "v1",
			"Kind": "x",
			"_private": true,
		});

		let sorted = sort_json_keys(value);
		let keys: Vec<_> = sorted.as_object().unwrap().keys().cloned().collect();
		assert_eq!(keys, vec!["Kind", "_private", "apiVersion", "spec"]);

		let spec_keys: Vec<_> = sorted["spec"].as_object().unwrap().keys().cloned().collect();
		assert_eq!(spec_keys, vec!["containers", "replicas"]);

		let container_keys: Vec<_> = sorted["spec"]["containers"][0]
			.as_object()
			.unwrap()
			.keys()
			.cloned()
			.collect();
		assert_eq!(container_keys, vec!["image", "name"]);
	}

	#[test]
	fn test_to_yaml_is_block_style_and_stable() {
		let a = json!({"metadata": {"name": "web", "labels": {"b": "2", "a": "1"}}, "kind": "ConfigMap"});
		let b = json!({"kind": "ConfigMap", "metadata": {"labels": {"a": "1", "b": "2"}, "name": "web"}});

		let yaml = to_yaml(&a).unwrap();
		assert_eq!(yaml, to_yaml(&b).unwrap());
		assert!(yaml.starts_with("kind: ConfigMap\n"));
		assert!(!yaml.contains('{'));
		let labels = yaml.find("labels:").unwrap();
		let name = yaml.find("name: web").unwrap();
		assert!(labels < name);
	}

	#[test]
	fn test_to_yaml_quotes_numeric_strings() {
		let yaml = to_yaml(&json!({"data": {"port": "8080"}})).unwrap();
		assert!(yaml.contains("port: \"8080\"") || yaml.contains("port: '8080'"));
	}
}
