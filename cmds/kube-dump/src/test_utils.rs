//! In-memory stand-ins for the cluster and git, shared by unit tests.

use std::{
	cell::RefCell,
	collections::{BTreeMap, HashMap, HashSet},
	io,
	path::Path,
};

use serde_json::Value;

use crate::{
	git::{VcsError, VersionControl},
	k8s::{ClusterApi, ClusterError, ResourceKind, ResourceScope},
};

type ObjectKey = (String, Option<String>, String);

/// Cluster backed by a fixed set of namespaces, kinds and objects.
#[derive(Debug, Default)]
pub struct FakeCluster {
	namespaces: Vec<String>,
	kinds: Vec<ResourceKind>,
	objects: BTreeMap<ObjectKey, Value>,
	failing_gets: HashSet<(String, String)>,
	calls: RefCell<Vec<&'static str>>,
}

impl FakeCluster {
	pub fn with_namespace(mut self, name: &str) -> Self {
		self.namespaces.push(name.to_string());
		self
	}

	pub fn with_kind(mut self, kind: ResourceKind) -> Self {
		self.kinds.push(kind);
		self
	}

	/// Register an object under `kind`; its name is read from `metadata.name`.
	pub fn with_object(mut self, kind: &str, namespace: Option<&str>, object: Value) -> Self {
		let name = object["metadata"]["name"]
			.as_str()
			.expect("object must have metadata.name")
			.to_string();
		self.objects
			.insert((kind.to_string(), namespace.map(str::to_string), name), object);
		self
	}

	pub fn with_failing_get(mut self, kind: &str, name: &str) -> Self {
		self.failing_gets.insert((kind.to_string(), name.to_string()));
		self
	}

	/// How many times `op` was called.
	pub fn calls(&self, op: &str) -> usize {
		self.calls.borrow().iter().filter(|c| **c == op).count()
	}

	fn record(&self, op: &'static str) {
		self.calls.borrow_mut().push(op);
	}

	fn lookup(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> Result<&Value, ClusterError> {
		let key = (kind.name.clone(), namespace.map(str::to_string), name.to_string());
		self.objects.get(&key).ok_or_else(|| ClusterError::NotFound {
			kind: kind.name.clone(),
			name: name.to_string(),
			namespace: namespace.map(str::to_string),
		})
	}
}

impl ClusterApi for FakeCluster {
	async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
		self.record("list_namespaces");
		Ok(self.namespaces.clone())
	}

	async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
		self.record("namespace_exists");
		Ok(self.namespaces.iter().any(|ns| ns == name))
	}

	async fn list_resource_kinds(&self, scope: ResourceScope) -> Result<Vec<ResourceKind>, ClusterError> {
		self.record("list_resource_kinds");
		Ok(self.kinds.iter().filter(|k| k.scope == scope).cloned().collect())
	}

	async fn list_instance_names(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
	) -> Result<Vec<String>, ClusterError> {
		self.record("list_instance_names");
		Ok(self
			.objects
			.keys()
			.filter(|(k, ns, _)| *k == kind.name && ns.as_deref() == namespace)
			.map(|(_, _, name)| name.clone())
			.collect())
	}

	async fn has_type(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
		name: &str,
		type_name: &str,
	) -> Result<bool, ClusterError> {
		self.record("has_type");
		let object = self.lookup(kind, namespace, name)?;
		Ok(object["type"].as_str() == Some(type_name))
	}

	async fn get_resource(
		&self,
		kind: &ResourceKind,
		namespace: Option<&str>,
		name: &str,
	) -> Result<Value, ClusterError> {
		self.record("get_resource");
		if self.failing_gets.contains(&(kind.name.clone(), name.to_string())) {
			return Err(ClusterError::NotFound {
				kind: kind.name.clone(),
				name: name.to_string(),
				namespace: namespace.map(str::to_string),
			});
		}
		self.lookup(kind, namespace, name).cloned()
	}
}

/// Version control that records calls instead of running git.
#[derive(Debug)]
pub struct FakeVcs {
	repository: RefCell<bool>,
	dirty: bool,
	branch: Option<String>,
	config: RefCell<HashMap<String, String>>,
	remotes: RefCell<HashMap<String, String>>,
	failing: HashSet<&'static str>,
	calls: RefCell<Vec<String>>,
}

impl Default for FakeVcs {
	fn default() -> Self {
		Self {
			repository: RefCell::new(false),
			dirty: false,
			branch: Some("master".to_string()),
			config: RefCell::default(),
			remotes: RefCell::default(),
			failing: HashSet::new(),
			calls: RefCell::default(),
		}
	}
}

impl FakeVcs {
	pub fn with_repository(self) -> Self {
		*self.repository.borrow_mut() = true;
		self
	}

	pub fn with_detached_head(mut self) -> Self {
		self.branch = None;
		self
	}

	pub fn with_dirty(mut self, dirty: bool) -> Self {
		self.dirty = dirty;
		self
	}

	pub fn with_config(self, key: &str, value: &str) -> Self {
		self.config
			.borrow_mut()
			.insert(key.to_string(), value.to_string());
		self
	}

	/// Make every call of `op` fail.
	pub fn failing(mut self, op: &'static str) -> Self {
		self.failing.insert(op);
		self
	}

	pub fn calls(&self) -> Vec<String> {
		self.calls.borrow().clone()
	}

	fn call(&self, op: &'static str, detail: Option<String>) -> Result<(), VcsError> {
		let entry = match detail {
			Some(detail) => format!("{op} {detail}"),
			None => op.to_string(),
		};
		self.calls.borrow_mut().push(entry);
		if self.failing.contains(op) {
			return Err(VcsError::Command {
				command: op.to_string(),
				source: Box::new(io::Error::other("simulated failure")),
			});
		}
		Ok(())
	}
}

impl VersionControl for FakeVcs {
	fn ensure_available(&self) -> Result<(), VcsError> {
		self.call("ensure_available", None)
	}

	fn is_repository(&self, _dir: &Path) -> bool {
		self.calls.borrow_mut().push("is_repository".to_string());
		*self.repository.borrow()
	}

	fn clone_shallow(&self, url: &str, _branch: Option<&str>, _dir: &Path) -> Result<(), VcsError> {
		self.call("clone_shallow", Some(url.to_string()))?;
		*self.repository.borrow_mut() = true;
		Ok(())
	}

	fn init(&self, _dir: &Path) -> Result<(), VcsError> {
		self.call("init", None)?;
		*self.repository.borrow_mut() = true;
		Ok(())
	}

	fn current_branch(&self, _dir: &Path) -> Result<Option<String>, VcsError> {
		self.call("current_branch", None)?;
		Ok(self.branch.clone())
	}

	fn checkout_or_create(&self, _dir: &Path, branch: &str) -> Result<(), VcsError> {
		self.call("checkout_or_create", Some(branch.to_string()))
	}

	fn config_get(&self, _dir: &Path, key: &str) -> Result<Option<String>, VcsError> {
		self.call("config_get", Some(key.to_string()))?;
		Ok(self.config.borrow().get(key).cloned())
	}

	fn set_config(&self, _dir: &Path, key: &str, value: &str) -> Result<(), VcsError> {
		self.call("set_config", Some(format!("{key}={value}")))?;
		self.config
			.borrow_mut()
			.insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn status_is_dirty(&self, _dir: &Path) -> Result<bool, VcsError> {
		self.call("status_is_dirty", None)?;
		Ok(self.dirty)
	}

	fn add_all(&self, _dir: &Path) -> Result<(), VcsError> {
		self.call("add_all", None)
	}

	fn commit(&self, _dir: &Path, message: &str) -> Result<(), VcsError> {
		self.call("commit", Some(message.to_string()))
	}

	fn remote_url(&self, _dir: &Path, name: &str) -> Result<Option<String>, VcsError> {
		self.call("remote_url", Some(name.to_string()))?;
		Ok(self.remotes.borrow().get(name).cloned())
	}

	fn remote_add(&self, _dir: &Path, name: &str, url: &str) -> Result<(), VcsError> {
		self.call("remote_add", Some(format!("{name} {url}")))?;
		self.remotes
			.borrow_mut()
			.insert(name.to_string(), url.to_string());
		Ok(())
	}

	fn pull_ff_only(&self, _dir: &Path, remote: &str, branch: &str) -> Result<(), VcsError> {
		self.call("pull_ff_only", Some(format!("{remote} {branch}")))
	}

	fn push(&self, _dir: &Path, remote: &str, branch: &str) -> Result<(), VcsError> {
		self.call("push", Some(format!("{remote} {branch}")))
	}

	fn register_host_key(&self, url: &str) -> Result<(), VcsError> {
		self.call("register_host_key", Some(url.to_string()))
	}
}
