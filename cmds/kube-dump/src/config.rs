//! Resolved run configuration.
//!
//! Command-line flags and their environment variables are folded into a
//! single [`DumpConfig`] before anything touches the cluster.

use std::{fmt, path::PathBuf, time::Duration};

use clap::ValueEnum;

use crate::{
	archive::Compression,
	catalog::CatalogOverrides,
	dump::OutputLayout,
	k8s::{client::ConnectionSettings, ResourceScope},
};

/// Delay before force-remove deletes previous output.
pub const DEFAULT_FORCE_REMOVE_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_REMOTE_NAME: &str = "origin";

/// Which scopes a run dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DumpMode {
	/// Namespaced and cluster-scoped resources.
	#[default]
	#[value(name = "all", alias = "dump")]
	All,

	/// Namespaced resources only.
	#[value(name = "ns", alias = "dump-namespaces")]
	Namespaces,

	/// Cluster-scoped resources only.
	#[value(name = "cls", alias = "dump-cluster")]
	Cluster,
}

impl DumpMode {
	pub fn includes(self, scope: ResourceScope) -> bool {
		matches!(
			(self, scope),
			(DumpMode::All, _)
				| (DumpMode::Namespaces, ResourceScope::Namespaced)
				| (DumpMode::Cluster, ResourceScope::ClusterWide)
		)
	}
}

impl fmt::Display for DumpMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DumpMode::All => write!(f, "all"),
			DumpMode::Namespaces => write!(f, "ns"),
			DumpMode::Cluster => write!(f, "cls"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSettings {
	pub commit: bool,
	pub push: bool,
	pub branch: Option<String>,
	pub commit_user: Option<String>,
	pub commit_email: Option<String>,
	pub remote_name: String,
	pub remote_url: Option<String>,
}

impl Default for GitSettings {
	fn default() -> Self {
		Self {
			commit: false,
			push: false,
			branch: None,
			commit_user: None,
			commit_email: None,
			remote_name: DEFAULT_REMOTE_NAME.to_string(),
			remote_url: None,
		}
	}
}

impl GitSettings {
	/// Whether any git operation will run.
	pub fn enabled(&self) -> bool {
		self.commit || self.push
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSettings {
	pub enabled: bool,
	pub compression: Compression,
	/// Archives older than this many days are deleted after archiving.
	pub rotate_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifySettings {
	pub cluster_name: Option<String>,
	pub webhook_url: Option<String>,
	pub channel: Option<String>,
}

/// Everything a run needs, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpConfig {
	pub destination: PathBuf,
	pub mode: DumpMode,
	/// Delay before removing previous output; `None` keeps it.
	pub force_remove: Option<Duration>,
	pub detailed: bool,
	pub layout: OutputLayout,
	pub overrides: CatalogOverrides,
	pub connection: ConnectionSettings,
	pub git: GitSettings,
	pub archive: ArchiveSettings,
	pub notify: NotifySettings,
}

impl DumpConfig {
	pub fn new(destination: impl Into<PathBuf>) -> Self {
		Self {
			destination: destination.into(),
			mode: DumpMode::default(),
			force_remove: None,
			detailed: false,
			layout: OutputLayout::default(),
			overrides: CatalogOverrides::default(),
			connection: ConnectionSettings::default(),
			git: GitSettings::default(),
			archive: ArchiveSettings::default(),
			notify: NotifySettings::default(),
		}
	}
}

/// Split a comma-separated list, trimming entries and dropping blanks and
/// duplicates while keeping first-seen order.
///
/// `None` stays `None` (discover); an explicit but empty value yields an
/// empty list.
pub fn parse_list(value: Option<&str>) -> Option<Vec<String>> {
	let value = value?;
	let mut items: Vec<String> = Vec::new();
	for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
		if !items.iter().any(|existing| existing == item) {
			items.push(item.to_string());
		}
	}
	Some(items)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case(None, None)]
	#[case(Some(""), Some(vec![]))]
	#[case(Some("default"), Some(vec!["default"]))]
	#[case(Some(" kube-system, default ,,kube-system"), Some(vec!["kube-system", "default"]))]
	fn test_parse_list(#[case] value: Option<&str>, #[case] expected: Option<Vec<&str>>) {
		let expected = expected.map(|v| v.into_iter().map(str::to_string).collect::<Vec<_>>());
		assert_eq!(parse_list(value), expected);
	}

	#[rstest]
	#[case(DumpMode::All, true, true)]
	#[case(DumpMode::Namespaces, true, false)]
	#[case(DumpMode::Cluster, false, true)]
	fn test_mode_scopes(#[case] mode: DumpMode, #[case] namespaced: bool, #[case] cluster: bool) {
		assert_eq!(mode.includes(ResourceScope::Namespaced), namespaced);
		assert_eq!(mode.includes(ResourceScope::ClusterWide), cluster);
	}

	#[rstest]
	#[case("all", DumpMode::All)]
	#[case("dump", DumpMode::All)]
	#[case("ns", DumpMode::Namespaces)]
	#[case("dump-namespaces", DumpMode::Namespaces)]
	#[case("cls", DumpMode::Cluster)]
	#[case("dump-cluster", DumpMode::Cluster)]
	fn test_mode_aliases(#[case] name: &str, #[case] expected: DumpMode) {
		assert_eq!(DumpMode::from_str(name, false).unwrap(), expected);
	}

	#[test]
	fn test_git_defaults() {
		let git = GitSettings::default();
		assert_eq!(git.remote_name, "origin");
		assert!(!git.enabled());
	}
}
