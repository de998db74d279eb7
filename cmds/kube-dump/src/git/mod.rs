//! Version control capability used by the snapshot versioner.

pub mod cli;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use self::cli::GitCli;

#[derive(Debug, Error)]
pub enum VcsError {
	#[error("git is not available")]
	NotAvailable(#[source] xshell::Error),

	#[error("`{command}` failed")]
	Command {
		command: String,
		#[source]
		source: Box<dyn std::error::Error + Send + Sync>,
	},

	#[error("`{url}` is not an SSH remote")]
	NotSsh { url: String },

	#[error("updating {path}")]
	KnownHosts {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("cannot locate ~/.ssh: no home directory")]
	NoHomeDirectory,
}

/// Repository operations on a working tree.
///
/// Every call blocks until the underlying operation has finished.
pub trait VersionControl {
	fn ensure_available(&self) -> Result<(), VcsError>;

	fn is_repository(&self, dir: &Path) -> bool;

	/// Shallow (`--depth 1`) single-branch clone into `dir`.
	fn clone_shallow(&self, url: &str, branch: Option<&str>, dir: &Path) -> Result<(), VcsError>;

	fn init(&self, dir: &Path) -> Result<(), VcsError>;

	/// Symbolic name of HEAD, `None` when detached.
	fn current_branch(&self, dir: &Path) -> Result<Option<String>, VcsError>;

	fn checkout_or_create(&self, dir: &Path, branch: &str) -> Result<(), VcsError>;

	fn config_get(&self, dir: &Path, key: &str) -> Result<Option<String>, VcsError>;

	fn set_config(&self, dir: &Path, key: &str, value: &str) -> Result<(), VcsError>;

	fn status_is_dirty(&self, dir: &Path) -> Result<bool, VcsError>;

	fn add_all(&self, dir: &Path) -> Result<(), VcsError>;

	fn commit(&self, dir: &Path, message: &str) -> Result<(), VcsError>;

	fn remote_url(&self, dir: &Path, name: &str) -> Result<Option<String>, VcsError>;

	fn remote_add(&self, dir: &Path, name: &str, url: &str) -> Result<(), VcsError>;

	fn pull_ff_only(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), VcsError>;

	/// Push `branch`, setting it as upstream.
	fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), VcsError>;

	/// Trust-on-first-use registration of the remote's SSH host key.
	fn register_host_key(&self, url: &str) -> Result<(), VcsError>;
}
