//! Turns the dump directory into a commit history.

use std::{
	fs,
	path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::instrument;

use crate::{
	archive::ARCHIVE_SUFFIXES,
	config::GitSettings,
	git::{VcsError, VersionControl},
};

/// Author name used when neither the flags nor git config provide one.
pub const DEFAULT_AUTHOR: &str = "kube-dump";

#[derive(Debug, Error)]
pub enum SnapshotError {
	#[error(transparent)]
	Vcs(#[from] VcsError),

	#[error("updating {path}")]
	Gitignore {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("pushing {branch} to {remote}")]
	Push {
		remote: String,
		branch: String,
		#[source]
		source: VcsError,
	},
}

/// Result of the commit step. `branch` is `None` on a detached HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
	Committed { branch: Option<String> },
	/// The dump did not change anything since the last commit.
	NoChanges { branch: Option<String> },
}

impl CommitOutcome {
	pub fn branch(&self) -> Option<&str> {
		match self {
			CommitOutcome::Committed { branch } | CommitOutcome::NoChanges { branch } => branch.as_deref(),
		}
	}
}

/// Versioning of one destination directory.
pub struct SnapshotVersioner<'a, V> {
	vcs: &'a V,
	dir: &'a Path,
	settings: &'a GitSettings,
	/// Active context name, used for the default email and the commit message.
	context: &'a str,
}

impl<'a, V: VersionControl> SnapshotVersioner<'a, V> {
	pub fn new(vcs: &'a V, dir: &'a Path, settings: &'a GitSettings, context: &'a str) -> Self {
		Self {
			vcs,
			dir,
			settings,
			context,
		}
	}

	/// Seed the destination from the remote before dumping.
	///
	/// Only done when pushing and no repository exists yet. Failures leave
	/// the destination untouched and the run continues.
	#[instrument(skip_all)]
	pub fn prepare(&self) {
		if !self.settings.push || self.vcs.is_repository(self.dir) {
			return;
		}
		let Some(url) = self.settings.remote_url.as_deref() else {
			return;
		};

		self.trust_host(url);
		match self
			.vcs
			.clone_shallow(url, self.settings.branch.as_deref(), self.dir)
		{
			Ok(()) => tracing::info!(url, dir = %self.dir.display(), "cloned snapshot repository"),
			Err(e) => tracing::warn!(url, error = %e, "cannot clone snapshot repository, starting fresh"),
		}
	}

	fn trust_host(&self, url: &str) {
		if let Err(e) = self.vcs.register_host_key(url) {
			match e {
				VcsError::NotSsh { .. } => {}
				e => tracing::warn!(url, error = %e, "cannot register SSH host key"),
			}
		}
	}

	/// Record the current tree as a commit.
	#[instrument(skip(self))]
	pub fn commit(&self, timestamp: &str) -> Result<CommitOutcome, SnapshotError> {
		if !self.vcs.is_repository(self.dir) {
			self.vcs.init(self.dir)?;
			tracing::info!(dir = %self.dir.display(), "initialized repository");
		}

		let branch = self.resolve_branch()?;
		self.ensure_identity()?;
		ensure_gitignore(self.dir)?;

		self.vcs.add_all(self.dir)?;
		if !self.vcs.status_is_dirty(self.dir)? {
			tracing::info!(branch = branch.as_deref(), "no changes to commit");
			return Ok(CommitOutcome::NoChanges { branch });
		}

		let message = commit_message(self.context, timestamp);
		self.vcs.commit(self.dir, &message)?;
		tracing::info!(branch = branch.as_deref(), "committed snapshot");
		Ok(CommitOutcome::Committed { branch })
	}

	fn resolve_branch(&self) -> Result<Option<String>, SnapshotError> {
		let current = self.vcs.current_branch(self.dir)?;
		let Some(requested) = self.settings.branch.as_deref() else {
			return Ok(current);
		};

		if current.as_deref() != Some(requested) {
			if let Err(e) = self.vcs.checkout_or_create(self.dir, requested) {
				tracing::warn!(branch = requested, error = %e, "cannot switch branch");
			}
		}
		Ok(Some(requested.to_string()))
	}

	fn ensure_identity(&self) -> Result<(), SnapshotError> {
		let identity = [
			("user.name", self.settings.commit_user.as_deref(), DEFAULT_AUTHOR),
			("user.email", self.settings.commit_email.as_deref(), self.context),
		];
		for (key, explicit, fallback) in identity {
			match explicit {
				Some(value) => self.vcs.set_config(self.dir, key, value)?,
				None => {
					if self.vcs.config_get(self.dir, key)?.is_none() {
						self.vcs.set_config(self.dir, key, fallback)?;
					}
				}
			}
		}
		Ok(())
	}

	/// Publish the committed branch.
	///
	/// Registering the remote and pulling are best effort, the push itself
	/// is not. A detached HEAD has no branch to publish and is left local.
	#[instrument(skip(self))]
	pub fn push(&self, branch: Option<&str>) -> Result<(), SnapshotError> {
		let remote = self.settings.remote_name.as_str();
		let Some(branch) = branch else {
			tracing::warn!(remote, "HEAD is detached, skipping push; set --git-branch to publish");
			return Ok(());
		};

		if let Some(url) = self.settings.remote_url.as_deref() {
			match self.vcs.remote_url(self.dir, remote) {
				Ok(Some(_)) => {}
				Ok(None) => {
					if let Err(e) = self.vcs.remote_add(self.dir, remote, url) {
						tracing::warn!(remote, error = %e, "cannot add remote");
					}
				}
				Err(e) => tracing::warn!(remote, error = %e, "cannot read remote"),
			}
			self.trust_host(url);
		}

		if let Err(e) = self.vcs.pull_ff_only(self.dir, remote, branch) {
			tracing::debug!(remote, branch, error = %e, "pull skipped");
		}

		self.vcs
			.push(self.dir, remote, branch)
			.map_err(|source| SnapshotError::Push {
				remote: remote.to_string(),
				branch: branch.to_string(),
				source,
			})?;
		tracing::info!(remote, branch, "pushed snapshot");
		Ok(())
	}
}

pub fn commit_message(context: &str, timestamp: &str) -> String {
	format!("kube-dump of {context} at {timestamp}")
}

/// Make sure `.gitignore` excludes archives produced next to the dump.
pub fn ensure_gitignore(dir: &Path) -> Result<(), SnapshotError> {
	let path = dir.join(".gitignore");
	let to_err = |source: std::io::Error| SnapshotError::Gitignore {
		path: path.clone(),
		source,
	};

	let existing = match fs::read_to_string(&path) {
		Ok(content) => content,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
		Err(e) => return Err(to_err(e)),
	};

	let missing: Vec<String> = ARCHIVE_SUFFIXES
		.iter()
		.map(|suffix| format!("*{suffix}"))
		.filter(|pattern| !existing.lines().any(|line| line.trim() == pattern.as_str()))
		.collect();
	if missing.is_empty() {
		return Ok(());
	}

	let mut content = existing;
	if !content.is_empty() && !content.ends_with('\n') {
		content.push('\n');
	}
	for pattern in missing {
		content.push_str(&pattern);
		content.push('\n');
	}
	fs::write(&path, content).map_err(to_err)
}
