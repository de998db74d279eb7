//! [`VersionControl`] through the `git` command line.

use std::{
	fs,
	io::Write,
	path::{Path, PathBuf},
};

use xshell::{cmd, Cmd, Shell};

use super::{VcsError, VersionControl};

/// Runs `git` (and `ssh-keyscan` for host keys) as child processes.
pub struct GitCli {
	sh: Shell,
}

impl GitCli {
	pub fn new() -> Result<Self, VcsError> {
		let sh = Shell::new().map_err(VcsError::NotAvailable)?;
		Ok(Self { sh })
	}

	fn run(&self, cmd: Cmd<'_>) -> Result<(), VcsError> {
		let command = cmd.to_string();
		tracing::debug!(%command, "running");
		cmd.quiet()
			.run()
			.map_err(|source| VcsError::Command {
				command,
				source: source.into(),
			})
	}

	fn read(&self, cmd: Cmd<'_>) -> Result<String, VcsError> {
		let command = cmd.to_string();
		cmd.quiet()
			.read()
			.map_err(|source| VcsError::Command {
				command,
				source: source.into(),
			})
	}

	/// Trimmed stdout on success, `None` on a non-zero exit.
	fn read_optional(&self, cmd: Cmd<'_>) -> Result<Option<String>, VcsError> {
		let command = cmd.to_string();
		let output = cmd
			.quiet()
			.ignore_status()
			.ignore_stderr()
			.output()
			.map_err(|source| VcsError::Command {
				command,
				source: source.into(),
			})?;
		if !output.status.success() {
			return Ok(None);
		}
		let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
		Ok(Some(stdout).filter(|s| !s.is_empty()))
	}
}

impl VersionControl for GitCli {
	fn ensure_available(&self) -> Result<(), VcsError> {
		let sh = &self.sh;
		let version = cmd!(sh, "git --version")
			.quiet()
			.read()
			.map_err(VcsError::NotAvailable)?;
		tracing::debug!(%version, "found git");
		Ok(())
	}

	fn is_repository(&self, dir: &Path) -> bool {
		dir.join(".git").exists()
	}

	fn clone_shallow(&self, url: &str, branch: Option<&str>, dir: &Path) -> Result<(), VcsError> {
		let sh = &self.sh;
		let branch_args = branch.map(|b| ["--branch", b]).into_iter().flatten();
		self.run(cmd!(
			sh,
			"git clone --quiet --depth 1 --single-branch {branch_args...} {url} {dir}"
		))
	}

	fn init(&self, dir: &Path) -> Result<(), VcsError> {
		let sh = &self.sh;
		self.run(cmd!(sh, "git init --quiet {dir}"))
	}

	fn current_branch(&self, dir: &Path) -> Result<Option<String>, VcsError> {
		let sh = &self.sh;
		self.read_optional(cmd!(sh, "git -C {dir} symbolic-ref --quiet --short HEAD"))
	}

	fn checkout_or_create(&self, dir: &Path, branch: &str) -> Result<(), VcsError> {
		let sh = &self.sh;
		if self
			.run(cmd!(sh, "git -C {dir} checkout --quiet {branch}"))
			.is_ok()
		{
			return Ok(());
		}
		self.run(cmd!(sh, "git -C {dir} checkout --quiet -b {branch}"))
	}

	fn config_get(&self, dir: &Path, key: &str) -> Result<Option<String>, VcsError> {
		let sh = &self.sh;
		self.read_optional(cmd!(sh, "git -C {dir} config --get {key}"))
	}

	fn set_config(&self, dir: &Path, key: &str, value: &str) -> Result<(), VcsError> {
		let sh = &self.sh;
		self.run(cmd!(sh, "git -C {dir} config {key} {value}"))
	}

	fn status_is_dirty(&self, dir: &Path) -> Result<bool, VcsError> {
		let sh = &self.sh;
		let status = self.read(cmd!(sh, "git -C {dir} status --porcelain"))?;
		Ok(!status.trim().is_empty())
	}

	fn add_all(&self, dir: &Path) -> Result<(), VcsError> {
		let sh = &self.sh;
		self.run(cmd!(sh, "git -C {dir} add --all"))
	}

	fn commit(&self, dir: &Path, message: &str) -> Result<(), VcsError> {
		let sh = &self.sh;
		self.run(cmd!(sh, "git -C {dir} commit --quiet -m {message}"))
	}

	fn remote_url(&self, dir: &Path, name: &str) -> Result<Option<String>, VcsError> {
		let sh = &self.sh;
		self.read_optional(cmd!(sh, "git -C {dir} remote get-url {name}"))
	}

	fn remote_add(&self, dir: &Path, name: &str, url: &str) -> Result<(), VcsError> {
		let sh = &self.sh;
		self.run(cmd!(sh, "git -C {dir} remote add {name} {url}"))
	}

	fn pull_ff_only(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), VcsError> {
		let sh = &self.sh;
		self.run(cmd!(sh, "git -C {dir} pull --quiet --ff-only {remote} {branch}"))
	}

	fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), VcsError> {
		let sh = &self.sh;
		self.run(cmd!(sh, "git -C {dir} push --quiet --set-upstream {remote} {branch}"))
	}

	fn register_host_key(&self, url: &str) -> Result<(), VcsError> {
		let endpoint = SshEndpoint::parse(url).ok_or_else(|| VcsError::NotSsh {
			url: url.to_string(),
		})?;
		let known_hosts = known_hosts_path()?;
		let sh = &self.sh;

		let lookup = endpoint.known_hosts_name();
		if known_hosts.is_file() {
			let found = self.read_optional(cmd!(sh, "ssh-keygen -F {lookup} -f {known_hosts}"))?;
			if found.is_some() {
				tracing::debug!(host = %endpoint.host, "host key already known");
				return Ok(());
			}
		}

		let host = &endpoint.host;
		let port_args = endpoint
			.port
			.map(|p| ["-p".to_string(), p.to_string()])
			.into_iter()
			.flatten();
		let keys = self.read(cmd!(sh, "ssh-keyscan -H {port_args...} {host}"))?;

		let append = || -> std::io::Result<()> {
			if let Some(parent) = known_hosts.parent() {
				fs::create_dir_all(parent)?;
			}
			let mut file = fs::OpenOptions::new()
				.create(true)
				.append(true)
				.open(&known_hosts)?;
			writeln!(file, "{}", keys.trim_end())
		};
		append().map_err(|source| VcsError::KnownHosts {
			path: known_hosts.clone(),
			source,
		})?;
		tracing::info!(host = %endpoint.host, "registered SSH host key");
		Ok(())
	}
}

fn known_hosts_path() -> Result<PathBuf, VcsError> {
	dirs::home_dir()
		.map(|home| home.join(".ssh").join("known_hosts"))
		.ok_or(VcsError::NoHomeDirectory)
}

/// Host part of an SSH remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
	pub host: String,
	pub port: Option<u16>,
}

impl SshEndpoint {
	/// Parse `ssh://[user@]host[:port]/path` or scp-like `user@host:path`.
	pub fn parse(url: &str) -> Option<Self> {
		if let Some(rest) = url.strip_prefix("ssh://") {
			let authority = rest.split('/').next()?;
			let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
			let (host, port) = match host_port.rsplit_once(':') {
				Some((host, port)) => (host, Some(port.parse().ok()?)),
				None => (host_port, None),
			};
			if host.is_empty() {
				return None;
			}
			return Some(Self {
				host: host.to_string(),
				port,
			});
		}
		if url.contains("://") {
			return None;
		}

		let (user_host, _path) = url.split_once(':')?;
		let (_user, host) = user_host.split_once('@')?;
		if host.is_empty() || host.contains('/') {
			return None;
		}
		Some(Self {
			host: host.to_string(),
			port: None,
		})
	}

	/// Name under which `ssh` records the host in known_hosts.
	pub fn known_hosts_name(&self) -> String {
		match self.port {
			Some(port) if port != 22 => format!("[{}]:{}", self.host, port),
			_ => self.host.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case("git@github.com:org/backups.git", Some(("github.com", None)))]
	#[case("ssh://git@gitlab.example.com:2222/org/backups.git", Some(("gitlab.example.com", Some(2222))))]
	#[case("ssh://gitlab.example.com/org/backups.git", Some(("gitlab.example.com", None)))]
	#[case("https://github.com/org/backups.git", None)]
	#[case("file:///srv/git/backups.git", None)]
	#[case("/srv/git/backups.git", None)]
	#[case("ssh://git@host:notaport/repo", None)]
	#[case("ssh://git@:2222/repo", None)]
	fn test_ssh_endpoint(#[case] url: &str, #[case] expected: Option<(&str, Option<u16>)>) {
		let expected = expected.map(|(host, port)| SshEndpoint {
			host: host.to_string(),
			port,
		});
		assert_eq!(SshEndpoint::parse(url), expected);
	}

	#[test]
	fn test_known_hosts_name() {
		let endpoint = SshEndpoint {
			host: "example.com".to_string(),
			port: Some(2222),
		};
		assert_eq!(endpoint.known_hosts_name(), "[example.com]:2222");

		let endpoint = SshEndpoint {
			host: "example.com".to_string(),
			port: Some(22),
		};
		assert_eq!(endpoint.known_hosts_name(), "example.com");
	}

	#[test]
	fn test_git_cli_commit_cycle() {
		let git = GitCli::new().unwrap();
		if git.ensure_available().is_err() {
			// git is an optional runtime dependency
			return;
		}
		let dir = tempfile::tempdir().unwrap();
		let repo = dir.path().join("repo");

		assert!(!git.is_repository(&repo));
		git.init(&repo).unwrap();
		assert!(git.is_repository(&repo));
		git.set_config(&repo, "user.name", "test").unwrap();
		git.set_config(&repo, "user.email", "test@example.com").unwrap();
		assert_eq!(git.config_get(&repo, "user.name").unwrap().as_deref(), Some("test"));
		assert_eq!(git.config_get(&repo, "kube-dump.unset").unwrap(), None);

		assert!(!git.status_is_dirty(&repo).unwrap());
		fs::write(repo.join("a.yaml"), "a: 1\n").unwrap();
		assert!(git.status_is_dirty(&repo).unwrap());
		git.add_all(&repo).unwrap();
		git.commit(&repo, "first").unwrap();
		assert!(!git.status_is_dirty(&repo).unwrap());

		git.checkout_or_create(&repo, "backups").unwrap();
		assert_eq!(git.current_branch(&repo).unwrap().as_deref(), Some("backups"));

		assert_eq!(git.remote_url(&repo, "origin").unwrap(), None);
		git.remote_add(&repo, "origin", "https://example.com/backups.git").unwrap();
		assert_eq!(
			git.remote_url(&repo, "origin").unwrap().as_deref(),
			Some("https://example.com/backups.git")
		);
	}
}
