//! The dump run: destination setup, catalog, dump, versioning, archiving.
//!
//! Stages run strictly one after another against the same destination
//! directory. Notification is left to the caller, which also sees fatal
//! errors.

use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, SecondsFormat};
use tracing::instrument;

use crate::{
	archive,
	catalog::ResourceCatalog,
	config::DumpConfig,
	dump::{self, Checkpoint, DumpEngine, RunStatus},
	git::VersionControl,
	k8s::{client::ClusterContext, ClusterApi, ResourceScope},
	snapshot::SnapshotVersioner,
};

/// Run every stage for one dump.
///
/// `vcs` must be provided when versioning is enabled.
#[instrument(skip_all, fields(destination = %config.destination.display(), mode = %config.mode))]
pub async fn run<C, V>(
	config: &DumpConfig,
	context: &ClusterContext,
	cluster: &C,
	vcs: Option<&V>,
	started: DateTime<Local>,
) -> Result<RunStatus>
where
	C: ClusterApi,
	V: VersionControl,
{
	let mut status = RunStatus::default();
	let destination = config.destination.as_path();

	let versioner = match vcs {
		Some(vcs) if config.git.enabled() => {
			vcs.ensure_available()
				.context("git is required for --git-commit/--git-push")?;
			Some(SnapshotVersioner::new(vcs, destination, &config.git, &context.name))
		}
		None if config.git.enabled() => bail!("versioning enabled but no version control available"),
		_ => None,
	};
	if let Some(versioner) = &versioner {
		versioner.prepare();
	}

	dump::prepare_destination(destination, config.force_remove, &mut status)
		.await
		.context("preparing destination directory")?;

	let catalog = ResourceCatalog::resolve(cluster, &config.overrides, config.mode)
		.await
		.context("resolving resource catalog")?;
	status.summary.missing_namespaces = catalog.missing_namespaces.len();

	let mut engine = DumpEngine::new(cluster, destination, config.layout, config.detailed);
	if config.mode.includes(ResourceScope::Namespaced) {
		engine.dump_namespaces(&catalog, &mut status).await;
	}
	if config.mode.includes(ResourceScope::ClusterWide) {
		engine.dump_cluster(&catalog, &mut status).await;
	}

	if let Some(versioner) = &versioner {
		let timestamp = started.to_rfc3339_opts(SecondsFormat::Secs, false);
		let outcome = versioner
			.commit(&timestamp)
			.context("committing dump")?;
		if config.git.push {
			versioner
				.push(outcome.branch())
				.context("pushing dump")?;
		}
	}

	if config.archive.enabled {
		let path = archive::create_archive(destination, config.archive.compression, &started)
			.context("archiving dump")?;
		if let Some(days) = config.archive.rotate_days {
			match archive::rotate(destination, days, &path, SystemTime::now()) {
				Ok(removed) => tracing::debug!(removed = removed.len(), "rotated archives"),
				Err(e) => tracing::warn!(error = %e, "archive rotation failed"),
			}
		}
	}

	status.checkpoint(Checkpoint::RunAcknowledged);
	Ok(status)
}
