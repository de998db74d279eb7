//! Compressed tarballs of the dump directory and their retention.

use std::{
	fs::{self, File},
	io::{self, Write},
	path::{Path, PathBuf},
	time::{Duration, SystemTime},
};

use chrono::{DateTime, TimeZone};
use thiserror::Error;
use tracing::instrument;
use walkdir::WalkDir;

/// Suffixes of every archive this tool can produce.
pub const ARCHIVE_SUFFIXES: [&str; 4] = [".tar", ".tar.xz", ".tar.gz", ".tar.bz2"];

const ARCHIVE_PREFIX: &str = "dump_";
const TIMESTAMP_FORMAT: &str = "%Y.%m.%d_%H-%M";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ArchiveError {
	#[error("creating archive {path}")]
	Create {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("rotating archives in {path}")]
	Rotate {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
	#[default]
	None,
	Gzip,
	Xz,
	Bzip2,
}

impl Compression {
	/// Map an archive type name; anything unrecognized means plain tar.
	pub fn from_type(name: Option<&str>) -> Self {
		match name.map(str::to_ascii_lowercase).as_deref() {
			Some("gz" | "gzip" | "tgz") => Self::Gzip,
			Some("xz") => Self::Xz,
			Some("bz2" | "bzip2") => Self::Bzip2,
			None | Some("" | "tar") => Self::None,
			Some(other) => {
				tracing::warn!(archive_type = other, "unknown archive type, using plain tar");
				Self::None
			}
		}
	}

	pub fn suffix(self) -> &'static str {
		match self {
			Self::None => ".tar",
			Self::Xz => ".tar.xz",
			Self::Gzip => ".tar.gz",
			Self::Bzip2 => ".tar.bz2",
		}
	}
}

/// `dump_<YYYY.MM.DD_HH-MM>.tar[.<ext>]`
pub fn archive_name<Tz: TimeZone>(at: &DateTime<Tz>, compression: Compression) -> String
where
	Tz::Offset: std::fmt::Display,
{
	format!(
		"{ARCHIVE_PREFIX}{}{}",
		at.format(TIMESTAMP_FORMAT),
		compression.suffix()
	)
}

pub fn is_archive(name: &str) -> bool {
	ARCHIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Archive everything under `dir` except `.git` and earlier archives.
#[instrument(skip(at))]
pub fn create_archive<Tz: TimeZone>(
	dir: &Path,
	compression: Compression,
	at: &DateTime<Tz>,
) -> Result<PathBuf, ArchiveError>
where
	Tz::Offset: std::fmt::Display,
{
	let path = dir.join(archive_name(at, compression));
	let to_err = |source: io::Error| ArchiveError::Create {
		path: path.clone(),
		source,
	};

	let file = File::create(&path).map_err(to_err)?;
	let written = match compression {
		Compression::None => write_tar(dir, file).map(drop),
		Compression::Gzip => write_tar(dir, flate2::write::GzEncoder::new(file, flate2::Compression::default()))
			.and_then(|encoder| encoder.finish().map(drop)),
		Compression::Xz => write_tar(dir, xz2::write::XzEncoder::new(file, 6))
			.and_then(|encoder| encoder.finish().map(drop)),
		Compression::Bzip2 => write_tar(dir, bzip2::write::BzEncoder::new(file, bzip2::Compression::default()))
			.and_then(|encoder| encoder.finish().map(drop)),
	};
	if let Err(e) = written {
		let _ = fs::remove_file(&path);
		return Err(to_err(e));
	}

	tracing::info!(archive = %path.display(), "created archive");
	Ok(path)
}

fn write_tar<W: Write>(dir: &Path, writer: W) -> io::Result<W> {
	let mut builder = tar::Builder::new(writer);
	builder.follow_symlinks(false);

	let walker = WalkDir::new(dir)
		.min_depth(1)
		.sort_by_file_name()
		.into_iter()
		.filter_entry(|entry| {
			let name = entry.file_name().to_string_lossy();
			if name == ".git" {
				return false;
			}
			!(entry.depth() == 1 && entry.file_type().is_file() && is_archive(&name))
		});

	for entry in walker {
		let entry = entry?;
		let relative = entry
			.path()
			.strip_prefix(dir)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
		if entry.file_type().is_dir() {
			builder.append_dir(relative, entry.path())?;
		} else {
			builder.append_path_with_name(entry.path(), relative)?;
		}
	}

	builder.into_inner()
}

/// Delete archives in `dir` older than `retention_days`, sparing `keep`.
///
/// Returns the deleted paths.
#[instrument(skip(now))]
pub fn rotate(
	dir: &Path,
	retention_days: u32,
	keep: &Path,
	now: SystemTime,
) -> Result<Vec<PathBuf>, ArchiveError> {
	let to_err = |source: io::Error| ArchiveError::Rotate {
		path: dir.to_path_buf(),
		source,
	};
	let max_age = Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY);
	let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);

	let mut removed = Vec::new();
	for entry in fs::read_dir(dir).map_err(to_err)? {
		let entry = entry.map_err(to_err)?;
		let path = entry.path();
		if path == keep || !is_archive(&entry.file_name().to_string_lossy()) {
			continue;
		}
		let metadata = entry.metadata().map_err(to_err)?;
		if !metadata.is_file() {
			continue;
		}
		if metadata.modified().map_err(to_err)? < cutoff {
			fs::remove_file(&path).map_err(to_err)?;
			tracing::info!(archive = %path.display(), "removed expired archive");
			removed.push(path);
		}
	}
	removed.sort();
	Ok(removed)
}
