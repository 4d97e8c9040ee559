//! Working-copy mirroring for bulk replication
//!
//! Bulk replication makes the target working copy an exact copy of the
//! source snapshot: everything except the tool's metadata directories is
//! removed, then the snapshot is copied across. Change detection is left to
//! the working copy.
//!
//! Files checked out from a server workspace are commonly read-only, so
//! every overwrite or removal clears the read-only flag first.

use crate::error::Result;
use crate::utils;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Counters from a mirror pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorStats {
    /// Files copied
    pub files_copied: usize,
    /// Directories created
    pub dirs_created: usize,
    /// Bytes copied
    pub bytes_copied: u64,
    /// Entries skipped by the ignore list
    pub skipped: usize,
}

/// Compile ignore globs, matched against root-relative `/`-separated paths
pub fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn is_metadata_dir(name: &str, metadata_dirs: &[String]) -> bool {
    metadata_dirs.iter().any(|dir| dir.eq_ignore_ascii_case(name))
}

/// Clear the read-only flag on a file, if set
pub fn make_writable(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

/// Remove everything under `root` except top-level metadata directories
///
/// Returns the number of top-level entries removed.
pub fn clear_working_copy(root: &Path, metadata_dirs: &[String]) -> Result<usize> {
    if !root.exists() {
        fs::create_dir_all(root)?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if is_metadata_dir(&name, metadata_dirs) {
            trace!("Preserving metadata directory {:?}", entry.path());
            continue;
        }

        let path = entry.path();
        if entry.file_type()?.is_dir() {
            for nested in WalkDir::new(&path).into_iter().filter_map(|e| e.ok()) {
                if nested.file_type().is_file() {
                    make_writable(nested.path())?;
                }
            }
            fs::remove_dir_all(&path)?;
        } else {
            make_writable(&path)?;
            fs::remove_file(&path)?;
        }
        removed += 1;
    }

    debug!("Cleared {} entries from {:?}", removed, root);
    Ok(removed)
}

/// Copy one file, creating parents and overwriting a read-only destination
pub fn copy_file(source: &Path, destination: &Path) -> Result<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if destination.exists() {
        make_writable(destination)?;
    }
    Ok(fs::copy(source, destination)?)
}

/// Whether `destination` already holds the bytes of `source`
///
/// A missing destination never matches.
pub fn same_content(source: &Path, destination: &Path) -> Result<bool> {
    if !destination.is_file() {
        return Ok(false);
    }
    if fs::metadata(source)?.len() != fs::metadata(destination)?.len() {
        return Ok(false);
    }
    Ok(utils::hash_data(&fs::read(source)?) == utils::hash_data(&fs::read(destination)?))
}

/// Copy the tree under `source` into `destination`
///
/// Metadata directories are skipped at every depth; `ignore` globs are
/// matched against source-relative paths.
pub fn mirror_tree(
    source: &Path,
    destination: &Path,
    metadata_dirs: &[String],
    ignore: &GlobSet,
) -> Result<MirrorStats> {
    let mut stats = MirrorStats::default();
    fs::create_dir_all(destination)?;

    let walker = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && is_metadata_dir(&entry.file_name().to_string_lossy(), metadata_dirs))
        });

    for entry in walker {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if ignore.is_match(&relative_str) {
            trace!("Ignoring {}", relative_str);
            stats.skipped += 1;
            continue;
        }

        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            if !target.exists() {
                fs::create_dir_all(&target)?;
                stats.dirs_created += 1;
            }
        } else if entry.file_type().is_file() {
            stats.bytes_copied += copy_file(entry.path(), &target)?;
            stats.files_copied += 1;
        }
    }

    debug!(
        "Mirrored {} files ({} dirs, {} bytes) from {:?} to {:?}",
        stats.files_copied, stats.dirs_created, stats.bytes_copied, source, destination
    );
    Ok(stats)
}
