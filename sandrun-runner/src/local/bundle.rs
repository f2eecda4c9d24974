//! Script bundle materialization
//!
//! Blocking filesystem work; callers run it on the blocking pool.

use anyhow::{Context, Result};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::args::REPORT_DIRS;

/// Dependency cache directory skipped when copying
const DEPENDENCY_CACHE: &str = "node_modules";

/// Whether a directory is excluded from a bundle copy
///
/// Report directories only count at the bundle root; below it they may hold
/// test sources.
fn is_excluded(name: &str, depth: usize) -> bool {
    name == DEPENDENCY_CACHE || (depth == 1 && REPORT_DIRS.contains(&name))
}

/// Copies a bundle directory
///
/// Dependency caches are skipped at any depth, prior report directories only
/// at the top level.
/// Symlinks are recreated as links, not followed.
///
/// # Returns
/// The number of files and links copied
pub fn copy_bundle(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        anyhow::bail!("bundle directory not found: {}", src.display());
    }
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    let walker = walkdir::WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && is_excluded(&e.file_name().to_string_lossy(), e.depth()))
        });

    let mut copied = 0;
    for entry in walker {
        let entry = entry.context("Failed to walk bundle directory")?;
        let rel = entry.path().strip_prefix(src)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("Failed to read link {}", entry.path().display()))?;
            copy_link(&link, entry.path(), &target)?;
            copied += 1;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            copied += 1;
        }
    }

    debug!("Copied {} entries from {}", copied, src.display());
    Ok(copied)
}

#[cfg(unix)]
fn copy_link(link: &Path, _source: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, target)
        .with_context(|| format!("Failed to create link {}", target.display()))
}

#[cfg(not(unix))]
fn copy_link(_link: &Path, source: &Path, target: &Path) -> Result<()> {
    // No portable symlinks; copy what the link points at
    if source.is_file() {
        fs::copy(source, target)
            .with_context(|| format!("Failed to copy {}", source.display()))?;
    }
    Ok(())
}

/// Unpacks a zip bundle into `dst`
///
/// # Returns
/// The bundle root: `dst`, or its only top-level directory when the archive
/// wraps everything in one folder.
pub fn unpack_zip(data: &[u8], dst: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    let mut archive = zip::ZipArchive::new(Cursor::new(data)).context("Invalid bundle archive")?;
    debug!("Unpacking {} archive entries", archive.len());
    archive
        .extract(dst)
        .context("Failed to extract bundle archive")?;

    Ok(bundle_root(dst))
}

fn bundle_root(dir: &Path) -> PathBuf {
    if dir.join("package.json").exists() {
        return dir.to_path_buf();
    }

    let entries: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| !p.file_name().is_some_and(|n| n == "__MACOSX"))
            .collect(),
        Err(_) => return dir.to_path_buf(),
    };

    match entries.as_slice() {
        [only] if only.is_dir() && only.join("package.json").exists() => only.clone(),
        _ => dir.to_path_buf(),
    }
}
