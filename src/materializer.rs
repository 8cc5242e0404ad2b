//! The Inode Materializer: projects TOC entries onto the on-disk target tree
//! on demand (spec §4.4), keyed by TOC path rather than on-disk path so that
//! a hardlink and its target share the same memoized inode.

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::layer::Layer;
use crate::toc::{lookup_with_policy, parent_path, EntryKind, TocEntry, TocSource};

/// Map a TOC path onto the on-disk path under `target`. The root (`""`) is
/// `target` itself.
pub(crate) fn on_disk_path(target: &Path, toc_name: &str) -> PathBuf {
    let trimmed = toc_name.trim_end_matches('/');
    if trimmed.is_empty() {
        target.to_path_buf()
    } else {
        target.join(trimmed)
    }
}

/// Ensure every on-disk artifact for `entry` (and its ancestors) exists,
/// returning the memoized inode number. See spec §4.4 for the numbered
/// materialization steps this follows.
pub fn ensure_inode(layer: &Layer, toc: &dyn TocSource, entry: &TocEntry) -> Result<u64> {
    let mut visiting = HashSet::new();
    ensure_inode_inner(layer, toc, entry, &mut visiting)
}

fn ensure_inode_inner(
    layer: &Layer,
    toc: &dyn TocSource,
    entry: &TocEntry,
    visiting: &mut HashSet<String>,
) -> Result<u64> {
    if let Some(ino) = layer.inode_map.get(&entry.name) {
        return Ok(*ino);
    }

    // Guards against a hardlink target forming a cycle back to itself: a
    // malformed layer would otherwise recurse forever (spec §9 Design Notes).
    if !visiting.insert(entry.name.clone()) {
        return Err(CoreError::HardlinkCycle(entry.name.clone()));
    }

    let result = materialize(layer, toc, entry, visiting);
    visiting.remove(&entry.name);
    result
}

fn materialize(
    layer: &Layer,
    toc: &dyn TocSource,
    entry: &TocEntry,
    visiting: &mut HashSet<String>,
) -> Result<u64> {
    if !entry.name.is_empty() {
        let parent_name = parent_path(&entry.name);
        if let Some(parent_entry) = lookup_with_policy(toc, &parent_name) {
            ensure_inode_inner(layer, toc, &parent_entry, visiting)?;
        }
    }

    let path = on_disk_path(&layer.target, &entry.name);

    let ino = match entry.kind {
        EntryKind::Dir => {
            create_dir_tolerant(&path, entry.mode)?;
            lstat_ino(&path)?
        }
        EntryKind::Char | EntryKind::Block | EntryKind::Fifo | EntryKind::Reg => {
            create_placeholder(&path, entry.mode)?;
            lstat_ino(&path)?
        }
        EntryKind::Symlink => {
            create_symlink_tolerant(&path, entry.link_target.as_deref().unwrap_or(""))?;
            lstat_ino(&path)?
        }
        EntryKind::Hardlink => {
            let target_name = entry
                .link_target
                .as_deref()
                .ok_or_else(|| CoreError::not_found(entry.name.clone()))?;
            let target_entry = lookup_with_policy(toc, target_name)
                .ok_or_else(|| CoreError::not_found(target_name.to_string()))?;
            let target_ino = ensure_inode_inner(layer, toc, &target_entry, visiting)?;
            let target_path = on_disk_path(&layer.target, &target_entry.name);
            create_hardlink_tolerant(&target_path, &path)?;
            layer.inode_map.insert(entry.name.clone(), target_ino);
            return Ok(target_ino);
        }
    };

    layer.inode_map.insert(entry.name.clone(), ino);
    Ok(ino)
}

fn create_dir_tolerant(path: &Path, mode: u32) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => {
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(CoreError::Io(e)),
    }
}

fn create_placeholder(path: &Path, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    // create-or-truncate (spec §4.4 step 3; matches the original's O_TRUNC):
    // a reused target/ must not leave a stale, already-TOC-sized placeholder
    // behind for `wait_for_file`'s size check to mistake for up to date.
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(CoreError::Io)?;
    drop(file);
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
    Ok(())
}

fn create_symlink_tolerant(path: &Path, link_target: &str) -> Result<()> {
    match symlink(link_target, path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(CoreError::Io(e)),
    }
}

fn create_hardlink_tolerant(target_path: &Path, link_path: &Path) -> Result<()> {
    match fs::hard_link(target_path, link_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(CoreError::Io(e)),
    }
}

fn lstat_ino(path: &Path) -> Result<u64> {
    fs::symlink_metadata(path).map(|m| m.ino()).map_err(CoreError::Io)
}
