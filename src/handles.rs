//! Query-Layer operations (spec §4.5): `Stat`, `OpenDir`/`ReadDir` snapshot
//! construction, `WaitForFile`, `Getxattr`/`Listxattr`. These are the
//! handle-free building blocks; `service.rs` wraps them with the handle
//! registries and `abi.rs` exposes them across the C boundary.

use std::fs;
use std::io;

use crate::error::{CoreError, Result};
use crate::layer::Layer;
use crate::materializer::{ensure_inode, on_disk_path};
use crate::toc::{lookup_with_policy, EntryKind, TocEntry};

/// The 11-field struct `Stat` returns (spec §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatResult {
    pub kind: u8,
    pub inode: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev_major: u32,
    pub rdev_minor: u32,
    pub size: u64,
    pub mtime_ns: i64,
}

/// One entry in a directory snapshot (spec §3 Directory Iterator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u64,
    pub name: String,
    pub dirent_kind: u8,
}

fn resolve(layer: &Layer, path: &str) -> Result<TocEntry> {
    lookup_with_policy(layer.toc.as_ref(), path).ok_or_else(|| CoreError::not_found(path))
}

/// `Stat(handle, path)`: metadata comes from the TOC entry, not the
/// materialized on-disk artifact; materialization only assigns the inode.
pub fn stat(layer: &Layer, path: &str) -> Result<StatResult> {
    let entry = resolve(layer, path)?;
    let inode = ensure_inode(layer, layer.toc.as_ref(), &entry)?;
    Ok(StatResult {
        kind: entry.kind as u8,
        inode,
        mode: entry.mode,
        nlink: entry.nlink,
        uid: entry.uid,
        gid: entry.gid,
        rdev_major: entry.dev_major,
        rdev_minor: entry.dev_minor,
        size: entry.size,
        mtime_ns: entry.mtime_ns,
    })
}

/// `OpenDir(handle, path)`: eagerly materializes every direct child and
/// snapshots them in the TOC parser's own enumeration order.
pub fn open_dir_snapshot(layer: &Layer, path: &str) -> Result<Vec<DirEntry>> {
    let parent = resolve(layer, path)?;
    ensure_inode(layer, layer.toc.as_ref(), &parent)?;

    let mut out = Vec::new();
    let mut err = None;
    layer.toc.foreach_child(&parent, &mut |base_name, child| {
        match ensure_inode(layer, layer.toc.as_ref(), child) {
            Ok(inode) => {
                out.push(DirEntry {
                    inode,
                    name: base_name.trim_end_matches('/').to_string(),
                    dirent_kind: child.kind.dirent_type(),
                });
                true
            }
            Err(e) => {
                err = Some(e);
                false
            }
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(out)
}

/// `WaitForFile(handle, path)`. Non-regular, non-hardlink entries return
/// immediately. Otherwise materializes (which, for a hardlink, already
/// joins it on disk to its target); if the caller's own normalized path
/// still doesn't share the destination on disk, links them too; then, only
/// if the on-disk size doesn't match the TOC entry's recorded size, rewrites
/// the file from the parser's decompressed stream.
pub fn wait_for_file(layer: &Layer, path: &str) -> Result<()> {
    let normalized = if path == "." { "" } else { path };
    let entry = resolve(layer, path)?;
    if !matches!(entry.kind, EntryKind::Reg | EntryKind::Hardlink) {
        return Ok(());
    }
    ensure_inode(layer, layer.toc.as_ref(), &entry)?;

    let orig_path = on_disk_path(&layer.target, normalized);
    let dest_path = on_disk_path(&layer.target, &entry.name);
    let meta = fs::symlink_metadata(&dest_path).map_err(|_| CoreError::not_found(dest_path.display().to_string()))?;

    if orig_path != dest_path {
        match fs::hard_link(&dest_path, &orig_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(CoreError::Io(e)),
        }
    }

    if meta.len() == entry.size {
        return Ok(());
    }

    let mut stream = layer.toc.open_file(normalized).map_err(CoreError::Io)?;
    let mut dest = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&dest_path)
        .map_err(CoreError::Io)?;
    io::copy(&mut stream, &mut dest).map_err(CoreError::Io)?;
    Ok(())
}

/// `Getxattr(handle, path, name)`.
pub fn getxattr(layer: &Layer, path: &str, name: &str) -> Result<Vec<u8>> {
    let entry = resolve(layer, path)?;
    entry
        .xattrs
        .get(name)
        .cloned()
        .ok_or_else(|| CoreError::NoXattr {
            path: path.to_string(),
            name: name.to_string(),
        })
}

/// `Listxattr(handle, path)`: NUL-terminated keys, trailing NUL; `"\0"` if empty.
pub fn listxattr(layer: &Layer, path: &str) -> Result<Vec<u8>> {
    let entry = resolve(layer, path)?;
    if entry.xattrs.is_empty() {
        return Ok(vec![0]);
    }
    let mut buf = Vec::new();
    for key in entry.xattrs.keys() {
        buf.extend_from_slice(key.as_bytes());
        buf.push(0);
    }
    buf.push(0);
    Ok(buf)
}
