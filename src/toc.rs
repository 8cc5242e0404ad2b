//! The TOC Binding: the read-only view the core assumes an external stargz
//! parser supplies (spec §4.3). The parser itself is out of scope; this
//! module only defines the boundary the rest of the core is built against.

use std::collections::HashMap;

/// One entry's kind, matching the wire values spec §4.5 assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir = 1,
    Reg = 2,
    Symlink = 3,
    Hardlink = 4,
    Char = 5,
    Block = 6,
    Fifo = 7,
}

impl EntryKind {
    /// The standard POSIX `d_type` value reported by `ReadDir` (spec §4.5).
    /// Hardlinks are reported as `DT_REG`.
    pub fn dirent_type(self) -> u8 {
        match self {
            EntryKind::Dir => libc::DT_DIR,
            EntryKind::Reg | EntryKind::Hardlink => libc::DT_REG,
            EntryKind::Symlink => libc::DT_LNK,
            EntryKind::Char => libc::DT_CHR,
            EntryKind::Block => libc::DT_BLK,
            EntryKind::Fifo => libc::DT_FIFO,
        }
    }
}

/// A read-only view of one TOC entry. Immutable; lifetime = the layer's.
#[derive(Debug, Clone)]
pub struct TocEntry {
    /// Slash-separated name. May end in `/` for directories. The root is `""`.
    pub name: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Symlink target, or the hardlink's target TOC path.
    pub link_target: Option<String>,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub nlink: u32,
    pub mtime_ns: i64,
    pub xattrs: HashMap<String, Vec<u8>>,
}

/// The contract the core consumes from the stargz parser (spec §4.3).
///
/// Mirrors the shape of a metadata-oracle trait (lookup/readdir/getattr),
/// kept synchronous because every core operation must be callable from any
/// host thread without requiring the caller to run an async executor.
pub trait TocSource: Send + Sync {
    /// Look up an entry by exact path. No trailing-slash retry here — that
    /// policy lives in the core (spec §4.3) so it applies uniformly above
    /// every `TocSource` implementation.
    fn lookup(&self, path: &str) -> Option<TocEntry>;

    /// Visit each direct child of `parent` in the parser's own enumeration
    /// order. Stops early if `visit` returns `false`.
    fn foreach_child(&self, parent: &TocEntry, visit: &mut dyn FnMut(&str, &TocEntry) -> bool);

    /// Open a restartable, finite decompressed byte stream for a regular file.
    fn open_file(&self, path: &str) -> std::io::Result<Box<dyn std::io::Read + Send>>;
}

/// Core-side lookup policy: retry with a trailing `/` before reporting not
/// found, and normalize `"."` to the root (spec §4.3).
pub fn lookup_with_policy(toc: &dyn TocSource, path: &str) -> Option<TocEntry> {
    let path = if path == "." { "" } else { path };
    toc.lookup(path).or_else(|| toc.lookup(&format!("{path}/")))
}

/// The parent of a TOC path: strip any trailing `/`, take the directory
/// component. The parent of `""` is itself.
pub fn parent_path(name: &str) -> String {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    match trimmed.rfind('/') {
        Some(idx) => trimmed[..idx].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
pub mod mem {
    //! An in-memory `TocSource` for unit/integration tests.
    use super::*;
    use std::collections::BTreeMap;

    pub struct MemToc {
        entries: BTreeMap<String, TocEntry>,
        /// Preserves the parser's own enumeration order, independent of the
        /// `BTreeMap`'s lexical order.
        children: HashMap<String, Vec<String>>,
        contents: HashMap<String, Vec<u8>>,
    }

    impl MemToc {
        pub fn new() -> Self {
            let mut toc = Self {
                entries: BTreeMap::new(),
                children: HashMap::new(),
                contents: HashMap::new(),
            };
            toc.entries.insert(
                String::new(),
                TocEntry {
                    name: String::new(),
                    kind: EntryKind::Dir,
                    mode: 0o755,
                    uid: 0,
                    gid: 0,
                    size: 0,
                    link_target: None,
                    dev_major: 0,
                    dev_minor: 0,
                    nlink: 2,
                    mtime_ns: 0,
                    xattrs: HashMap::new(),
                },
            );
            toc
        }

        pub fn insert(&mut self, entry: TocEntry) {
            let parent = parent_path(&entry.name);
            self.children.entry(parent).or_default().push(entry.name.clone());
            self.entries.insert(entry.name.clone(), entry);
        }

        pub fn set_contents(&mut self, path: &str, data: Vec<u8>) {
            self.contents.insert(path.to_string(), data);
        }

        pub fn dir(name: &str, mode: u32) -> TocEntry {
            TocEntry {
                name: name.to_string(),
                kind: EntryKind::Dir,
                mode,
                uid: 0,
                gid: 0,
                size: 0,
                link_target: None,
                dev_major: 0,
                dev_minor: 0,
                nlink: 2,
                mtime_ns: 0,
                xattrs: HashMap::new(),
            }
        }

        pub fn reg(name: &str, mode: u32, size: u64) -> TocEntry {
            TocEntry {
                name: name.to_string(),
                kind: EntryKind::Reg,
                mode,
                uid: 0,
                gid: 0,
                size,
                link_target: None,
                dev_major: 0,
                dev_minor: 0,
                nlink: 1,
                mtime_ns: 0,
                xattrs: HashMap::new(),
            }
        }

        pub fn symlink(name: &str, target: &str) -> TocEntry {
            TocEntry {
                name: name.to_string(),
                kind: EntryKind::Symlink,
                mode: 0o777,
                uid: 0,
                gid: 0,
                size: 0,
                link_target: Some(target.to_string()),
                dev_major: 0,
                dev_minor: 0,
                nlink: 1,
                mtime_ns: 0,
                xattrs: HashMap::new(),
            }
        }

        pub fn hardlink(name: &str, target: &str) -> TocEntry {
            TocEntry {
                name: name.to_string(),
                kind: EntryKind::Hardlink,
                mode: 0o644,
                uid: 0,
                gid: 0,
                size: 0,
                link_target: Some(target.to_string()),
                dev_major: 0,
                dev_minor: 0,
                nlink: 1,
                mtime_ns: 0,
                xattrs: HashMap::new(),
            }
        }
    }

    impl TocSource for MemToc {
        fn lookup(&self, path: &str) -> Option<TocEntry> {
            self.entries.get(path).cloned()
        }

        fn foreach_child(&self, parent: &TocEntry, visit: &mut dyn FnMut(&str, &TocEntry) -> bool) {
            let Some(names) = self.children.get(&parent.name) else {
                return;
            };
            for child_name in names {
                let Some(entry) = self.entries.get(child_name) else {
                    continue;
                };
                let base = child_name.trim_end_matches('/').rsplit('/').next().unwrap_or(child_name);
                if !visit(base, entry) {
                    break;
                }
            }
        }

        fn open_file(&self, path: &str) -> std::io::Result<Box<dyn std::io::Read + Send>> {
            // Real stargz readers resolve a hardlink's open to its target's
            // chunk data transparently; mirror that here.
            let resolved = match self.entries.get(path) {
                Some(entry) if entry.kind == EntryKind::Hardlink => {
                    entry.link_target.clone().unwrap_or_else(|| path.to_string())
                }
                _ => path.to_string(),
            };
            let data = self
                .contents
                .get(&resolved)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, resolved))?;
            Ok(Box::new(std::io::Cursor::new(data)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_root_is_root() {
        assert_eq!(parent_path(""), "");
    }

    #[test]
    fn parent_strips_trailing_slash_and_basename() {
        assert_eq!(parent_path("a/b"), "a");
        assert_eq!(parent_path("a/c/"), "a");
        assert_eq!(parent_path("a"), "");
    }

    #[test]
    fn lookup_policy_normalizes_dot_to_root() {
        let toc = mem::MemToc::new();
        let root = lookup_with_policy(&toc, ".").unwrap();
        assert_eq!(root.name, "");
    }

    #[test]
    fn lookup_policy_retries_with_trailing_slash() {
        let mut toc = mem::MemToc::new();
        toc.insert(mem::MemToc::dir("a/", 0o755));
        assert!(lookup_with_policy(&toc, "a").is_some());
    }
}
