//! The Layer entity (spec §3): an opened stargz layer's TOC handle, target
//! directory, workdir, and the TOC-path → inode map the materializer
//! populates. Layers are never destroyed once opened; they live in the
//! `Service`'s append-only layer vector until process exit.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::source::ReadAt;
use crate::toc::TocSource;

pub struct Layer {
    /// The opaque TOC view supplied by the (external) stargz parser.
    pub toc: Arc<dyn TocSource>,
    /// The random-access byte source backing `toc`'s file streams: either a
    /// `HttpRangeSource` or a `LocalSource`, or `None` for a TOC built
    /// entirely in memory (as in tests).
    pub source: Option<Arc<dyn ReadAt>>,
    pub target: PathBuf,
    pub workdir: PathBuf,
    /// TOC path -> filesystem-assigned inode. Keyed by TOC path, not
    /// on-disk path, so a hardlink and its target share one entry.
    pub inode_map: DashMap<String, u64>,
}

impl Layer {
    pub fn new(toc: Arc<dyn TocSource>, source: Option<Arc<dyn ReadAt>>, target: PathBuf, workdir: PathBuf) -> Self {
        Self {
            toc,
            source,
            target,
            workdir,
            inode_map: DashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn for_test(toc: Arc<dyn TocSource>, target: PathBuf, workdir: PathBuf) -> Self {
        Self::new(toc, None, target, workdir)
    }
}
