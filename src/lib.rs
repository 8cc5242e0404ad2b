/*!
 * stargz-layer-core - Lazy-pull materializer and range-fetch cache
 *
 * Exposes a C-callable ABI for a host filesystem driver (FUSE bridge out of
 * scope) that needs to lazily realize a seekable stargz container layer onto
 * a target directory tree:
 * - A Range Fetcher: HTTP range-request random access over a remote layer,
 *   with a local backing-file cache.
 * - A Local Source Adapter for layers already unpacked on local disk.
 * - An Inode Materializer that projects TOC entries onto the target tree on
 *   demand, keyed by TOC path so hardlinks share their target's inode.
 * - A Query Layer (`Stat`, `OpenDir`/`ReadDir`, `WaitForFile`, xattrs) built
 *   on top of an externally supplied TOC parser.
 */

pub mod abi;
pub mod config;
pub mod error;
pub mod handles;
pub mod layer;
pub mod logging;
pub mod materializer;
pub mod service;
pub mod source;
pub mod toc;

pub use config::Config;
pub use error::{CoreError, Result};
pub use layer::Layer;
pub use service::{service, Service, TocFactory};
pub use toc::{EntryKind, TocEntry, TocSource};
