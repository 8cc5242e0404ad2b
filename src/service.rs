//! The process-wide `Service`: the layer vector and directory-handle
//! registry, as explicit fields on a value rather than module globals
//! (spec §9 Design Notes). A single instance is built lazily behind a
//! `OnceLock`, populated by `Load`, keeping the exported C ABI
//! argument-compatible with spec.md §6.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::handles::{self, DirEntry, StatResult};
use crate::layer::Layer;
use crate::source::{LocalSource, ReadAt};
use crate::toc::TocSource;

/// Builds a `TocSource` from an opened byte source. The actual stargz TOC
/// parser is an external collaborator (out of scope, spec §1); the host
/// wires its implementation in at `Load` time.
pub type TocFactory = Box<dyn Fn(Arc<dyn ReadAt>) -> Result<Arc<dyn TocSource>> + Send + Sync>;

struct DirHandleState {
    entries: Vec<DirEntry>,
    pos: usize,
}

pub struct Service {
    config: RwLock<Config>,
    layers: RwLock<Vec<Layer>>,
    dir_handles: Mutex<HashMap<u64, DirHandleState>>,
    next_dir_handle: Mutex<u64>,
    toc_factory: Mutex<Option<TocFactory>>,
}

static SERVICE: OnceLock<Service> = OnceLock::new();

pub fn service() -> &'static Service {
    SERVICE.get_or_init(Service::new)
}

impl Service {
    fn new() -> Self {
        Self {
            config: RwLock::new(Config::default()),
            layers: RwLock::new(Vec::new()),
            dir_handles: Mutex::new(HashMap::new()),
            next_dir_handle: Mutex::new(0),
            toc_factory: Mutex::new(None),
        }
    }

    pub fn set_config(&self, config: Config) {
        *self.config.write() = config;
    }

    /// Registers the host's stargz-parser bridge. Must be called before the
    /// first `open_layer`, ordinarily from `Load`.
    pub fn set_toc_factory(&self, factory: TocFactory) {
        *self.toc_factory.lock() = Some(factory);
    }

    /// `OpenLayer(source, target, workdir)` (spec §4.5). `source_ref` has
    /// already been base64-decoded by the ABI boundary if needed.
    pub fn open_layer(&self, source_ref: &str, target: PathBuf, workdir: PathBuf) -> Result<u64> {
        let readable: Arc<dyn ReadAt> = if let Some(path) = source_ref.strip_prefix("file://") {
            Arc::new(LocalSource::open(Path::new(path))?)
        } else if source_ref.starts_with("http://") || source_ref.starts_with("https://") {
            let timeout = self.config.read().http_timeout;
            let backing_name = crate::source::http::HttpRangeSource::backing_path_for(source_ref);
            let backing_path = workdir.join(&backing_name);
            Arc::new(crate::source::http::HttpRangeSource::open(
                source_ref.to_string(),
                &backing_path,
                timeout,
            )?)
        } else {
            return Err(CoreError::source_error(source_ref, "unsupported source scheme"));
        };

        let toc = {
            let factory = self.toc_factory.lock();
            let factory = factory
                .as_ref()
                .ok_or_else(|| CoreError::source_error(source_ref, "no TOC parser registered"))?;
            factory(readable.clone())?
        };

        let layer = Layer::new(toc, Some(readable), target, workdir);
        let mut layers = self.layers.write();
        let handle = layers.len() as u64;
        layers.push(layer);
        Ok(handle)
    }

    fn with_layer<T>(&self, handle: u64, f: impl FnOnce(&Layer) -> Result<T>) -> Result<T> {
        let layers = self.layers.read();
        let layer = layers
            .get(handle as usize)
            .ok_or_else(|| CoreError::InvalidHandle(handle.to_string()))?;
        f(layer)
    }

    pub fn stat(&self, handle: u64, path: &str) -> Result<StatResult> {
        self.with_layer(handle, |layer| handles::stat(layer, path))
    }

    pub fn wait_for_file(&self, handle: u64, path: &str) -> Result<()> {
        self.with_layer(handle, |layer| handles::wait_for_file(layer, path))
    }

    pub fn getxattr(&self, handle: u64, path: &str, name: &str) -> Result<Vec<u8>> {
        self.with_layer(handle, |layer| handles::getxattr(layer, path, name))
    }

    pub fn listxattr(&self, handle: u64, path: &str) -> Result<Vec<u8>> {
        self.with_layer(handle, |layer| handles::listxattr(layer, path))
    }

    /// `OpenDir`: materializes and snapshots, then registers a fresh
    /// directory handle for `ReadDir`/`CloseDir`.
    pub fn open_dir(&self, handle: u64, path: &str) -> Result<u64> {
        let entries = self.with_layer(handle, |layer| handles::open_dir_snapshot(layer, path))?;

        let mut live = self.dir_handles.lock();
        let mut next = self.next_dir_handle.lock();
        let dir_handle = loop {
            let candidate = *next;
            *next = next.wrapping_add(1);
            if !live.contains_key(&candidate) {
                break candidate;
            }
        };
        live.insert(dir_handle, DirHandleState { entries, pos: 0 });
        Ok(dir_handle)
    }

    /// `ReadDir`: `Ok(Some(entry))` = delivered, `Ok(None)` = end.
    pub fn read_dir(&self, dir_handle: u64) -> Result<Option<DirEntry>> {
        let mut live = self.dir_handles.lock();
        let state = live
            .get_mut(&dir_handle)
            .ok_or_else(|| CoreError::InvalidHandle(dir_handle.to_string()))?;
        if state.pos >= state.entries.len() {
            return Ok(None);
        }
        let entry = state.entries[state.pos].clone();
        state.pos += 1;
        Ok(Some(entry))
    }

    /// `CloseDir`: idempotent, missing handles silently succeed.
    pub fn close_dir(&self, dir_handle: u64) {
        self.dir_handles.lock().remove(&dir_handle);
    }
}
