//! Error taxonomy for the core, and the POSIX errno mapping the ABI boundary returns.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad source URL, failed HEAD, or zero content length. Fatal at `OpenLayer`.
    #[error("source error for {source_ref}: {message}")]
    Source { source_ref: String, message: String },

    /// TOC lookup miss.
    #[error("no such entry: {0}")]
    NotFound(String),

    /// Entry has no xattr with the requested name.
    #[error("no xattr {name} on {path}")]
    NoXattr { path: String, name: String },

    /// Unknown layer or directory handle.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// A hardlink entry's target forms a cycle back to itself.
    #[error("hardlink cycle detected at {0}")]
    HardlinkCycle(String),

    /// I/O failure materializing an on-disk artifact or writing the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network failure, short read, or bad HTTP status fetching a range.
    #[error("range fetch failed for {url} at offset {offset}: {message}")]
    RangeFetch {
        url: String,
        offset: u64,
        message: String,
    },

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    pub fn source_error(source_ref: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Source {
            source_ref: source_ref.into(),
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        CoreError::NotFound(path.into().display().to_string())
    }

    /// Map to the POSIX errno the ABI boundary returns. Unknown errors map to `-EINVAL`.
    pub fn to_errno(&self) -> i32 {
        match self {
            CoreError::NotFound(_) => libc::ENOENT,
            CoreError::NoXattr { .. } => libc::ENODATA,
            CoreError::InvalidHandle(_) => libc::EINVAL,
            CoreError::HardlinkCycle(_) => libc::ELOOP,
            // Network/IO failures during a range fetch or stream copy surface to the
            // caller as ENOENT ("file not readable right now"); retry is the caller's job.
            CoreError::Io(_) | CoreError::RangeFetch { .. } => libc::ENOENT,
            CoreError::Source { .. } => libc::EINVAL,
            CoreError::Other(_) => libc::EINVAL,
        }
    }
}
