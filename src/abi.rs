//! The exported C ABI (spec §6). All string parameters are NUL-terminated
//! byte sequences; returned strings/buffers are heap-allocated and the
//! caller owns them — pass them back to `FreeString`/`FreeBuffer` to release.
//! Every status integer is `≥0` (success or handle) or the negation of a
//! POSIX errno; unknown failures map to `-EINVAL`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::CoreError;
use crate::service::service;

unsafe fn borrow_str<'a>(ptr: *const c_char) -> Result<&'a str, i32> {
    if ptr.is_null() {
        return Err(-libc::EINVAL);
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| -libc::EINVAL)
}

fn decode_source_ref(raw: &str) -> Result<String, i32> {
    let bytes = BASE64.decode(raw).map_err(|_| -libc::EINVAL)?;
    String::from_utf8(bytes).map_err(|_| -libc::EINVAL)
}

/// `#[repr(C)]` mirror of the 11-field struct `Stat` returns (spec §4.5).
#[repr(C)]
pub struct StargzStat {
    pub kind: i32,
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

impl From<crate::handles::StatResult> for StargzStat {
    fn from(s: crate::handles::StatResult) -> Self {
        StargzStat {
            kind: s.kind as i32,
            inode: s.inode,
            mode: s.mode,
            nlink: s.nlink,
            uid: s.uid,
            gid: s.gid,
            rdev_major: s.rdev_major,
            rdev_minor: s.rdev_minor,
            size: s.size,
            mtime_ns: s.mtime_ns,
        }
    }
}

/// `OpenLayer(sourceRef, target, workdir) -> handle >= 0`. `sourceRef` is
/// always base64-encoded (matching the original exported symbol).
#[no_mangle]
pub unsafe extern "C" fn OpenLayer(source_ref: *const c_char, target: *const c_char, workdir: *const c_char) -> i64 {
    let source_ref = match borrow_str(source_ref) {
        Ok(s) => s,
        Err(e) => return e as i64,
    };
    let target = match borrow_str(target) {
        Ok(s) => s,
        Err(e) => return e as i64,
    };
    let workdir = match borrow_str(workdir) {
        Ok(s) => s,
        Err(e) => return e as i64,
    };
    let decoded = match decode_source_ref(source_ref) {
        Ok(s) => s,
        Err(e) => return e as i64,
    };

    tracing::debug!(source = %decoded, target, workdir, "OpenLayer");
    match service().open_layer(&decoded, PathBuf::from(target), PathBuf::from(workdir)) {
        Ok(handle) => handle as i64,
        Err(e) => {
            tracing::warn!(error = %e, "OpenLayer failed");
            -(e.to_errno() as i64)
        }
    }
}

/// `NumOfLayers(sourceRef, target) -> 1`, reserved for future multi-layer sources.
#[no_mangle]
pub unsafe extern "C" fn NumOfLayers(source_ref: *const c_char, _target: *const c_char) -> i64 {
    let source_ref = match borrow_str(source_ref) {
        Ok(s) => s,
        Err(e) => return e as i64,
    };
    match decode_source_ref(source_ref) {
        Ok(_) => 1,
        Err(e) => e as i64,
    }
}

/// `Stat(handle, path) -> status` and fills `*out` on success.
#[no_mangle]
pub unsafe extern "C" fn Stat(handle: u64, path: *const c_char, out: *mut StargzStat) -> i32 {
    let path = match borrow_str(path) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if out.is_null() {
        return -libc::EINVAL;
    }
    match service().stat(handle, path) {
        Ok(result) => {
            *out = result.into();
            0
        }
        Err(e) => -e.to_errno(),
    }
}

/// `OpenDir(handle, path) -> dirHandle | -errno`.
#[no_mangle]
pub unsafe extern "C" fn OpenDir(handle: u64, path: *const c_char) -> i64 {
    let path = match borrow_str(path) {
        Ok(s) => s,
        Err(e) => return e as i64,
    };
    match service().open_dir(handle, path) {
        Ok(dir_handle) => dir_handle as i64,
        Err(e) => -(e.to_errno() as i64),
    }
}

/// `ReadDir(dirHandle) -> (status, inode, name, kind)`. Status: `1` =
/// delivered, `0` = end, negative = error. `*out_name` is heap-allocated and
/// owned by the caller (`FreeString` releases it) only when status is `1`.
#[no_mangle]
pub unsafe extern "C" fn ReadDir(
    dir_handle: u64,
    out_inode: *mut u64,
    out_name: *mut *mut c_char,
    out_kind: *mut u8,
) -> i32 {
    if out_inode.is_null() || out_name.is_null() || out_kind.is_null() {
        return -libc::EINVAL;
    }
    match service().read_dir(dir_handle) {
        Ok(Some(entry)) => {
            *out_inode = entry.inode;
            *out_kind = entry.dirent_kind;
            *out_name = match CString::new(entry.name) {
                Ok(c) => c.into_raw(),
                Err(_) => return -libc::EINVAL,
            };
            1
        }
        Ok(None) => 0,
        Err(e) => -e.to_errno(),
    }
}

/// `CloseDir(dirHandle) -> 0`. Idempotent; missing handles silently succeed.
#[no_mangle]
pub unsafe extern "C" fn CloseDir(dir_handle: u64) -> i32 {
    service().close_dir(dir_handle);
    0
}

/// `WaitForFile(handle, path) -> 0 | -errno`.
#[no_mangle]
pub unsafe extern "C" fn WaitForFile(handle: u64, path: *const c_char) -> i32 {
    let path = match borrow_str(path) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match service().wait_for_file(handle, path) {
        Ok(()) => 0,
        Err(e) => -e.to_errno(),
    }
}

/// `Getxattr(handle, path, name) -> (len, bytes) | -ENOENT | -ENODATA`.
#[no_mangle]
pub unsafe extern "C" fn Getxattr(
    handle: u64,
    path: *const c_char,
    name: *const c_char,
    out_buf: *mut *mut u8,
    out_len: *mut usize,
) -> i32 {
    let path = match borrow_str(path) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let name = match borrow_str(name) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if out_buf.is_null() || out_len.is_null() {
        return -libc::EINVAL;
    }
    match service().getxattr(handle, path, name) {
        Ok(bytes) => {
            write_owned_buffer(bytes, out_buf, out_len);
            0
        }
        Err(e) => -e.to_errno(),
    }
}

/// `Listxattr(handle, path) -> (len, bytes)`.
#[no_mangle]
pub unsafe extern "C" fn Listxattr(handle: u64, path: *const c_char, out_buf: *mut *mut u8, out_len: *mut usize) -> i32 {
    let path = match borrow_str(path) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if out_buf.is_null() || out_len.is_null() {
        return -libc::EINVAL;
    }
    match service().listxattr(handle, path) {
        Ok(bytes) => {
            write_owned_buffer(bytes, out_buf, out_len);
            0
        }
        Err(e) => -e.to_errno(),
    }
}

unsafe fn write_owned_buffer(bytes: Vec<u8>, out_buf: *mut *mut u8, out_len: *mut usize) {
    let boxed = bytes.into_boxed_slice();
    *out_len = boxed.len();
    *out_buf = Box::into_raw(boxed) as *mut u8;
}

/// Lifecycle hook: idempotent logging/config init. May be called more than once.
#[no_mangle]
pub unsafe extern "C" fn Load() -> i32 {
    crate::logging::init_logging();
    0
}

/// Lifecycle hook. Empty: the core keeps no per-process resource that must
/// be torn down before exit (backing files and handles outlive `Release`).
#[no_mangle]
pub unsafe extern "C" fn Release() -> i32 {
    0
}

/// Frees a NUL-terminated string returned by `ReadDir`.
#[no_mangle]
pub unsafe extern "C" fn FreeString(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Frees a buffer returned by `Getxattr`/`Listxattr`.
#[no_mangle]
pub unsafe extern "C" fn FreeBuffer(ptr: *mut u8, len: usize) {
    if !ptr.is_null() {
        drop(Vec::from_raw_parts(ptr, len, len));
    }
}
