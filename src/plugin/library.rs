//! Native library loading primitives.
//!
//! Loading is refcounted by the platform loader: opening the same path twice
//! yields the same [`LibraryId`] and needs two `unload` calls.  The host
//! relies on that when it flushes deferred unloads.

use std::ffi::{CStr, CString, c_void};
use std::path::Path;
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Opaque identity of a loaded library (the loader's handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryId(usize);

impl LibraryId {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

pub trait NativeLibraries: Send + Sync {
    fn load(&self, path: &Path) -> Result<LibraryId>;

    /// Address of an exported symbol, if the library has it.
    fn symbol(&self, lib: LibraryId, name: &CStr) -> Option<NonNull<c_void>>;

    /// Drop one load reference.  The code is unmapped when the last one goes.
    fn unload(&self, lib: LibraryId);
}

/// `dlopen`-based loader.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DlLibraries;

#[cfg(unix)]
fn dl_error() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown error".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

#[cfg(unix)]
impl NativeLibraries for DlLibraries {
    fn load(&self, path: &Path) -> Result<LibraryId> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::Library {
            path: path.to_path_buf(),
            reason: "path contains a NUL byte".into(),
        })?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(Error::Library {
                path: path.to_path_buf(),
                reason: dl_error(),
            });
        }

        log::debug!("dlopen {} -> {:p}", path.display(), handle);
        Ok(LibraryId(handle as usize))
    }

    fn symbol(&self, lib: LibraryId, name: &CStr) -> Option<NonNull<c_void>> {
        NonNull::new(unsafe { libc::dlsym(lib.0 as *mut c_void, name.as_ptr()) })
    }

    fn unload(&self, lib: LibraryId) {
        if unsafe { libc::dlclose(lib.0 as *mut c_void) } != 0 {
            log::warn!("dlclose {:#x} failed: {}", lib.0, dl_error());
        } else {
            log::debug!("dlclose {:#x}", lib.0);
        }
    }
}
