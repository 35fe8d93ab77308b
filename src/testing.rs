//! Test doubles: a scriptable plugin and an in-memory library loader.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_void};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::plugin::{LibraryId, NativeLibraries, Plugin};

/// Counts plugin calls that ran while another one was still inside.
#[derive(Debug, Default)]
pub struct CallTracker {
    active: AtomicUsize,
    overlaps: AtomicUsize,
}

impl CallTracker {
    fn enter(&self) {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        // Widen the window for a concurrent caller.
        std::thread::yield_now();
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeState {
    pub params: Vec<f32>,
    pub idle_wanted: bool,
    pub idle_calls: usize,
    pub editor_idle_calls: usize,
    pub process_calls: usize,
    pub closed: bool,
    /// Run from inside `editor_idle`, without the state lock held.
    pub editor_idle_hook: Option<Arc<dyn Fn() + Send + Sync>>,
    pub calls: Arc<CallTracker>,
}

pub type SharedFake = Arc<Mutex<FakeState>>;

/// Plugin whose parameters the test can change behind the host's back.
/// Processing halves the input.
pub struct FakePlugin {
    state: SharedFake,
}

pub fn fake_plugin(params: &[f32]) -> (Box<dyn Plugin>, SharedFake) {
    let state = Arc::new(Mutex::new(FakeState {
        params: params.to_vec(),
        ..FakeState::default()
    }));
    (
        Box::new(FakePlugin {
            state: state.clone(),
        }),
        state,
    )
}

impl Plugin for FakePlugin {
    fn idle(&mut self) -> bool {
        let mut s = self.state.lock();
        s.idle_calls += 1;
        s.idle_wanted
    }

    fn editor_idle(&mut self) {
        let (hook, calls) = {
            let mut s = self.state.lock();
            s.editor_idle_calls += 1;
            (s.editor_idle_hook.clone(), s.calls.clone())
        };
        calls.enter();
        if let Some(hook) = hook {
            hook();
        }
        calls.exit();
    }

    fn parameter_count(&self) -> usize {
        self.state.lock().params.len()
    }

    fn parameter(&self, index: usize) -> f32 {
        self.state.lock().params.get(index).copied().unwrap_or(0.0)
    }

    fn set_parameter(&mut self, index: usize, value: f32) {
        if let Some(p) = self.state.lock().params.get_mut(index) {
            *p = value;
        }
    }

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        let calls = {
            let mut s = self.state.lock();
            s.process_calls += 1;
            s.calls.clone()
        };
        calls.enter();
        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            for (o, i) in output.iter_mut().zip(input.iter()).take(frames) {
                *o = *i * 0.5;
            }
        }
        calls.exit();
    }
}

impl Drop for FakePlugin {
    fn drop(&mut self) {
        self.state.lock().closed = true;
    }
}

/// Loader that hands out one id per path and counts loads and unloads.
#[derive(Default)]
pub struct FakeLibraries {
    inner: Mutex<FakeLibrariesInner>,
}

#[derive(Default)]
struct FakeLibrariesInner {
    ids: HashMap<PathBuf, LibraryId>,
    loads: HashMap<LibraryId, u32>,
    unloads: HashMap<LibraryId, u32>,
    exports: HashMap<CString, usize>,
}

impl FakeLibraries {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unloads(&self, lib: LibraryId) -> u32 {
        self.inner.lock().unloads.get(&lib).copied().unwrap_or(0)
    }

    pub fn total_unloads(&self) -> u32 {
        self.inner.lock().unloads.values().sum()
    }

    /// Make `symbol` resolve `name` in every library.
    pub fn export(&self, name: &CStr, addr: *mut c_void) {
        self.inner.lock().exports.insert(name.to_owned(), addr as usize);
    }
}

impl NativeLibraries for FakeLibraries {
    fn load(&self, path: &Path) -> Result<LibraryId> {
        if path.as_os_str().is_empty() {
            return Err(Error::Library {
                path: path.to_path_buf(),
                reason: "empty path".into(),
            });
        }
        let mut inner = self.inner.lock();
        let next = LibraryId::from_raw(0x1000 + inner.ids.len());
        let id = *inner.ids.entry(path.to_path_buf()).or_insert(next);
        *inner.loads.entry(id).or_insert(0) += 1;
        Ok(id)
    }

    fn symbol(&self, _lib: LibraryId, name: &CStr) -> Option<NonNull<c_void>> {
        let addr = *self.inner.lock().exports.get(name)?;
        NonNull::new(addr as *mut c_void)
    }

    fn unload(&self, lib: LibraryId) {
        *self.inner.lock().unloads.entry(lib).or_insert(0) += 1;
    }
}
