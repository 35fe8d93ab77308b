//! VST2 instances: opening, dispatch and the host callback.

use std::ffi::c_void;
use std::path::Path;
use std::ptr;
use std::sync::Weak;

use super::ffi::*;
use crate::error::{Error, Result};
use crate::host::{Handle, Host};
use crate::plugin::{IdleFlags, LibraryId, NativeLibraries, Plugin, PluginKind};

/// What the host callback needs to find its way back to the instance.
/// Boxed and stored in `AEffect::resvd1` for the lifetime of the plugin.
struct CallbackContext {
    host: Weak<Host>,
    handle: Handle,
    sample_rate: f64,
    block_size: usize,
}

/// A running VST2 effect.
pub struct Vst2Plugin {
    effect: *mut AEffect,
    context: *mut CallbackContext,
    input_ptrs: Vec<*mut f32>,
    output_ptrs: Vec<*mut f32>,
    /// Stands in for inputs the caller did not supply.
    silence: Vec<f32>,
    /// Receives outputs the caller did not supply.
    spill: Vec<f32>,
}

// The effect is only ever touched under the owning instance's processing
// lock.
unsafe impl Send for Vst2Plugin {}

unsafe fn dispatch(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize {
    unsafe {
        match (*effect).dispatcher {
            Some(dispatcher) => dispatcher(effect, opcode, index, value, ptr, opt),
            None => 0,
        }
    }
}

impl Vst2Plugin {
    /// Resolve the entry point of an already loaded library, create the
    /// effect and bring it to the processing state.
    ///
    /// # Safety
    /// Calls into plugin code.  `lib` must stay loaded for as long as the
    /// returned object lives.
    unsafe fn open(
        libraries: &dyn NativeLibraries,
        lib: LibraryId,
        path: &Path,
        host: Weak<Host>,
        handle: Handle,
        sample_rate: f64,
        block_size: usize,
    ) -> Result<Self> {
        let entry = libraries
            .symbol(lib, c"VSTPluginMain")
            .or_else(|| libraries.symbol(lib, c"main"))
            .ok_or_else(|| Error::MissingEntryPoint {
                path: path.to_path_buf(),
                symbol: "VSTPluginMain".into(),
            })?;

        unsafe {
            let main: PluginMain = std::mem::transmute::<*mut c_void, PluginMain>(entry.as_ptr());
            let effect = main(host_callback);
            if effect.is_null() || (*effect).magic != VST_MAGIC || (*effect).dispatcher.is_none() {
                return Err(Error::NotAPlugin(path.to_path_buf()));
            }

            let context = Box::into_raw(Box::new(CallbackContext {
                host,
                handle,
                sample_rate,
                block_size,
            }));
            (*effect).resvd1 = context as isize;

            dispatch(effect, EFF_OPEN, 0, 0, ptr::null_mut(), 0.0);
            dispatch(effect, EFF_SET_SAMPLE_RATE, 0, 0, ptr::null_mut(), sample_rate as f32);
            dispatch(effect, EFF_SET_BLOCK_SIZE, 0, block_size as isize, ptr::null_mut(), 0.0);
            dispatch(effect, EFF_MAINS_CHANGED, 0, 1, ptr::null_mut(), 0.0);
            dispatch(effect, EFF_START_PROCESS, 0, 0, ptr::null_mut(), 0.0);

            log::info!(
                "VST2: opened {} (id {:#010x}, {} in / {} out, {} params)",
                path.display(),
                (*effect).unique_id,
                (*effect).num_inputs,
                (*effect).num_outputs,
                (*effect).num_params
            );

            Ok(Self {
                effect,
                context,
                input_ptrs: Vec::new(),
                output_ptrs: Vec::new(),
                silence: vec![0.0; block_size],
                spill: vec![0.0; block_size],
            })
        }
    }

    fn channels(&self) -> (usize, usize) {
        unsafe {
            (
                (*self.effect).num_inputs.max(0) as usize,
                (*self.effect).num_outputs.max(0) as usize,
            )
        }
    }
}

impl Plugin for Vst2Plugin {
    fn idle(&mut self) -> bool {
        unsafe { dispatch(self.effect, EFF_IDLE_DEPRECATED, 0, 0, ptr::null_mut(), 0.0) != 0 }
    }

    fn editor_idle(&mut self) {
        unsafe {
            dispatch(self.effect, EFF_EDIT_IDLE, 0, 0, ptr::null_mut(), 0.0);
        }
    }

    fn parameter_count(&self) -> usize {
        unsafe { (*self.effect).num_params.max(0) as usize }
    }

    fn parameter(&self, index: usize) -> f32 {
        unsafe {
            match (*self.effect).get_parameter {
                Some(get) => get(self.effect, index as i32),
                None => 0.0,
            }
        }
    }

    fn set_parameter(&mut self, index: usize, value: f32) {
        unsafe {
            if let Some(set) = (*self.effect).set_parameter {
                set(self.effect, index as i32, value);
            }
        }
    }

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        let Some(process) = (unsafe { (*self.effect).process_replacing }) else {
            // No replacing entry point: emit silence rather than stale data.
            for output in outputs.iter_mut() {
                let n = output.len().min(frames);
                output[..n].fill(0.0);
            }
            return;
        };
        let frames = inputs
            .iter()
            .map(|b| b.len())
            .chain(outputs.iter().map(|b| b.len()))
            .fold(frames, usize::min);
        if frames == 0 {
            return;
        }
        if self.silence.len() < frames {
            self.silence.resize(frames, 0.0);
            self.spill.resize(frames, 0.0);
        }

        let (num_inputs, num_outputs) = self.channels();
        self.input_ptrs.clear();
        for i in 0..num_inputs {
            let ptr = match inputs.get(i) {
                Some(buf) => buf.as_ptr() as *mut f32,
                None => self.silence.as_mut_ptr(),
            };
            self.input_ptrs.push(ptr);
        }
        self.output_ptrs.clear();
        for i in 0..num_outputs {
            let ptr = match outputs.get_mut(i) {
                Some(buf) => buf.as_mut_ptr(),
                None => self.spill.as_mut_ptr(),
            };
            self.output_ptrs.push(ptr);
        }

        unsafe {
            process(
                self.effect,
                self.input_ptrs.as_mut_ptr(),
                self.output_ptrs.as_mut_ptr(),
                frames as i32,
            );
        }
    }
}

impl Drop for Vst2Plugin {
    fn drop(&mut self) {
        unsafe {
            dispatch(self.effect, EFF_STOP_PROCESS, 0, 0, ptr::null_mut(), 0.0);
            dispatch(self.effect, EFF_MAINS_CHANGED, 0, 0, ptr::null_mut(), 0.0);
            // The effect frees itself here.
            dispatch(self.effect, EFF_CLOSE, 0, 0, ptr::null_mut(), 0.0);
            drop(Box::from_raw(self.context));
        }
    }
}

// ---- Host callback ----

unsafe extern "C" fn host_callback(
    effect: *mut AEffect,
    opcode: i32,
    _index: i32,
    _value: isize,
    _ptr: *mut c_void,
    _opt: f32,
) -> isize {
    // Called before the context is installed while the entry point runs.
    let context = unsafe {
        if effect.is_null() || (*effect).resvd1 == 0 {
            None
        } else {
            Some(&*((*effect).resvd1 as *const CallbackContext))
        }
    };

    match opcode {
        AUDIO_MASTER_VERSION => HOST_VST_VERSION,
        AUDIO_MASTER_CURRENT_ID => {
            if effect.is_null() {
                0
            } else {
                unsafe { (*effect).unique_id as isize }
            }
        }
        AUDIO_MASTER_GET_SAMPLE_RATE => context.map_or(0, |c| c.sample_rate as isize),
        AUDIO_MASTER_GET_BLOCK_SIZE => context.map_or(0, |c| c.block_size as isize),
        AUDIO_MASTER_NEED_IDLE => {
            // Runs inside a dispatch, so only the deferred request is allowed.
            match context.and_then(|c| Some((c.host.upgrade()?, c.handle))) {
                Some((host, handle)) => {
                    log::debug!("VST2: {} asked for idle", handle);
                    host.request_idle(handle, IdleFlags::OUTSIDE_EDIT) as isize
                }
                None => 0,
            }
        }
        AUDIO_MASTER_IDLE => 1,
        AUDIO_MASTER_AUTOMATE => 0,
        _ => {
            log::trace!("VST2: unhandled host opcode {}", opcode);
            0
        }
    }
}

impl Host {
    /// Load a VST2 library and open an instance of it.
    ///
    /// On failure the library is released immediately; nothing from it can
    /// still be running at that point.
    pub fn open_vst2(
        &self,
        path: &Path,
        kind: PluginKind,
        requested: Option<Handle>,
    ) -> Result<Handle> {
        let sample_rate = self.config().sample_rate;
        let block_size = self.config().block_size;

        self.open_with(kind, requested, |handle| {
            let libraries = self.libraries();
            let lib = libraries.load(path)?;
            let opened = unsafe {
                Vst2Plugin::open(
                    libraries,
                    lib,
                    path,
                    self.weak(),
                    handle,
                    sample_rate,
                    block_size,
                )
            };
            match opened {
                Ok(plugin) => Ok((Box::new(plugin) as Box<dyn Plugin>, Some(lib))),
                Err(e) => {
                    log::error!("VST2: cannot open {}: {}", path.display(), e);
                    libraries.unload(lib);
                    Err(e)
                }
            }
        })
    }
}
