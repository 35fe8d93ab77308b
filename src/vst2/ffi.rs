//! Hand-written VST 2.4 ABI: the `AEffect` struct, the host callback
//! signature and the opcodes the host uses.

#![allow(non_camel_case_types)]

use std::ffi::c_void;

/// `'VstP'`
pub const VST_MAGIC: i32 = 0x5673_7450;

/// Version reported for `audioMasterVersion`.
pub const HOST_VST_VERSION: isize = 2400;

// ── Effect opcodes (host → plugin) ──

pub const EFF_OPEN: i32 = 0;
pub const EFF_CLOSE: i32 = 1;
pub const EFF_SET_SAMPLE_RATE: i32 = 10;
pub const EFF_SET_BLOCK_SIZE: i32 = 11;
pub const EFF_MAINS_CHANGED: i32 = 12;
pub const EFF_EDIT_IDLE: i32 = 19;
/// Legacy `effIdle`, removed from the 2.4 headers but still answered by
/// plugins that asked for `audioMasterNeedIdle`.
pub const EFF_IDLE_DEPRECATED: i32 = 53;
pub const EFF_START_PROCESS: i32 = 71;
pub const EFF_STOP_PROCESS: i32 = 72;

// ── Host opcodes (plugin → host) ──

pub const AUDIO_MASTER_AUTOMATE: i32 = 0;
pub const AUDIO_MASTER_VERSION: i32 = 1;
pub const AUDIO_MASTER_CURRENT_ID: i32 = 2;
pub const AUDIO_MASTER_IDLE: i32 = 3;
pub const AUDIO_MASTER_NEED_IDLE: i32 = 14;
pub const AUDIO_MASTER_GET_SAMPLE_RATE: i32 = 16;
pub const AUDIO_MASTER_GET_BLOCK_SIZE: i32 = 17;

pub type HostCallback = unsafe extern "C" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

pub type DispatcherProc = unsafe extern "C" fn(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    ptr: *mut c_void,
    opt: f32,
) -> isize;

pub type ProcessProc =
    unsafe extern "C" fn(effect: *mut AEffect, inputs: *mut *mut f32, outputs: *mut *mut f32, frames: i32);

pub type ProcessDoubleProc =
    unsafe extern "C" fn(effect: *mut AEffect, inputs: *mut *mut f64, outputs: *mut *mut f64, frames: i32);

pub type SetParameterProc = unsafe extern "C" fn(effect: *mut AEffect, index: i32, value: f32);

pub type GetParameterProc = unsafe extern "C" fn(effect: *mut AEffect, index: i32) -> f32;

/// Plugin entry point (`VSTPluginMain`, or `main` in old plugins).
pub type PluginMain = unsafe extern "C" fn(callback: HostCallback) -> *mut AEffect;

#[repr(C)]
pub struct AEffect {
    pub magic: i32,
    pub dispatcher: Option<DispatcherProc>,
    /// Accumulating process, deprecated.
    pub process: Option<ProcessProc>,
    pub set_parameter: Option<SetParameterProc>,
    pub get_parameter: Option<GetParameterProc>,
    pub num_programs: i32,
    pub num_params: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub flags: i32,
    /// Reserved for the host; holds the callback context.
    pub resvd1: isize,
    pub resvd2: isize,
    pub initial_delay: i32,
    pub real_qualities: i32,
    pub off_qualities: i32,
    pub io_ratio: f32,
    pub object: *mut c_void,
    pub user: *mut c_void,
    pub unique_id: i32,
    pub version: i32,
    pub process_replacing: Option<ProcessProc>,
    pub process_double_replacing: Option<ProcessDoubleProc>,
    pub future: [u8; 56],
}
