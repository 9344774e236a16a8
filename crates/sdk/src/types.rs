//! Engine type definitions
//!
//! The game is a 32-bit executable built with MSVC. We never need the full
//! layout of its objects, only pointers to them; field access goes through
//! offsets supplied by gamedata.

use std::ffi::c_void;

/// Opaque type for cdc::PCDeviceManager
/// Owns the Direct3D device; published once the device exists
#[repr(C)]
pub struct PCDeviceManager {
    _opaque: [u8; 0],
}

/// Opaque type for a live game instance (entity)
/// Linked into the game's active instance list
#[repr(C)]
pub struct Instance {
    _opaque: [u8; 0],
}

/// Opaque type for the object definition an instance was spawned from
/// Carries the display name
#[repr(C)]
pub struct Object {
    _opaque: [u8; 0],
}

/// A window message as delivered by the host's input pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    /// Window handle
    pub hwnd: usize,
    /// Message id (WM_*)
    pub msg: u32,
    /// WPARAM
    pub wparam: usize,
    /// LPARAM
    pub lparam: isize,
}

impl WindowMessage {
    pub const fn new(hwnd: usize, msg: u32, wparam: usize, lparam: isize) -> Self {
        Self {
            hwnd,
            msg,
            wparam,
            lparam,
        }
    }
}

/// Device initialization routine intercepted at startup
pub type DeviceInitFn = unsafe extern "C" fn() -> bool;

/// INSTANCE_ReallyRemoveInstance(instance, reserved, graceful)
pub type RemoveInstanceFn = unsafe extern "C" fn(instance: *mut Instance, reserved: i32, graceful: bool);

/// Game window procedure
pub type WndProcFn =
    unsafe extern "system" fn(hwnd: *mut c_void, msg: u32, wparam: usize, lparam: isize) -> isize;

/// Per-tick game loop step
pub type GameLoopFn = unsafe extern "C" fn();

/// Font batch flush, called once per rendered frame
pub type FontFlushFn = unsafe extern "C" fn();

/// Capacity of an object's name buffer (including the terminator slot)
pub const OBJECT_NAME_CAPACITY: usize = 64;
