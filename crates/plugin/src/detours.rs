//! Detours installed into the game
//!
//! Each detour reaches its original through a [`DetourSlot`] filled in before
//! the hooks are enabled. Rust panics never cross back into game frames.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};

use cdchook_core::hooks::DetourSlot;
use cdchook_sdk::signatures::names;
use cdchook_sdk::{DeviceInitFn, FontFlushFn, GameLoopFn, WindowMessage, WndProcFn};
use cdchook_core::HookTarget;

use crate::host;

pub static DEVICE_INIT: DetourSlot = DetourSlot::new();
pub static GAME_LOOP: DetourSlot = DetourSlot::new();
pub static FONT_FLUSH: DetourSlot = DetourSlot::new();
pub static WND_PROC: DetourSlot = DetourSlot::new();

/// The device-init hook, required
pub fn device_init_target() -> HookTarget<'static> {
    HookTarget {
        name: names::DEVICE_INIT,
        detour: device_init as DeviceInitFn as *const (),
        slot: &DEVICE_INIT,
    }
}

/// Pipeline hooks installed when gamedata knows their signatures
pub fn optional_targets() -> [HookTarget<'static>; 3] {
    [
        HookTarget {
            name: names::GAME_LOOP,
            detour: game_loop as GameLoopFn as *const (),
            slot: &GAME_LOOP,
        },
        HookTarget {
            name: names::FONT_FLUSH,
            detour: font_flush as FontFlushFn as *const (),
            slot: &FONT_FLUSH,
        },
        HookTarget {
            name: names::WND_PROC,
            detour: wnd_proc as WndProcFn as *const (),
            slot: &WND_PROC,
        },
    ]
}

fn guarded(what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("Panic during {} dispatch", what);
    }
}

unsafe extern "C" fn device_init() -> bool {
    let Some(original) = DEVICE_INIT.get() else {
        tracing::error!("Device init detour reached without an original");
        return false;
    };
    let original = std::mem::transmute::<*const (), DeviceInitFn>(original);

    let result = original();
    if let Some(hook) = crate::hook() {
        guarded("device init", || {
            hook.handle.intercept_init(&hook.image, || result);
        });
    }
    result
}

unsafe extern "C" fn game_loop() {
    guarded("loop", host::dispatch_loop);
    if let Some(original) = GAME_LOOP.get() {
        std::mem::transmute::<*const (), GameLoopFn>(original)();
    }
}

unsafe extern "C" fn font_flush() {
    guarded("flush", host::dispatch_flush);
    if let Some(original) = FONT_FLUSH.get() {
        std::mem::transmute::<*const (), FontFlushFn>(original)();
    }
}

unsafe extern "system" fn wnd_proc(hwnd: *mut c_void, msg: u32, wparam: usize, lparam: isize) -> isize {
    let message = WindowMessage::new(hwnd as usize, msg, wparam, lparam);
    guarded("message", || host::dispatch_message(&message));

    match WND_PROC.get() {
        Some(original) => std::mem::transmute::<*const (), WndProcFn>(original)(hwnd, msg, wparam, lparam),
        None => 0,
    }
}
