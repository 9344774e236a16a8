//! Global engine state storage
//!
//! The main module is located once at startup and stored here. The device
//! manager arrives later, from the device-ready transition, and is read by
//! feature modules once it has been published.

use std::ptr::NonNull;
use std::sync::OnceLock;

use parking_lot::RwLock;

use cdchook_sdk::PCDeviceManager;

use crate::error::EngineError;
use crate::loader::ModuleInfo;

/// Global engine state
pub struct EngineGlobals {
    /// Main executable module (scan target)
    pub main_module: ModuleInfo,

    /// Device manager instance - set by the device-ready transition
    device_manager: RwLock<Option<NonNull<PCDeviceManager>>>,
}

// SAFETY: The device manager pointer is owned by the game and lives for the
// rest of the process. Access to it is synchronized via RwLock.
unsafe impl Send for EngineGlobals {}
unsafe impl Sync for EngineGlobals {}

/// Global engine state storage
static ENGINE: OnceLock<EngineGlobals> = OnceLock::new();

/// Initialize engine globals
///
/// Called once during startup. Returns error if already initialized.
pub fn init_engine(globals: EngineGlobals) -> Result<(), EngineError> {
    ENGINE
        .set(globals)
        .map_err(|_| EngineError::AlreadyInitialized)
}

/// Get engine globals, if initialized
pub fn engine() -> Option<&'static EngineGlobals> {
    ENGINE.get()
}

impl EngineGlobals {
    pub fn new(main_module: ModuleInfo) -> Self {
        Self {
            main_module,
            device_manager: RwLock::new(None),
        }
    }

    /// Get device manager pointer (None until the device exists)
    pub fn device_manager_ptr(&self) -> Option<*mut PCDeviceManager> {
        self.device_manager.read().map(|nn| nn.as_ptr())
    }

    /// Set device manager pointer
    ///
    /// Called from the device-ready transition. Null pointers are ignored.
    pub fn set_device_manager(&self, ptr: *mut PCDeviceManager) {
        if let Some(nn) = NonNull::new(ptr) {
            *self.device_manager.write() = Some(nn);
            tracing::info!("PCDeviceManager set: {:p}", ptr);
        } else {
            tracing::warn!("Ignoring null PCDeviceManager");
        }
    }
}
