//! cdchook - injectable library
//!
//! Loaded into the game process before it initializes its rendering device.
//! The entry point reads the config, attaches a console, installs the hooks
//! and returns; everything else happens on the game's own threads through
//! the detours.

#[cfg(panic = "abort")]
compile_error!("cdchook contains panics with catch_unwind and must be built with panic = \"unwind\"");

mod console;
pub mod detours;
pub mod host;
mod logging;
pub mod modules;

use std::sync::OnceLock;

use tracing::info;

use cdchook_core::config::{self, HookConfig};
use cdchook_engine::{init_engine, main_module, EngineError, EngineGlobals};
use cdchook_core::entities::game_sweep;
use cdchook_core::{CoreError, Gamedata, HookCore, HookHandle, InlineHooks, LiveImage};

pub use cdchook_core::shutdown;

use crate::host::GameHost;
use crate::modules::ShippedModules;

/// The installed hook, reachable from the detours
pub(crate) struct Hook {
    pub(crate) handle: HookHandle,
    pub(crate) image: LiveImage,
}

static HOOK: OnceLock<Hook> = OnceLock::new();

pub(crate) fn hook() -> Option<&'static Hook> {
    HOOK.get()
}

/// Bring the hook up
///
/// Must run before the game initializes its rendering device. On failure no
/// game code has been modified.
#[tracing::instrument(skip_all)]
pub fn initialize() -> Result<(), CoreError> {
    let (config, config_error) = match HookConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (HookConfig::default(), Some(e)),
    };

    if config.console {
        console::attach();
    }
    logging::init(config.log_level());
    logging::set_panic_hook();

    if let Some(e) = config_error {
        tracing::warn!("Using default config: {}", e);
    }
    info!("cdchook loading for {}...", config.variant);

    let module = main_module()?;
    init_engine(EngineGlobals::new(module.clone()))?;

    let gamedata = Gamedata::load_or_builtin(config.variant, config::gamedata_path()?)?;
    let sweep = game_sweep(&config.sweep, &gamedata, &module);

    let mut core = HookCore::new(config, Box::new(GameHost));
    core.set_sweep(sweep);

    // Published before any hook is enabled, the detours may fire right away
    HOOK.set(Hook {
        handle: HookHandle::new(core),
        // SAFETY: the main module stays mapped for the life of the process
        image: unsafe { LiveImage::new(module) },
    })
    .map_err(|_| EngineError::AlreadyInitialized)?;
    let hook = HOOK.get().ok_or(EngineError::NotInitialized)?;

    let mut installer = InlineHooks::new();
    let optional = detours::optional_targets();
    let result = hook.handle.lock().initialize(
        &hook.image,
        &gamedata,
        &mut ShippedModules,
        &mut installer,
        detours::device_init_target(),
        &optional,
    );

    match &result {
        Ok(()) => info!("cdchook installed, waiting for the device"),
        Err(e) => tracing::error!("Hook installation aborted: {}", e),
    }
    result
}

#[cfg(windows)]
mod entry {
    use std::ffi::c_void;

    use windows::Win32::Foundation::{BOOL, HINSTANCE, TRUE};
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    #[no_mangle]
    unsafe extern "system" fn DllMain(_module: HINSTANCE, reason: u32, reserved: *mut c_void) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                let outcome = std::panic::catch_unwind(super::initialize);
                if !matches!(outcome, Ok(Ok(()))) {
                    // The game keeps running unhooked
                    tracing::error!("cdchook failed to start");
                }
            }
            // Only on FreeLibrary; at process exit the game's code may already be gone
            DLL_PROCESS_DETACH if reserved.is_null() => {
                let _ = std::panic::catch_unwind(super::shutdown);
            }
            _ => {}
        }
        TRUE
    }
}
