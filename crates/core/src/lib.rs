//! cdchook - core logic
//!
//! Everything between the process entry point and the feature modules:
//! signature scanning, function hooks, the module registry, the entity
//! sweep and the Hook Core that ties them to the game's pipelines.
//!
//! # Re-exports
//!
//! This crate re-exports the SDK and engine crates for convenience:
//! - [`sdk`] - foreign types, function signatures and built-in patterns
//! - [`engine`] - engine globals and main module discovery

use tracing::info;

// Re-export SDK and engine crates
pub use cdchook_engine as engine;
pub use cdchook_sdk as sdk;

pub mod config;
pub mod entities;
pub mod gamedata;
pub mod hook_core;
pub mod hooks;
pub mod host;
pub mod memory;
pub mod modules;

// Re-export commonly used items
pub use config::{ConfigError, ConfigResult, HookConfig, SweepConfig};
pub use entities::{
    EntityDestroyer, EntityHandle, EntityList, EntitySweep, PointerValidator, SweepReport,
    VisitedEntity,
};
pub use gamedata::{GameVariant, Gamedata, GamedataError, PatternMatch, ScanError};
pub use hook_core::{CoreError, HookCore, HookHandle, HookState, HookTarget};
pub use hooks::{DetourSlot, HookError, HookInstaller, InlineHooks};
pub use host::{Host, Menu, MessageHandler, TickHandler};
pub use memory::{LiveImage, ProcessImage};
pub use modules::{Module, ModuleError, ModuleFactory, ModuleId, ModuleKind, ModuleRegistry};

/// Shutdown the hook
///
/// Restores the original bytes of every hooked function. Called when the
/// library is unloaded before the process exits.
pub fn shutdown() {
    info!("cdchook shutting down...");
    if let Err(e) = hooks::disable_all_inline_hooks() {
        tracing::error!("Failed to disable hooks: {}", e);
    }
}
