//! Feature module registry
//!
//! Modules react to the lifecycle events the Hook Core dispatches. Every
//! event is delivered to every module in registration order; later modules
//! may rely on state set up by earlier ones.
//!
//! A module is identified by its [`ModuleKind`]; the registry holds at most
//! one module per kind.
//!
//! # Example
//!
//! ```ignore
//! use cdchook_core::modules::{Module, ModuleKind, ModuleRegistry};
//!
//! #[derive(Default)]
//! struct FrameCounter(u64);
//!
//! impl Module for FrameCounter {
//!     fn on_frame(&mut self) {
//!         self.0 += 1;
//!     }
//! }
//!
//! let mut registry = ModuleRegistry::new();
//! registry.register(ModuleKind::Draw, FrameCounter::default())?;
//! ```

pub mod catalog;

use std::fmt;

use cdchook_sdk::WindowMessage;

pub use catalog::{module_plan, register_plan, ModuleFactory, ModuleKind};

/// A feature module driven by the Hook Core
///
/// All hooks default to no-ops.
pub trait Module: Send {
    /// Called once, after the rendering device exists
    fn on_post_initialize(&mut self) {}

    /// Called for every window message, after the menu has seen it
    fn on_input(&mut self, _message: &WindowMessage) {}

    /// Called once per render flush
    fn on_frame(&mut self) {}

    /// Called once per game logic tick
    fn on_loop(&mut self) {}
}

/// Stable identifier of a registered module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u64);

impl ModuleId {
    /// Identifier derived from a name
    pub const fn named(name: &str) -> Self {
        Self(fnv1a_64(name.as_bytes()))
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// FNV-1a 64-bit hash (compile-time capable)
const fn fnv1a_64(data: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001B3;

    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < data.len() {
        hash ^= data[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Module registry errors
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The same module was registered twice
    #[error("Module '{name}' ({id}) is already registered")]
    Duplicate { name: String, id: ModuleId },
}

struct ModuleEntry {
    kind: ModuleKind,
    module: Box<dyn Module>,
}

/// Ordered set of modules, at most one per kind
#[derive(Default)]
pub struct ModuleRegistry {
    entries: Vec<ModuleEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module as `kind`
    pub fn register<M: Module + 'static>(
        &mut self,
        kind: ModuleKind,
        module: M,
    ) -> Result<ModuleId, ModuleError> {
        self.register_boxed(kind, Box::new(module))
    }

    /// Register an already boxed module as `kind`
    pub fn register_boxed(
        &mut self,
        kind: ModuleKind,
        module: Box<dyn Module>,
    ) -> Result<ModuleId, ModuleError> {
        let id = kind.id();
        if self.contains(kind) {
            tracing::error!("Module '{}' registered twice", kind);
            return Err(ModuleError::Duplicate {
                name: kind.name().to_string(),
                id,
            });
        }

        tracing::debug!("Registered module '{}' ({})", kind, id);
        self.entries.push(ModuleEntry { kind, module });
        Ok(id)
    }

    pub fn contains(&self, kind: ModuleKind) -> bool {
        self.entries.iter().any(|entry| entry.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Module names in registration order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|entry| entry.kind.name())
    }

    /// Visit every module in registration order
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut dyn Module)) {
        for entry in &mut self.entries {
            f(entry.module.as_mut());
        }
    }

    pub fn post_initialize_all(&mut self) {
        self.for_each_mut(|module| module.on_post_initialize());
    }

    pub fn input_all(&mut self, message: &WindowMessage) {
        self.for_each_mut(|module| module.on_input(message));
    }

    pub fn frame_all(&mut self) {
        self.for_each_mut(|module| module.on_frame());
    }

    pub fn loop_all(&mut self) {
        self.for_each_mut(|module| module.on_loop());
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
