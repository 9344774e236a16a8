//! Per-build module catalog
//!
//! Both game builds share a common set of modules; each build adds its own
//! on top. The catalog fixes the registration order.

use std::fmt;

use crate::gamedata::GameVariant;

use super::{Module, ModuleError, ModuleId, ModuleRegistry};

/// Every module the hook knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Log,
    Options,
    MainMenu,
    Instance,
    Skew,
    ModLoader,
    Patches,
    FreeCamera,
    Draw,
    // Legend only
    Level,
    Frontend,
    Render,
    Debug,
    // Underworld only
    ScriptLog,
    Materials,
}

const SHARED: &[ModuleKind] = &[
    ModuleKind::Log,
    ModuleKind::Options,
    ModuleKind::MainMenu,
    ModuleKind::Instance,
    ModuleKind::Skew,
    ModuleKind::ModLoader,
    ModuleKind::Patches,
    ModuleKind::FreeCamera,
    ModuleKind::Draw,
];

const LEGEND_ONLY: &[ModuleKind] = &[
    ModuleKind::Level,
    ModuleKind::Frontend,
    ModuleKind::Render,
    ModuleKind::Debug,
];

const UNDERWORLD_ONLY: &[ModuleKind] = &[ModuleKind::ScriptLog, ModuleKind::Materials];

impl ModuleKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Log => "Log",
            Self::Options => "Options",
            Self::MainMenu => "MainMenu",
            Self::Instance => "Instance",
            Self::Skew => "Skew",
            Self::ModLoader => "ModLoader",
            Self::Patches => "Patches",
            Self::FreeCamera => "FreeCamera",
            Self::Draw => "Draw",
            Self::Level => "Level",
            Self::Frontend => "Frontend",
            Self::Render => "Render",
            Self::Debug => "Debug",
            Self::ScriptLog => "ScriptLog",
            Self::Materials => "Materials",
        }
    }

    /// Registry identifier for a factory-built module of this kind
    pub const fn id(self) -> ModuleId {
        ModuleId::named(self.name())
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Modules for a game build, in registration order
pub fn module_plan(variant: GameVariant) -> Vec<ModuleKind> {
    let extra = match variant {
        GameVariant::Legend => LEGEND_ONLY,
        GameVariant::Underworld => UNDERWORLD_ONLY,
    };
    SHARED.iter().chain(extra).copied().collect()
}

/// Builds the module instances shipped with a binary
pub trait ModuleFactory {
    /// Create the module for `kind`, or `None` if this build does not ship it
    fn create(&mut self, kind: ModuleKind) -> Option<Box<dyn Module>>;
}

/// Register every module of `variant` that `factory` provides
///
/// Returns the number of modules registered.
#[tracing::instrument(skip(registry, factory))]
pub fn register_plan(
    registry: &mut ModuleRegistry,
    variant: GameVariant,
    factory: &mut dyn ModuleFactory,
) -> Result<usize, ModuleError> {
    let mut registered = 0;

    for kind in module_plan(variant) {
        match factory.create(kind) {
            Some(module) => {
                registry.register_boxed(kind, module)?;
                registered += 1;
            }
            None => tracing::debug!("Module {} not shipped in this build", kind),
        }
    }

    tracing::info!("Registered {} modules for {}", registered, variant);
    Ok(registered)
}
