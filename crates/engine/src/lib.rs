//! cdchook Engine - Main Module Discovery and Global Storage
//!
//! This crate handles:
//! - Locating the game's main executable module in the current process
//! - Storing process-wide engine state set once at startup
//! - Publishing the device manager once the rendering device exists
//!
//! # Architecture
//!
//! The main module is located via [`loader::main_module`] and stored in
//! [`globals::EngineGlobals`]. The device manager is published later, from
//! the device-ready transition.

pub mod error;
pub mod globals;
pub mod loader;

pub use error::EngineError;
pub use globals::{engine, init_engine, EngineGlobals};
pub use loader::{main_module, ModuleInfo};
