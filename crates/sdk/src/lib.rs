//! cdchook SDK - Foreign Engine Type Definitions
//!
//! This crate contains the types shared with the game executable: opaque
//! engine objects, the window message record, foreign function signatures,
//! and the byte patterns that locate them. It has no dependencies.
//!
//! # Modules
//!
//! - [`types`] - Opaque engine types and foreign function signatures
//! - [`signatures`] - Built-in byte patterns and gamedata entry names

pub mod signatures;
pub mod types;

pub use signatures::BUILTIN_SIGNATURES;
pub use types::*;
