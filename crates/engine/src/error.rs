//! Error types for engine state

/// Error type for engine discovery and global state
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The main executable module could not be located
    #[error("Main module not found: {0}")]
    ModuleNotFound(String),

    /// Module information query failed
    #[error("Failed to query module information: {0}")]
    ModuleInfo(String),

    /// Engine globals were already set
    #[error("Engine already initialized")]
    AlreadyInitialized,

    /// Engine globals were read before being set
    #[error("Engine not initialized")]
    NotInitialized,

    /// Process introspection is not available on this platform
    #[error("Unsupported platform: {0}")]
    Unsupported(&'static str),
}
