//! Config path resolution
//!
//! The hook runs inside the game process, so paths are resolved relative to
//! the game executable.

use std::path::{Path, PathBuf};

use super::{ConfigError, ConfigResult};

/// Directory name holding the hook's files, next to the game executable
pub const HOOK_DIR_NAME: &str = "cdchook";

/// Returns the cdchook directory: `<game dir>/cdchook/`
pub fn cdchook_base_dir() -> ConfigResult<PathBuf> {
    let exe = std::env::current_exe().map_err(ConfigError::IoError)?;
    exe.parent()
        .map(|dir| hook_dir_in(dir))
        .ok_or(ConfigError::NoConfigDirectory)
}

/// The cdchook directory inside a given game directory
pub fn hook_dir_in(game_dir: &Path) -> PathBuf {
    game_dir.join(HOOK_DIR_NAME)
}

/// Returns the hook config path.
///
/// Path: `<game dir>/cdchook/config.toml`
pub fn hook_config_path() -> ConfigResult<PathBuf> {
    Ok(cdchook_base_dir()?.join("config.toml"))
}

/// Returns the optional gamedata override path.
///
/// Path: `<game dir>/cdchook/gamedata.json`
pub fn gamedata_path() -> ConfigResult<PathBuf> {
    Ok(cdchook_base_dir()?.join("gamedata.json"))
}
