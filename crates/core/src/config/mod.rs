//! Hook configuration
//!
//! A single TOML file, created with defaults on first run:
//!
//! ```toml
//! version = 1
//! debug = false
//! variant = "legend"
//! batch_draw_calls = false
//! console = true
//!
//! [sweep]
//! enabled = true
//! interval_ticks = 1
//! markers = ["spider", "shark", "tarantula"]
//! ```
//!
//! The cargo features `underworld` and `batch-draw-calls` only change the
//! defaults; the values in the file win.

mod loader;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::gamedata::GameVariant;

pub use loader::{cdchook_base_dir, gamedata_path, hook_config_path, hook_dir_in, HOOK_DIR_NAME};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Could not determine config directory from the executable location
    #[error("Config directory not available - could not resolve game directory")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Markers removed by the entity sweep unless configured otherwise
pub const DEFAULT_MARKERS: [&str; 3] = ["spider", "shark", "tarantula"];

/// Entity sweep settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Run the sweep at all
    pub enabled: bool,

    /// Run once every N game ticks (1 = every tick, 60 = throttled)
    pub interval_ticks: u32,

    /// Case-insensitive substrings of entity names to remove
    pub markers: Vec<String>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ticks: 1,
            markers: DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Hook configuration.
///
/// Loaded from `<game dir>/cdchook/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// Target game build; picks the signature and module set
    pub variant: GameVariant,

    /// Flush the batched draw calls after each frame
    pub batch_draw_calls: bool,

    /// Attach a console window for diagnostics
    pub console: bool,

    /// Entity sweep settings
    pub sweep: SweepConfig,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            variant: GameVariant::compiled_default(),
            batch_draw_calls: cfg!(feature = "batch-draw-calls"),
            console: true,
            sweep: SweepConfig::default(),
        }
    }
}

impl HookConfig {
    /// Load config from file, creating default if missing.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from_path(&hook_config_path()?)
    }

    /// Load config from an explicit path, creating default if missing.
    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded hook config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to_path(path)?;
            tracing::info!("Created default hook config at {:?}", path);
            Ok(default)
        }
    }

    /// Save config to an explicit path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to_path(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved hook config to {:?}", path);
        Ok(())
    }

    /// Default log filter directive for this config
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_config_default() {
        let config = HookConfig::default();
        assert_eq!(config.version, 1);
        assert!(!config.debug);
        assert!(config.console);
        assert_eq!(config.variant, GameVariant::compiled_default());
        assert_eq!(config.batch_draw_calls, cfg!(feature = "batch-draw-calls"));
        assert_eq!(config.sweep.interval_ticks, 1);
        assert_eq!(config.sweep.markers, ["spider", "shark", "tarantula"]);
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn test_hook_config_serialize() {
        let config = HookConfig {
            variant: GameVariant::Underworld,
            debug: true,
            ..HookConfig::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("variant = \"underworld\""));
        assert!(toml_str.contains("debug = true"));
        assert!(toml_str.contains("[sweep]"));

        let parsed: HookConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: HookConfig = toml::from_str(
            r#"
            variant = "legend"

            [sweep]
            interval_ticks = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.variant, GameVariant::Legend);
        assert_eq!(config.sweep.interval_ticks, 60);
        assert!(config.sweep.enabled);
        assert_eq!(config.sweep.markers.len(), 3);
        assert!(config.console);
    }

    #[test]
    fn test_unknown_variant_rejected() {
        assert!(toml::from_str::<HookConfig>("variant = \"anniversary\"").is_err());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = hook_dir_in(dir.path()).join("config.toml");

        let config = HookConfig::load_from_path(&path).unwrap();
        assert_eq!(config, HookConfig::default());
        assert!(path.exists());

        let reloaded = HookConfig::load_from_path(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "debug = true\n[sweep]\nenabled = false\nmarkers = [\"croc\"]\n",
        )
        .unwrap();

        let config = HookConfig::load_from_path(&path).unwrap();
        assert!(config.debug);
        assert_eq!(config.log_level(), "debug");
        assert!(!config.sweep.enabled);
        assert_eq!(config.sweep.markers, ["croc"]);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "debug = [").unwrap();

        assert!(matches!(
            HookConfig::load_from_path(&path),
            Err(ConfigError::ParseError(_))
        ));
    }
}
