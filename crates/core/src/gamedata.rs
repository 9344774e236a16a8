//! Gamedata system: target builds, signatures and offsets
//!
//! Each supported game build has a built-in device-init signature. An
//! optional gamedata.json deployed next to the game can override those and
//! add the entries the built-in table does not know (the optional host
//! pipelines and the instance layout), so a patched executable does not
//! require recompiling.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cdchook_sdk::signatures::{self, names};

use crate::memory::ProcessImage;

/// Errors that can occur when loading gamedata
#[derive(Debug, Error)]
pub enum GamedataError {
    #[error("Failed to read gamedata file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse gamedata JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Signature not found: {0}")]
    SignatureNotFound(String),

    #[error("Offset not found: {0}")]
    OffsetNotFound(String),

    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),
}

/// Errors raised while locating a signature in the process image
#[derive(Debug, Error)]
pub enum ScanError {
    /// The binary does not match the build this gamedata describes
    #[error("Signature '{name}' matched {found} time(s), expected {expected}")]
    CountMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Operand of '{name}' at {address:x} is outside the scanned image")]
    OperandOutOfRange { name: String, address: usize },

    #[error(transparent)]
    Gamedata(#[from] GamedataError),
}

/// The two supported builds of the target game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameVariant {
    Legend,
    Underworld,
}

impl GameVariant {
    /// Variant selected by the `underworld` cargo feature
    pub const fn compiled_default() -> Self {
        if cfg!(feature = "underworld") {
            GameVariant::Underworld
        } else {
            GameVariant::Legend
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GameVariant::Legend => "legend",
            GameVariant::Underworld => "underworld",
        }
    }

    /// Built-in device-init signature for this build
    pub fn device_init_signature(self) -> SignatureEntry {
        match self {
            GameVariant::Legend => SignatureEntry::new(
                signatures::LEGEND_DEVICE_INIT,
                1,
                signatures::LEGEND_DEVICE_MANAGER_OPERAND,
            ),
            GameVariant::Underworld => SignatureEntry::new(
                signatures::UNDERWORLD_DEVICE_INIT,
                1,
                signatures::UNDERWORLD_DEVICE_MANAGER_OPERAND,
            ),
        }
    }
}

impl Default for GameVariant {
    fn default() -> Self {
        Self::compiled_default()
    }
}

impl std::fmt::Display for GameVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A signature with its expected match count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// Pattern string, e.g. "8B 0D ? ? ? ?"
    pub pattern: String,
    /// Number of matches the build is known to contain
    #[serde(default = "default_count")]
    pub count: usize,
    /// Offset of an embedded absolute address from the match start
    #[serde(default)]
    pub operand: usize,
}

fn default_count() -> usize {
    1
}

impl SignatureEntry {
    pub fn new(pattern: &str, count: usize, operand: usize) -> Self {
        Self {
            pattern: pattern.to_string(),
            count,
            operand,
        }
    }
}

/// On-disk gamedata layout
#[derive(Debug, Default, Deserialize)]
struct GamedataFile {
    #[serde(default)]
    signatures: HashMap<String, SignatureEntry>,
    #[serde(default)]
    offsets: HashMap<String, i64>,
}

/// Loaded gamedata for one game build
#[derive(Debug, Clone)]
pub struct Gamedata {
    variant: GameVariant,
    signatures: HashMap<String, SignatureEntry>,
    offsets: HashMap<String, i64>,
}

impl Gamedata {
    /// Built-in gamedata: only the device-init signature is known
    pub fn builtin(variant: GameVariant) -> Self {
        let mut signatures = HashMap::new();
        signatures.insert(
            names::DEVICE_INIT.to_string(),
            variant.device_init_signature(),
        );

        Self {
            variant,
            signatures,
            offsets: HashMap::new(),
        }
    }

    /// Load gamedata from a JSON string layered over the built-in table
    pub fn load_from_str(variant: GameVariant, json: &str) -> Result<Self, GamedataError> {
        let file: GamedataFile = serde_json::from_str(json)?;

        let mut gamedata = Self::builtin(variant);
        gamedata.signatures.extend(file.signatures);
        gamedata.offsets.extend(file.offsets);

        tracing::info!(
            "Loaded gamedata for {}: {} signatures, {} offsets",
            variant,
            gamedata.signatures.len(),
            gamedata.offsets.len()
        );

        Ok(gamedata)
    }

    /// Load gamedata from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(
        variant: GameVariant,
        path: P,
    ) -> Result<Self, GamedataError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(variant, &content)
    }

    /// Load gamedata from a JSON file if it exists, otherwise use the built-in table
    pub fn load_or_builtin<P: AsRef<Path>>(
        variant: GameVariant,
        path: P,
    ) -> Result<Self, GamedataError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(variant, path)
        } else {
            tracing::debug!("No gamedata at {:?}, using built-in signatures", path);
            Ok(Self::builtin(variant))
        }
    }

    pub fn variant(&self) -> GameVariant {
        self.variant
    }

    /// Get a signature by name
    pub fn signature(&self, name: &str) -> Result<&SignatureEntry, GamedataError> {
        self.signatures
            .get(name)
            .ok_or_else(|| GamedataError::SignatureNotFound(name.to_string()))
    }

    pub fn has_signature(&self, name: &str) -> bool {
        self.signatures.contains_key(name)
    }

    /// Get an offset by name
    pub fn offset(&self, name: &str) -> Result<i64, GamedataError> {
        self.offsets
            .get(name)
            .copied()
            .ok_or_else(|| GamedataError::OffsetNotFound(name.to_string()))
    }

    /// Get a non-negative offset by name
    pub fn offset_usize(&self, name: &str) -> Result<usize, GamedataError> {
        let value = self.offset(name)?;
        usize::try_from(value)
            .map_err(|_| GamedataError::OffsetNotFound(format!("{} (negative: {})", name, value)))
    }
}

/// Parse a signature pattern string into bytes
///
/// Supports:
/// - Hex bytes: "8B 0D 68"
/// - Wildcards: "8B ? 68" or "8B ?? 68"
pub fn parse_signature(pattern: &str) -> Result<Vec<Option<u8>>, GamedataError> {
    let mut result = Vec::new();

    for part in pattern.split_whitespace() {
        if part == "?" || part == "??" {
            result.push(None); // Wildcard
        } else {
            let byte = u8::from_str_radix(part, 16).map_err(|_| {
                GamedataError::InvalidSignature(format!("Invalid hex byte: {}", part))
            })?;
            result.push(Some(byte));
        }
    }

    if result.is_empty() {
        return Err(GamedataError::InvalidSignature(
            "Empty signature pattern".to_string(),
        ));
    }

    if result.iter().all(Option::is_none) {
        return Err(GamedataError::InvalidSignature(format!(
            "Pattern has no literal bytes: {}",
            pattern
        )));
    }

    Ok(result)
}

fn matches_at(window: &[u8], pattern: &[Option<u8>]) -> bool {
    window
        .iter()
        .zip(pattern)
        .all(|(actual, expected)| expected.map_or(true, |byte| byte == *actual))
}

/// Scan a byte slice for every match of a pattern, returning match offsets
pub fn scan_all(haystack: &[u8], pattern: &[Option<u8>]) -> Vec<usize> {
    if pattern.is_empty() || haystack.len() < pattern.len() {
        return Vec::new();
    }

    haystack
        .windows(pattern.len())
        .enumerate()
        .filter(|(_, window)| matches_at(window, pattern))
        .map(|(offset, _)| offset)
        .collect()
}

/// Addresses found for a signature whose match count was verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    name: String,
    addresses: Vec<usize>,
    operand: usize,
}

impl PatternMatch {
    /// Address of the first match
    pub fn first(&self) -> usize {
        // A verified match always holds at least one address
        self.addresses.first().copied().unwrap_or_default()
    }

    pub fn addresses(&self) -> &[usize] {
        &self.addresses
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the 32-bit absolute address embedded at `first + operand`
    pub fn operand_address(&self, image: &dyn ProcessImage) -> Result<usize, ScanError> {
        let address = self.first() + self.operand;
        image
            .read_u32(address)
            .map(|value| value as usize)
            .ok_or_else(|| ScanError::OperandOutOfRange {
                name: self.name.clone(),
                address,
            })
    }
}

/// Find a signature in the process image and verify its match count
///
/// A count mismatch means the running binary is not the build the gamedata
/// describes, and nothing may be hooked.
#[tracing::instrument(skip(image, entry))]
pub fn find_pattern(
    image: &dyn ProcessImage,
    name: &str,
    entry: &SignatureEntry,
) -> Result<PatternMatch, ScanError> {
    let pattern = parse_signature(&entry.pattern)?;

    let addresses: Vec<usize> = image
        .scan_regions()
        .into_iter()
        .flat_map(|region| {
            scan_all(region.bytes, &pattern)
                .into_iter()
                .map(move |offset| region.base + offset)
        })
        .collect();

    if addresses.len() != entry.count || addresses.is_empty() {
        tracing::error!(
            "Signature '{}' matched {} time(s), expected {}",
            name,
            addresses.len(),
            entry.count
        );
        return Err(ScanError::CountMismatch {
            name: name.to_string(),
            expected: entry.count,
            found: addresses.len(),
        });
    }

    tracing::debug!("Signature '{}' found at {:x}", name, addresses[0]);

    Ok(PatternMatch {
        name: name.to_string(),
        addresses,
        operand: entry.operand,
    })
}

/// Find a named signature from gamedata
pub fn find_signature(
    image: &dyn ProcessImage,
    gamedata: &Gamedata,
    name: &str,
) -> Result<PatternMatch, ScanError> {
    let entry = gamedata.signature(name)?;
    find_pattern(image, name, entry)
}
