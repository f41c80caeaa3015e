//! Per-mod metadata.
//!
//! Every installed mod owns a directory in managed storage:
//! - `mod-info.json`: the persisted [`ModInfo`] record
//! - `payload/`: extracted files laid out exactly as they land in the game
//!   directory (`payload/nativepc/...` plus root-placed files)
//!
//! `ModInfo::enabled` records whether the mod's files are currently
//! *applied* to the live game directory. Load-order intent lives in the
//! registry, not here.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, IoContext, Result};
use crate::paths::{self, NATIVEPC};

/// Metadata file name inside a mod's storage directory.
pub const META_FILE: &str = "mod-info.json";

/// Payload directory name inside a mod's storage directory.
pub const PAYLOAD_DIR: &str = "payload";

/// Game-relative files shipped by a mod, split by placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModFiles {
    /// Paths relative to the game's `nativepc/` directory
    pub nativepc: Vec<String>,
    /// Paths relative to the game directory itself
    pub root: Vec<String>,
}

impl ModFiles {
    pub fn len(&self) -> usize {
        self.nativepc.len() + self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nativepc.is_empty() && self.root.is_empty()
    }

    /// All destination paths relative to the game directory, `nativepc` first.
    pub fn destinations(&self) -> impl Iterator<Item = String> + '_ {
        self.nativepc
            .iter()
            .map(|p| format!("{NATIVEPC}/{p}"))
            .chain(self.root.iter().cloned())
    }

    /// Whether this mod writes `destination` (case-insensitive).
    pub fn writes(&self, destination: &str) -> bool {
        let wanted = paths::normalize_for_lookup(destination);
        self.destinations()
            .any(|d| paths::normalize_for_lookup(&d) == wanted)
    }
}

/// Persisted record for one installed mod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModInfo {
    /// Unique, immutable identifier (also the storage directory name)
    pub name: String,
    /// Nexus Mods id, if the user supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nexus_id: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Whether the payload is currently applied to the game directory
    #[serde(default)]
    pub enabled: bool,
    pub install_date: DateTime<Utc>,
    /// Total payload size in bytes
    pub file_size: u64,
    pub files: ModFiles,
}

impl ModInfo {
    /// A freshly installed, not yet applied mod.
    pub fn new(
        name: &str,
        nexus_id: Option<String>,
        categories: Vec<String>,
        file_size: u64,
        files: ModFiles,
    ) -> Self {
        ModInfo {
            name: name.to_string(),
            nexus_id: nexus_id.filter(|id| !id.trim().is_empty()),
            categories,
            enabled: false,
            install_date: Utc::now(),
            file_size,
            files,
        }
    }

    /// Read a `mod-info.json`.
    ///
    /// A missing file is `ModNotFound`; an unparsable one is `StorageCorrupt`.
    pub fn read(path: &Path, name: &str) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ModNotFound(name.to_string()))
            }
            Err(e) => return Err(Error::io(format!("read {path:?}"), e)),
        };
        serde_json::from_str(&raw).map_err(|e| Error::StorageCorrupt {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Write to disk atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| Error::StorageCorrupt {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;
        paths::write_atomic(path, raw.as_bytes()).with_path("write", path)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}
