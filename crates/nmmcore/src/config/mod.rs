//! Application configuration stored at `<data dir>/config.json`.
//!
//! Holds the game directory, the load order, categories and settings.
//! The file is rewritten atomically after every mutating operation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::activation::DeployMode;
use crate::categories::{self, Category};
use crate::error::{Error, IoContext, Result};
use crate::paths;
use crate::registry::ModConfigItem;

pub const CONFIG_FILE: &str = "config.json";

const CONFIG_VERSION: &str = "0.1.0";
const DEFAULT_STORAGE_DIR: &str = "./data";

/// User-facing toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Compute conflicts for the mod list view
    pub auto_detect_conflicts: bool,
    /// Surface conflict warnings in the mod list view
    pub show_conflict_warnings: bool,
    #[serde(default)]
    pub deploy_mode: DeployMode,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            auto_detect_conflicts: true,
            show_conflict_warnings: true,
            deploy_mode: DeployMode::Copy,
        }
    }
}

/// Persisted application state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub version: String,
    /// Live game directory (empty until the user picks one)
    #[serde(default)]
    pub game_directory: String,
    /// Managed storage root; relative paths resolve against the config file
    pub data_directory: String,
    #[serde(default)]
    pub mods: Vec<ModConfigItem>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub settings: AppSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            version: CONFIG_VERSION.to_string(),
            game_directory: String::new(),
            data_directory: DEFAULT_STORAGE_DIR.to_string(),
            mods: Vec::new(),
            categories: categories::defaults(),
            settings: AppSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load the config, writing a default one first if none exists.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = AppConfig::default();
            config.save(path)?;
            tracing::info!("Created default config at {:?}", path);
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_path("read", path)?;
        let config: AppConfig = serde_json::from_str(&raw).map_err(|e| Error::ConfigCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        categories::validate(&config.categories)?;
        Ok(config)
    }

    /// Validate and write atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        categories::validate(&self.categories)?;
        let raw = serde_json::to_string_pretty(self).map_err(|e| Error::ConfigCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        paths::write_atomic(path, raw.as_bytes()).with_path("write", path)
    }

    /// Absolute storage root for a config stored at `config_path`.
    pub fn storage_root(&self, config_path: &Path) -> PathBuf {
        let configured = PathBuf::from(&self.data_directory);
        if configured.is_absolute() {
            return configured;
        }
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        paths::join_relative(base, &paths::to_forward_slashes(&self.data_directory))
    }

    /// Game directory, if one has been chosen.
    pub fn game_dir(&self) -> Option<PathBuf> {
        let trimmed = self.game_directory.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// Default data directory (`~/.local/share/nativemm` on Linux).
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("nativemm")
}

/// Default config path inside [`default_data_dir`].
pub fn default_config_path() -> PathBuf {
    default_data_dir().join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_create_writes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);

        let config = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.version, "0.1.0");
        assert_eq!(config.categories.len(), 3);
        assert!(config.settings.auto_detect_conflicts);
        assert!(config.settings.show_conflict_warnings);
        assert_eq!(config.game_dir(), None);

        let reloaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_reads_original_format() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r##"{
                "version": "0.1.0",
                "gameDirectory": "/games/mhw",
                "dataDirectory": "./data",
                "mods": [{ "name": "Armor1", "order": 1, "enabled": true }],
                "categories": [{ "name": "Armor", "color": "#33FF57" }],
                "settings": { "autoDetectConflicts": false, "showConflictWarnings": true }
            }"##,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.game_dir(), Some(PathBuf::from("/games/mhw")));
        assert_eq!(config.mods[0].order, 1);
        assert!(!config.settings.auto_detect_conflicts);
        assert_eq!(config.settings.deploy_mode, DeployMode::Copy);
        assert_eq!(config.storage_root(&path), tmp.path().join("data"));
    }

    #[test]
    fn test_corrupt_and_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(Error::ConfigCorrupt { .. })
        ));

        let mut config = AppConfig::default();
        config.categories.push(Category::new("ARMOR", "#000000"));
        assert!(matches!(
            config.save(&path),
            Err(Error::InvalidCategory(_))
        ));
    }

    #[test]
    fn test_absolute_storage_root() {
        let config = AppConfig {
            data_directory: "/srv/mods".into(),
            ..AppConfig::default()
        };
        assert_eq!(
            config.storage_root(Path::new("/etc/nmm/config.json")),
            PathBuf::from("/srv/mods")
        );
    }
}
