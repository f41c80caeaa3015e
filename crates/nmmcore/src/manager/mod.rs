//! High-level mod management facade.
//!
//! `ModManager` ties the store, registry and activation engine to the
//! persisted [`AppConfig`]. Every mutating operation takes `&mut self` and
//! writes the config back before returning, so a shared manager behind
//! [`SharedModManager`] gets single-writer / many-reader exclusion.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activation::{ActivationEngine, DeployMode, SyncReport};
use crate::archive::{self, ArchivePreview};
use crate::categories::{self, Category};
use crate::config::{self, AppConfig};
use crate::conflict::{self, ModConflicts, ModLayer, Resolution};
use crate::error::{Error, IoContext, Result};
use crate::lock::StorageLock;
use crate::modinfo::{ModFiles, ModInfo};
use crate::progress::ProgressFn;
use crate::registry::OrderedRegistry;
use crate::store::{self, ModStore};

/// A manager shared between threads.
pub type SharedModManager = Arc<RwLock<ModManager>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    /// Completed, but some paths or mods failed
    Partial,
    Failure,
}

/// Outcome of a user-facing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: OperationStatus,
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
    /// Paths or mod names that failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Success,
            success: true,
            message: Some(message.into()),
            error: None,
            failed: Vec::new(),
        }
    }

    pub fn partial(message: impl Into<String>, failed: Vec<String>) -> Self {
        Self {
            status: OperationStatus::Partial,
            success: false,
            message: Some(message.into()),
            error: None,
            failed,
        }
    }

    pub fn failure(error: impl Into<String>, failed: Vec<String>) -> Self {
        Self {
            status: OperationStatus::Failure,
            success: false,
            message: None,
            error: Some(error.into()),
            failed,
        }
    }

    /// `Success` for a clean pass, `Partial` listing failed paths otherwise.
    pub fn from_sync(report: &SyncReport, message: impl Into<String>) -> Self {
        if report.is_clean() {
            return Self::success(message);
        }
        let failed = report
            .failures
            .iter()
            .map(|f| {
                if f.path.is_empty() {
                    f.mod_name.clone()
                } else {
                    f.path.clone()
                }
            })
            .collect();
        Self::partial(message, failed)
    }
}

impl From<&Error> for OperationResult {
    fn from(err: &Error) -> Self {
        Self::failure(err.to_string(), Vec::new())
    }
}

/// Install form input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModInstallFormData {
    pub name: String,
    #[serde(default)]
    pub nexus_id: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// One row of the mod list: metadata joined with load order and conflicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mod {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nexus_id: Option<String>,
    pub categories: Vec<String>,
    /// Enable intent from the load order
    pub enabled: bool,
    /// Whether the files are currently in the game directory
    pub applied: bool,
    pub file_size: u64,
    pub install_date: DateTime<Utc>,
    pub order: usize,
    pub files: ModFiles,
    pub has_conflict: bool,
    pub conflict_with: Vec<String>,
}

/// Owns one storage root and its config for the lifetime of the process.
#[derive(Debug)]
pub struct ModManager {
    config_path: PathBuf,
    config: AppConfig,
    store: ModStore,
    registry: OrderedRegistry,
    _lock: StorageLock,
}

impl ModManager {
    /// Open the manager for the config at `config_path`, creating it if needed.
    ///
    /// Fails with `StorageLocked` if another manager holds the storage root.
    pub fn open(config_path: &Path) -> Result<Self> {
        let config = AppConfig::load_or_create(config_path)?;
        let storage_root = config.storage_root(config_path);
        let lock = StorageLock::acquire(&storage_root)?;
        let store = ModStore::open(&storage_root)?;
        let registry = OrderedRegistry::from_items(config.mods.clone());

        let mut manager = ModManager {
            config_path: config_path.to_path_buf(),
            config,
            store,
            registry,
            _lock: lock,
        };
        manager.reconcile()?;
        Ok(manager)
    }

    /// Open using the default config location.
    pub fn open_default() -> Result<Self> {
        Self::open(&config::default_config_path())
    }

    pub fn into_shared(self) -> SharedModManager {
        Arc::new(RwLock::new(self))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn registry(&self) -> &OrderedRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ModStore {
        &self.store
    }

    /// Line the load order up with what is actually in storage.
    fn reconcile(&mut self) -> Result<()> {
        let scan = self.store.scan()?;
        let mut changed = self.registry.items() != self.config.mods.as_slice();

        let missing: Vec<String> = self
            .registry
            .items()
            .iter()
            .filter(|item| !self.store.mod_dir(&item.name).is_dir())
            .map(|item| item.name.clone())
            .collect();
        for name in missing {
            tracing::warn!("Dropping \"{}\" from the load order: not in storage", name);
            self.registry.remove(&name)?;
            changed = true;
        }

        for info in &scan.mods {
            if self.registry.get(&info.name).is_none() {
                tracing::info!("Adding \"{}\" found in storage to the load order", info.name);
                self.registry.append(&info.name)?;
                self.registry.set_enabled(&info.name, info.enabled)?;
                changed = true;
            }
        }

        if changed {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        self.config.mods = self.registry.items().to_vec();
        self.config.save(&self.config_path)
    }

    fn engine(&self) -> Result<ActivationEngine> {
        let game_dir = self.config.game_dir().ok_or(Error::GameDirectoryUnset)?;
        Ok(ActivationEngine::new(
            &game_dir,
            self.store.root(),
            self.config.settings.deploy_mode,
        ))
    }

    /// Inspect an archive without installing it.
    pub fn preview_archive(&self, archive_path: &Path) -> Result<ArchivePreview> {
        archive::preview(archive_path)
    }

    /// Install an archive as a new, disabled mod at the end of the load order.
    pub fn install(
        &mut self,
        archive_path: &Path,
        form: &ModInstallFormData,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<ModInfo> {
        let name = form.name.trim();
        if self.registry.get(name).is_some() {
            return Err(Error::DuplicateModName(name.to_string()));
        }
        let nexus_id = Some(form.nexus_id.trim().to_string());
        let info = self.store.install(
            archive_path,
            name,
            nexus_id,
            form.categories.clone(),
            progress,
        )?;
        self.registry.append(&info.name)?;
        self.persist()?;
        Ok(info)
    }

    /// Enable a mod and apply the load order to the game directory.
    pub fn enable(
        &mut self,
        name: &str,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<OperationResult> {
        self.set_enabled(name, true, progress)
    }

    /// Disable a mod, restoring whatever it was shadowing.
    pub fn disable(
        &mut self,
        name: &str,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<OperationResult> {
        self.set_enabled(name, false, progress)
    }

    fn set_enabled(
        &mut self,
        name: &str,
        enabled: bool,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<OperationResult> {
        let engine = self.engine()?;
        self.registry.set_enabled(name, enabled)?;
        let synced = engine.sync(&self.store, &self.registry, progress);
        self.persist()?;

        let verb = if enabled { "Enabled" } else { "Disabled" };
        Ok(OperationResult::from_sync(&synced?, format!("{verb} \"{name}\"")))
    }

    /// Move a mod to `position` in the load order.
    ///
    /// The game directory is re-synced when one is selected.
    pub fn reorder(
        &mut self,
        name: &str,
        position: usize,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<OperationResult> {
        self.registry.reorder(name, position)?;
        self.persist()?;

        let message = format!("Moved \"{name}\" to position {position}");
        match self.engine() {
            Ok(engine) => {
                let report = engine.sync(&self.store, &self.registry, progress)?;
                Ok(OperationResult::from_sync(&report, message))
            }
            Err(Error::GameDirectoryUnset) => Ok(OperationResult::success(message)),
            Err(e) => Err(e),
        }
    }

    /// Re-apply the load order to the game directory.
    pub fn sync(&mut self, progress: Option<&ProgressFn<'_>>) -> Result<OperationResult> {
        let report = self.engine()?.sync(&self.store, &self.registry, progress)?;
        Ok(OperationResult::from_sync(&report, "Game directory synchronized"))
    }

    /// Deactivate and remove a mod.
    ///
    /// If any of the mod's files cannot be removed from the game directory
    /// the mod stays installed (disabled) and the failed paths are returned.
    pub fn delete(
        &mut self,
        name: &str,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<OperationResult> {
        let tracked = self.registry.get(name).is_some();
        if !tracked && (store::validate_name(name).is_err() || !self.store.mod_dir(name).is_dir())
        {
            return Err(Error::ModNotFound(name.to_string()));
        }

        let applied = self.store.load(name).map(|info| info.enabled).unwrap_or(false);
        if applied || self.registry.is_enabled(name) {
            let engine = self.engine()?;
            self.registry.set_enabled(name, false)?;
            let report = engine.sync(&self.store, &self.registry, progress);
            self.persist()?;
            let report = report?;

            if report.has_failures_for(name) {
                let failed = report
                    .failures
                    .iter()
                    .filter(|f| f.mod_name == name)
                    .map(|f| f.path.clone())
                    .collect();
                tracing::warn!("Not deleting \"{}\": its files could not be removed", name);
                return Ok(OperationResult::failure(
                    format!("Could not deactivate \"{name}\""),
                    failed,
                ));
            }
        }

        match self.store.delete(name) {
            Ok(()) | Err(Error::ModNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        if tracked {
            self.registry.remove(name)?;
        }
        self.persist()?;
        Ok(OperationResult::success(format!("Deleted \"{name}\"")))
    }

    pub fn mod_info(&self, name: &str) -> Result<ModInfo> {
        self.store.load(name)
    }

    /// Update a mod's Nexus id and categories.
    pub fn update_mod_info(
        &mut self,
        name: &str,
        nexus_id: Option<String>,
        categories: Vec<String>,
    ) -> Result<ModInfo> {
        let mut info = self.store.load(name)?;
        info.nexus_id = nexus_id;
        info.categories = categories;
        self.store.save(name, &info)
    }

    /// Winner of every path across the enabled mods.
    pub fn resolution(&self) -> Resolution {
        let infos: Vec<(usize, ModInfo)> = self
            .registry
            .enabled_in_order()
            .filter_map(|item| match self.store.load(&item.name) {
                Ok(info) => Some((item.order, info)),
                Err(e) => {
                    tracing::warn!("Skipping \"{}\" in conflict check: {}", item.name, e);
                    None
                }
            })
            .collect();
        let layers: Vec<ModLayer<'_>> = infos
            .iter()
            .map(|(order, info)| ModLayer {
                name: &info.name,
                order: *order,
                files: &info.files,
            })
            .collect();
        conflict::resolve(&layers)
    }

    /// Per-mod conflicts across the enabled mods.
    pub fn conflicts(&self) -> HashMap<String, ModConflicts> {
        self.resolution().conflicts()
    }

    /// The mod list in load order.
    ///
    /// Conflict fields stay empty unless `autoDetectConflicts` is on;
    /// `hasConflict` additionally requires `showConflictWarnings`.
    pub fn mods(&self) -> Result<Vec<Mod>> {
        let scan = self.store.scan()?;
        let conflicts = if self.config.settings.auto_detect_conflicts {
            self.conflicts()
        } else {
            HashMap::new()
        };

        let mut by_name: HashMap<String, ModInfo> = scan
            .mods
            .into_iter()
            .map(|info| (info.name.clone(), info))
            .collect();

        let mods = self
            .registry
            .items()
            .iter()
            .filter_map(|item| {
                let info = by_name.remove(&item.name)?;
                let conflict_with: Vec<String> = conflicts
                    .get(&item.name)
                    .map(|c| c.conflicts_with.iter().cloned().collect())
                    .unwrap_or_default();
                Some(Mod {
                    has_conflict: self.config.settings.show_conflict_warnings
                        && !conflict_with.is_empty(),
                    conflict_with,
                    name: info.name,
                    nexus_id: info.nexus_id,
                    categories: info.categories,
                    enabled: item.enabled,
                    applied: info.enabled,
                    file_size: info.file_size,
                    install_date: info.install_date,
                    order: item.order,
                    files: info.files,
                })
            })
            .collect();
        Ok(mods)
    }

    /// Names of mods assigned to `category`.
    pub fn mods_in_category(&self, category: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .store
            .load_all()?
            .into_iter()
            .filter(|info| info.has_category(category))
            .map(|info| info.name)
            .collect())
    }

    pub fn add_category(&mut self, name: &str, color: &str) -> Result<()> {
        categories::add(&mut self.config.categories, Category::new(name, color))?;
        self.persist()
    }

    /// Remove a category definition. Mods keep their category labels.
    pub fn remove_category(&mut self, name: &str) -> Result<bool> {
        let removed = categories::remove(&mut self.config.categories, name);
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn recolor_category(&mut self, name: &str, color: &str) -> Result<()> {
        categories::recolor(&mut self.config.categories, name, color)?;
        self.persist()
    }

    pub fn set_auto_detect_conflicts(&mut self, enabled: bool) -> Result<()> {
        self.config.settings.auto_detect_conflicts = enabled;
        self.persist()
    }

    pub fn set_show_conflict_warnings(&mut self, enabled: bool) -> Result<()> {
        self.config.settings.show_conflict_warnings = enabled;
        self.persist()
    }

    /// Takes effect on the next write; files already in place are kept.
    pub fn set_deploy_mode(&mut self, mode: DeployMode) -> Result<()> {
        self.config.settings.deploy_mode = mode;
        self.persist()
    }

    /// Point the manager at a different game directory.
    ///
    /// Applied files are first removed from the old directory; if that
    /// fails the selection is left unchanged. Enabled mods are then applied
    /// to the new directory.
    pub fn set_game_directory(
        &mut self,
        game_dir: &Path,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<OperationResult> {
        let meta = std::fs::metadata(game_dir).with_path("open game directory", game_dir)?;
        if !meta.is_dir() {
            return Err(Error::io(
                format!("open game directory {game_dir:?}"),
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }
        if self.config.game_dir().as_deref() == Some(game_dir) {
            return Ok(OperationResult::success("Game directory unchanged"));
        }

        if let Ok(old_engine) = self.engine() {
            let mut cleared = self.registry.clone();
            for item in self.registry.items() {
                cleared.set_enabled(&item.name, false)?;
            }
            let report = old_engine.sync(&self.store, &cleared, progress)?;
            if !report.is_clean() {
                return Ok(OperationResult::from_sync(
                    &report,
                    "Could not clear the previous game directory",
                ));
            }
        }

        self.config.game_directory = game_dir.to_string_lossy().into_owned();
        self.persist()?;
        tracing::info!("Game directory set to {:?}", game_dir);

        let report = self.engine()?.sync(&self.store, &self.registry, progress)?;
        Ok(OperationResult::from_sync(&report, "Game directory updated"))
    }
}
