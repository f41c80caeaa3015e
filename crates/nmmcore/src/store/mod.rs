//! Managed mod storage.
//!
//! Owns one directory per installed mod under the storage root:
//!
//! ```text
//! <storage>/<name>/mod-info.json
//! <storage>/<name>/payload/...
//! ```
//!
//! Installs are staged in a hidden sibling directory and renamed into
//! place only once both payload and metadata are complete, so a mod never
//! exists with files but no metadata or the other way round. Nothing in
//! this module touches the live game directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::archive;
use crate::error::{Error, IoContext, Result};
use crate::modinfo::{ModInfo, META_FILE, PAYLOAD_DIR};
use crate::paths;
use crate::progress::ProgressFn;

/// Prefix for in-flight install directories.
const STAGING_PREFIX: &str = ".staging-";

/// Result of scanning every mod directory.
#[derive(Debug, Default)]
pub struct StoreScan {
    /// Readable mods, sorted by name
    pub mods: Vec<ModInfo>,
    /// Mods whose metadata could not be read, with the reason
    pub corrupt: Vec<(String, String)>,
}

/// Removes a staging directory unless the install completed.
struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                tracing::warn!("Failed to clean up staging {:?}: {}", self.path, e);
            }
        }
    }
}

/// Per-mod metadata and payload storage.
#[derive(Debug, Clone)]
pub struct ModStore {
    root: PathBuf,
}

impl ModStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Leftover staging directories from an interrupted install are removed.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_path("create storage root", root)?;
        let store = ModStore {
            root: root.to_path_buf(),
        };
        store.remove_stale_staging();
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a mod's metadata and payload.
    pub fn mod_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Directory holding a mod's extracted files.
    pub fn payload_dir(&self, name: &str) -> PathBuf {
        self.mod_dir(name).join(PAYLOAD_DIR)
    }

    /// Stored copy of a game-relative destination path.
    pub fn source_path(&self, name: &str, destination: &str) -> PathBuf {
        paths::join_relative(&self.payload_dir(name), destination)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mod_dir(name).join(META_FILE).exists()
    }

    /// Install an archive as a new mod named `name`.
    ///
    /// The new mod starts not applied (`enabled = false`).
    pub fn install(
        &self,
        archive_path: &Path,
        name: &str,
        nexus_id: Option<String>,
        categories: Vec<String>,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<ModInfo> {
        validate_name(name)?;
        let final_dir = self.mod_dir(name);
        if final_dir.exists() {
            return Err(Error::DuplicateModName(name.to_string()));
        }

        let entries = archive::read_entries(archive_path)?;
        if !archive::has_files(&entries) {
            return Err(Error::ArchiveEmpty(archive_path.to_path_buf()));
        }
        let payload_root = archive::find_payload_root(&entries).unwrap_or_default();
        let plan = archive::plan_layout(&entries, &payload_root);

        let staging = self.root.join(format!("{STAGING_PREFIX}{name}"));
        if staging.exists() {
            fs::remove_dir_all(&staging).with_path("clear staging", &staging)?;
        }
        fs::create_dir_all(&staging).with_path("create staging", &staging)?;
        let mut guard = StagingGuard::new(staging.clone());

        let file_size =
            archive::extract_planned(archive_path, &plan, &staging.join(PAYLOAD_DIR), progress)?;
        let info = ModInfo::new(name, nexus_id, categories, file_size, plan.mod_files);
        info.write(&staging.join(META_FILE))?;

        fs::rename(&staging, &final_dir).with_path("finalize install of", &final_dir)?;
        guard.disarm();

        tracing::info!(
            "Installed mod \"{}\" ({} nativepc, {} root files, {} bytes)",
            name,
            info.files.nativepc.len(),
            info.files.root.len(),
            info.file_size
        );
        Ok(info)
    }

    /// Load one mod's metadata.
    pub fn load(&self, name: &str) -> Result<ModInfo> {
        if validate_name(name).is_err() {
            return Err(Error::ModNotFound(name.to_string()));
        }
        ModInfo::read(&self.mod_dir(name).join(META_FILE), name)
    }

    /// Load every readable mod, sorted by name.
    pub fn load_all(&self) -> Result<Vec<ModInfo>> {
        Ok(self.scan()?.mods)
    }

    /// Load every mod, reporting unreadable ones separately.
    pub fn scan(&self) -> Result<StoreScan> {
        let mut scan = StoreScan::default();

        for entry in fs::read_dir(&self.root).with_path("read storage root", &self.root)? {
            let entry = entry.with_path("read storage root", &self.root)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }

            match self.load(&name) {
                Ok(info) => scan.mods.push(info),
                Err(Error::ModNotFound(_)) => {
                    tracing::warn!("Ignoring storage directory without metadata: {:?}", name);
                }
                Err(e) => {
                    tracing::warn!("Failed to load mod {:?}: {}", name, e);
                    scan.corrupt.push((name, e.to_string()));
                }
            }
        }

        scan.mods.sort_by(|a, b| a.name.cmp(&b.name));
        scan.corrupt.sort();
        Ok(scan)
    }

    /// Overwrite user-editable metadata of an existing mod.
    ///
    /// Only `nexus_id` and `categories` are taken from `info`; name, files,
    /// install date, size and applied state stay as stored.
    pub fn save(&self, name: &str, info: &ModInfo) -> Result<ModInfo> {
        let mut stored = self.load(name)?;
        stored.nexus_id = info.nexus_id.clone().filter(|id| !id.trim().is_empty());
        stored.categories = info.categories.clone();
        stored.write(&self.mod_dir(name).join(META_FILE))?;
        Ok(stored)
    }

    /// Record whether a mod's files are currently applied to the game directory.
    pub fn set_applied(&self, name: &str, applied: bool) -> Result<()> {
        let mut stored = self.load(name)?;
        if stored.enabled == applied {
            return Ok(());
        }
        stored.enabled = applied;
        stored.write(&self.mod_dir(name).join(META_FILE))
    }

    /// Remove a mod's payload and metadata.
    ///
    /// The caller must deactivate the mod first; this never touches the
    /// game directory.
    pub fn delete(&self, name: &str) -> Result<()> {
        if validate_name(name).is_err() || !self.mod_dir(name).is_dir() {
            return Err(Error::ModNotFound(name.to_string()));
        }
        let dir = self.mod_dir(name);
        fs::remove_dir_all(&dir).with_path("delete", &dir)?;
        tracing::info!("Deleted mod \"{}\" from storage", name);
        Ok(())
    }

    fn remove_stale_staging(&self) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(STAGING_PREFIX) && entry.path().is_dir() {
                tracing::warn!("Removing interrupted install {:?}", entry.path());
                let _ = fs::remove_dir_all(entry.path());
            }
        }
    }
}

/// A mod name must be usable as a single directory name.
pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed != name
        || name.starts_with('.')
        || name.contains(['/', '\\', ':', '*', '?', '"', '<', '>', '|'])
        || name.chars().any(char::is_control);
    if invalid {
        return Err(Error::InvalidModName(name.to_string()));
    }
    Ok(())
}

/// Total size in bytes of all files below `path`.
pub fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
