//! Applying mods to the live game directory.
//!
//! [`ActivationEngine::sync`] converges the game directory to the winners
//! computed by [`conflict::resolve`] over the registry's enabled mods:
//! files no longer wanted are removed, new or changed winners are written.
//! What was written, and on whose behalf, is recorded in an activation
//! manifest inside the storage root so the next pass only touches paths
//! that actually changed.
//!
//! Per-path failures never abort a pass; they are collected in the
//! [`SyncReport`] and the manifest keeps describing what is really on disk.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::conflict::{self, ModLayer, PathResolution, Resolution};
use crate::error::{Error, IoContext, Result};
use crate::modinfo::ModInfo;
use crate::paths;
use crate::progress::{ProgressFn, ProgressTracker};
use crate::registry::OrderedRegistry;
use crate::store::ModStore;

/// Manifest file name inside the storage root.
pub const MANIFEST_FILE: &str = ".activation.json";

const MANIFEST_VERSION: u32 = 1;

/// How winning files are placed in the game directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Byte copy of the stored payload
    #[default]
    Copy,
    /// Hard link to the stored payload, falling back to a copy
    Hardlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ManifestEntry {
    /// Game-relative path as written
    path: String,
    owner: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    /// Keyed by lookup key
    entries: BTreeMap<String, ManifestEntry>,
}

/// One path that could not be written or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFailure {
    /// Game-relative path
    pub path: String,
    /// Mod the path was being written or removed for
    pub mod_name: String,
    pub reason: String,
}

impl PathFailure {
    pub fn to_error(&self) -> Error {
        Error::PathWriteFailed {
            path: self.path.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// Outcome of one [`ActivationEngine::sync`] pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Paths (re)written in the game directory
    pub written: Vec<String>,
    /// Paths removed from the game directory
    pub removed: Vec<String>,
    /// Desired paths already in place
    pub unchanged: usize,
    pub failures: Vec<PathFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of filesystem changes made in the game directory.
    pub fn write_count(&self) -> usize {
        self.written.len() + self.removed.len()
    }

    pub fn failed_mods(&self) -> BTreeSet<&str> {
        self.failures.iter().map(|f| f.mod_name.as_str()).collect()
    }

    pub fn has_failures_for(&self, name: &str) -> bool {
        self.failures.iter().any(|f| f.mod_name == name)
    }
}

/// Converges the live game directory to the registry's enabled mods.
#[derive(Debug, Clone)]
pub struct ActivationEngine {
    game_dir: PathBuf,
    storage_root: PathBuf,
    deploy_mode: DeployMode,
}

impl ActivationEngine {
    pub fn new(game_dir: &Path, storage_root: &Path, deploy_mode: DeployMode) -> Self {
        ActivationEngine {
            game_dir: game_dir.to_path_buf(),
            storage_root: storage_root.to_path_buf(),
            deploy_mode,
        }
    }

    pub fn game_dir(&self) -> &Path {
        &self.game_dir
    }

    pub fn deploy_mode(&self) -> DeployMode {
        self.deploy_mode
    }

    fn manifest_path(&self) -> PathBuf {
        self.storage_root.join(MANIFEST_FILE)
    }

    /// Enable a mod and apply the result.
    pub fn enable(
        &self,
        name: &str,
        store: &ModStore,
        registry: &mut OrderedRegistry,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<SyncReport> {
        registry.set_enabled(name, true)?;
        self.sync(store, registry, progress)
    }

    /// Disable a mod and apply the result.
    pub fn disable(
        &self,
        name: &str,
        store: &ModStore,
        registry: &mut OrderedRegistry,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<SyncReport> {
        registry.set_enabled(name, false)?;
        self.sync(store, registry, progress)
    }

    /// Bring the game directory in line with the registry.
    ///
    /// Errors are returned only when the game directory or manifest
    /// cannot be used at all; individual paths fail into the report.
    pub fn sync(
        &self,
        store: &ModStore,
        registry: &OrderedRegistry,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<SyncReport> {
        fs::create_dir_all(&self.game_dir).with_path("create game directory", &self.game_dir)?;

        let mut report = SyncReport::default();
        let on_disk = self.load_manifest();
        let mut manifest = match &on_disk {
            Some(manifest) => manifest.clone(),
            None => self.rebuild_manifest(store, registry),
        };
        manifest.version = MANIFEST_VERSION;

        let mut enabled: Vec<(usize, ModInfo)> = Vec::new();
        for item in registry.enabled_in_order() {
            match store.load(&item.name) {
                Ok(info) => enabled.push((item.order, info)),
                Err(e) => {
                    tracing::warn!("Cannot apply mod \"{}\": {}", item.name, e);
                    report.failures.push(PathFailure {
                        path: String::new(),
                        mod_name: item.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        let desired = resolve_infos(&enabled);

        let removals: Vec<(String, ManifestEntry)> = manifest
            .entries
            .iter()
            .filter(|(key, _)| !desired.paths.contains_key(*key))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();

        let mut writes: Vec<(&String, &PathResolution)> = Vec::new();
        for (key, wanted) in &desired.paths {
            let in_place = manifest.entries.get(key).is_some_and(|entry| {
                entry.owner == wanted.winner
                    && entry.path == wanted.relative_path
                    && self.live_path(&entry.path).is_file()
            });
            if in_place {
                report.unchanged += 1;
            } else {
                writes.push((key, wanted));
            }
        }

        let mut tracker = ProgressTracker::new(progress, removals.len() + writes.len());

        for (key, entry) in removals {
            match self.remove_live(&entry.path) {
                Ok(()) => {
                    manifest.entries.remove(&key);
                    report.removed.push(entry.path.clone());
                }
                Err(e) => {
                    tracing::warn!("Failed to remove {:?}: {}", entry.path, e);
                    report.failures.push(PathFailure {
                        path: entry.path.clone(),
                        mod_name: entry.owner.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            tracker.bump(&entry.path);
        }

        for (key, wanted) in writes {
            // Same key, different spelling: drop the old file first
            if let Some(old) = manifest.entries.get(key) {
                if old.path != wanted.relative_path {
                    let old_path = old.path.clone();
                    match self.remove_live(&old_path) {
                        Ok(()) => {
                            manifest.entries.remove(key);
                        }
                        Err(e) => {
                            tracing::debug!("Could not remove renamed {:?}: {}", old_path, e);
                        }
                    }
                }
            }

            let source = store.source_path(&wanted.winner, &wanted.relative_path);
            match self.materialize(&source, &wanted.relative_path) {
                Ok(()) => {
                    manifest.entries.insert(
                        key.clone(),
                        ManifestEntry {
                            path: wanted.relative_path.clone(),
                            owner: wanted.winner.clone(),
                        },
                    );
                    report.written.push(wanted.relative_path.clone());
                }
                Err(e) => {
                    tracing::warn!("Failed to write {:?}: {}", wanted.relative_path, e);
                    report.failures.push(PathFailure {
                        path: wanted.relative_path.clone(),
                        mod_name: wanted.winner.clone(),
                        reason: e.to_string(),
                    });
                    // The previous owner's copy is still live
                    if let Some(old) = manifest.entries.get(key) {
                        if old.owner != wanted.winner {
                            report.failures.push(PathFailure {
                                path: old.path.clone(),
                                mod_name: old.owner.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
            tracker.bump(&wanted.relative_path);
        }
        tracker.finish();

        if on_disk.as_ref() != Some(&manifest) {
            self.save_manifest(&manifest)?;
        }
        self.update_applied_flags(store, registry, &report);

        tracing::info!(
            "Sync: {} written, {} removed, {} unchanged, {} failed",
            report.written.len(),
            report.removed.len(),
            report.unchanged,
            report.failures.len()
        );
        Ok(report)
    }

    fn live_path(&self, relative: &str) -> PathBuf {
        paths::join_relative(&self.game_dir, relative)
    }

    fn remove_live(&self, relative: &str) -> std::io::Result<()> {
        let target = self.live_path(relative);
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(parent) = target.parent() {
            paths::prune_empty_dirs(parent, &self.game_dir);
        }
        Ok(())
    }

    /// Place `source` at `relative` via a sibling temp file and a rename.
    fn materialize(&self, source: &Path, relative: &str) -> std::io::Result<()> {
        let target = self.live_path(relative);
        paths::ensure_parent_dirs(&target)?;
        let temp = paths::temp_sibling(&target);

        let placed = match self.deploy_mode {
            DeployMode::Copy => fs::copy(source, &temp).map(|_| ()),
            DeployMode::Hardlink => fs::hard_link(source, &temp).or_else(|e| {
                tracing::debug!("Hard link failed for {:?}, copying: {}", source, e);
                fs::copy(source, &temp).map(|_| ())
            }),
        };
        if let Err(e) = placed {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }

        fs::rename(&temp, &target).inspect_err(|_| {
            let _ = fs::remove_file(&temp);
        })
    }

    /// The manifest as stored, or `None` when it has to be rebuilt.
    fn load_manifest(&self) -> Option<Manifest> {
        let path = self.manifest_path();
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Manifest>(&raw) {
                Ok(manifest) => return Some(manifest),
                Err(e) => {
                    tracing::warn!("Activation manifest {:?} is corrupt, rebuilding: {}", path, e)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No activation manifest, rebuilding from applied mods");
            }
            Err(e) => tracing::warn!("Failed to read {:?}, rebuilding: {}", path, e),
        }
        None
    }

    /// Reconstruct what should be on disk from the mods flagged as applied.
    fn rebuild_manifest(&self, store: &ModStore, registry: &OrderedRegistry) -> Manifest {
        let applied: Vec<(usize, ModInfo)> = match store.load_all() {
            Ok(mods) => mods
                .into_iter()
                .filter(|info| info.enabled)
                .map(|info| {
                    let order = registry.position(&info.name).unwrap_or(usize::MAX);
                    (order, info)
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to scan storage for applied mods: {}", e);
                Vec::new()
            }
        };

        let entries = resolve_infos(&applied)
            .paths
            .into_iter()
            .map(|(key, path)| {
                let entry = ManifestEntry {
                    path: path.relative_path,
                    owner: path.winner,
                };
                (key, entry)
            })
            .collect();

        Manifest {
            version: MANIFEST_VERSION,
            entries,
        }
    }

    fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path();
        let raw = serde_json::to_string_pretty(manifest)
            .map_err(|e| Error::io(format!("serialize {path:?}"), e.into()))?;
        paths::write_atomic(&path, raw.as_bytes()).with_path("write", &path)
    }

    fn update_applied_flags(
        &self,
        store: &ModStore,
        registry: &OrderedRegistry,
        report: &SyncReport,
    ) {
        let failed: HashSet<&str> = report.failed_mods().into_iter().collect();
        for item in registry.items() {
            if failed.contains(item.name.as_str()) {
                continue;
            }
            if let Err(e) = store.set_applied(&item.name, item.enabled) {
                tracing::warn!("Failed to record applied state of \"{}\": {}", item.name, e);
            }
        }
    }
}

fn resolve_infos(mods: &[(usize, ModInfo)]) -> Resolution {
    let layers: Vec<ModLayer<'_>> = mods
        .iter()
        .map(|(order, info)| ModLayer {
            name: &info.name,
            order: *order,
            files: &info.files,
        })
        .collect();
    conflict::resolve(&layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_zip;

    struct Fixture {
        _tmp: tempfile::TempDir,
        game: PathBuf,
        store: ModStore,
        registry: OrderedRegistry,
        engine: ActivationEngine,
    }

    impl Fixture {
        fn new(mode: DeployMode) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let game = tmp.path().join("game");
            let storage = tmp.path().join("storage");
            fs::create_dir_all(&game).unwrap();
            let store = ModStore::open(&storage).unwrap();
            let engine = ActivationEngine::new(&game, &storage, mode);
            Fixture {
                _tmp: tmp,
                game,
                store,
                registry: OrderedRegistry::new(),
                engine,
            }
        }

        fn install(&mut self, name: &str, entries: &[(&str, Option<&str>)]) {
            let zip_path = self.store.root().parent().unwrap().join(format!("{name}.zip"));
            write_zip(&zip_path, entries);
            self.store.install(&zip_path, name, None, vec![], None).unwrap();
            self.registry.append(name).unwrap();
        }

        fn enable(&mut self, name: &str) -> SyncReport {
            self.engine
                .enable(name, &self.store, &mut self.registry, None)
                .unwrap()
        }

        fn disable(&mut self, name: &str) -> SyncReport {
            self.engine
                .disable(name, &self.store, &mut self.registry, None)
                .unwrap()
        }

        fn live(&self, relative: &str) -> Option<String> {
            fs::read_to_string(paths::join_relative(&self.game, relative)).ok()
        }
    }

    #[test]
    fn test_enable_writes_files_and_flags_applied() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install(
            "A",
            &[("A/nativepc/chunk/a.bin", Some("from A")), ("A/dinput8.dll", Some("dll"))],
        );

        let report = fx.enable("A");
        assert!(report.is_clean());
        assert_eq!(report.written.len(), 2);
        assert_eq!(fx.live("nativepc/chunk/a.bin").as_deref(), Some("from A"));
        assert_eq!(fx.live("dinput8.dll").as_deref(), Some("dll"));
        assert!(fx.store.load("A").unwrap().enabled);
    }

    #[test]
    fn test_second_sync_is_a_no_op() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install("A", &[("nativepc/chunk/a.bin", Some("a"))]);
        fx.install("B", &[("nativepc/chunk/a.bin", Some("b"))]);
        fx.enable("A");
        fx.enable("B");

        let again = fx.engine.sync(&fx.store, &fx.registry, None).unwrap();
        assert_eq!(again.write_count(), 0);
        assert_eq!(again.unchanged, 1);
    }

    #[test]
    fn test_disable_restores_previous_winner() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install(
            "A",
            &[("nativepc/chunk/a.bin", Some("a")), ("nativepc/only_a.bin", Some("a only"))],
        );
        fx.install(
            "B",
            &[("nativepc/chunk/a.bin", Some("b")), ("nativepc/em/only_b.bin", Some("b only"))],
        );
        fx.enable("A");
        fx.enable("B");
        assert_eq!(fx.live("nativepc/chunk/a.bin").as_deref(), Some("b"));

        let report = fx.disable("B");
        assert!(report.is_clean());
        assert_eq!(report.removed, vec!["nativepc/em/only_b.bin"]);
        assert_eq!(report.written, vec!["nativepc/chunk/a.bin"]);
        assert_eq!(fx.live("nativepc/chunk/a.bin").as_deref(), Some("a"));
        assert_eq!(fx.live("nativepc/only_a.bin").as_deref(), Some("a only"));
        assert!(!fx.game.join("nativepc/em").exists());
        assert!(!fx.store.load("B").unwrap().enabled);

        fx.disable("A");
        assert!(!fx.game.join("nativepc").exists());
        assert!(fx.game.exists());
    }

    #[test]
    fn test_reorder_changes_winner() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install("A", &[("nativepc/x.bin", Some("a"))]);
        fx.install("B", &[("nativepc/x.bin", Some("b"))]);
        fx.enable("A");
        fx.enable("B");

        fx.registry.reorder("B", 0).unwrap();
        let report = fx.engine.sync(&fx.store, &fx.registry, None).unwrap();
        assert_eq!(report.written, vec!["nativepc/x.bin"]);
        assert_eq!(fx.live("nativepc/x.bin").as_deref(), Some("a"));
    }

    #[test]
    fn test_missing_manifest_is_rebuilt() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install("A", &[("nativepc/x.bin", Some("a"))]);
        fx.enable("A");

        fs::remove_file(fx.store.root().join(MANIFEST_FILE)).unwrap();
        let report = fx.engine.sync(&fx.store, &fx.registry, None).unwrap();
        assert_eq!(report.write_count(), 0);

        fs::remove_file(fx.store.root().join(MANIFEST_FILE)).unwrap();
        let report = fx.disable("A");
        assert_eq!(report.removed, vec!["nativepc/x.bin"]);
        assert!(fx.live("nativepc/x.bin").is_none());
    }

    #[test]
    fn test_failed_path_is_collected() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install(
            "A",
            &[("nativepc/blocked.bin", Some("a")), ("nativepc/fine.bin", Some("a"))],
        );
        // A non-empty directory where a file must go cannot be replaced
        fs::create_dir_all(fx.game.join("nativepc/blocked.bin/inner")).unwrap();

        let report = fx.enable("A");
        assert!(!report.is_clean());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "nativepc/blocked.bin");
        assert!(matches!(
            report.failures[0].to_error(),
            Error::PathWriteFailed { .. }
        ));
        assert_eq!(fx.live("nativepc/fine.bin").as_deref(), Some("a"));
        assert!(!fx.store.load("A").unwrap().enabled);

        fs::remove_dir_all(fx.game.join("nativepc/blocked.bin")).unwrap();
        let retry = fx.engine.sync(&fx.store, &fx.registry, None).unwrap();
        assert!(retry.is_clean());
        assert_eq!(retry.written, vec!["nativepc/blocked.bin"]);
        assert!(fx.store.load("A").unwrap().enabled);
    }

    #[test]
    fn test_failed_takeover_is_charged_to_live_owner() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install("A", &[("nativepc/x.bin", Some("a"))]);
        fx.install("B", &[("nativepc/x.bin", Some("b"))]);
        fx.enable("A");
        fx.enable("B");
        fs::remove_dir_all(fx.store.payload_dir("A")).unwrap();

        let report = fx.disable("B");
        assert!(report.has_failures_for("A"));
        assert!(report.has_failures_for("B"));
        assert_eq!(fx.live("nativepc/x.bin").as_deref(), Some("b"));
        assert!(fx.store.load("B").unwrap().enabled);
    }

    #[test]
    fn test_unchanged_manifest_is_not_rewritten() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install("A", &[("nativepc/x.bin", Some("a"))]);
        fx.enable("A");

        let manifest_path = fx.store.root().join(MANIFEST_FILE);
        let stored: Manifest =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        let compact = serde_json::to_string(&stored).unwrap();
        fs::write(&manifest_path, &compact).unwrap();

        let report = fx.engine.sync(&fx.store, &fx.registry, None).unwrap();
        assert_eq!(report.write_count(), 0);
        assert_eq!(fs::read_to_string(&manifest_path).unwrap(), compact);
    }

    #[test]
    fn test_mod_named_like_manifest_file() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install("activation.json", &[("nativepc/x.bin", Some("a"))]);
        fx.install("Other", &[("nativepc/y.bin", Some("o"))]);

        let report = fx.enable("Other");
        assert!(report.is_clean());
        let report = fx.enable("activation.json");
        assert!(report.is_clean());
        assert_eq!(fx.live("nativepc/x.bin").as_deref(), Some("a"));
        assert_eq!(fx.live("nativepc/y.bin").as_deref(), Some("o"));
        assert!(fx.store.root().join(MANIFEST_FILE).is_file());
    }

    #[test]
    fn test_hardlink_mode() {
        let mut fx = Fixture::new(DeployMode::Hardlink);
        fx.install("A", &[("nativepc/x.bin", Some("linked"))]);
        let report = fx.enable("A");
        assert!(report.is_clean());
        assert_eq!(fx.live("nativepc/x.bin").as_deref(), Some("linked"));
    }

    #[test]
    fn test_sync_reports_progress() {
        let mut fx = Fixture::new(DeployMode::Copy);
        fx.install("A", &[("nativepc/x.bin", Some("a")), ("y.txt", Some("y"))]);
        fx.registry.set_enabled("A", true).unwrap();

        let seen = std::sync::Mutex::new(Vec::new());
        let callback = |p: crate::progress::FileProgress| seen.lock().unwrap().push(p);
        fx.engine
            .sync(&fx.store, &fx.registry, Some(&callback))
            .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.last().unwrap().current, 2);
    }
}
