//! End-to-end tests driving `ModManager` against real archives on disk.
//!
//! These tests verify:
//! - Installing two mods that ship the same file
//! - Higher load order winning the live copy
//! - Disabling the winner restoring the shadowed copy
//! - Deleting mods leaving the game directory clean

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use nmmcore::manager::{ModInstallFormData, OperationStatus};
use nmmcore::ModManager;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn write_zip(path: &Path, files: &[(&str, &str)]) {
    let mut writer = zip::ZipWriter::new(fs::File::create(path).unwrap());
    for (name, content) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

fn setup() -> (TempDir, PathBuf, ModManager) {
    let temp_dir = TempDir::new().unwrap();
    let game = temp_dir.path().join("MonsterHunterWorld");
    fs::create_dir_all(&game).unwrap();

    let mut manager = ModManager::open(&temp_dir.path().join("config.json")).unwrap();
    manager.set_game_directory(&game, None).unwrap();
    (temp_dir, game, manager)
}

fn install(manager: &mut ModManager, dir: &Path, name: &str, files: &[(&str, &str)]) {
    let archive = dir.join(format!("{name}.zip"));
    write_zip(&archive, files);
    let form = ModInstallFormData {
        name: name.to_string(),
        nexus_id: String::new(),
        categories: vec!["Armor".to_string()],
    };
    manager.install(&archive, &form, None).unwrap();
}

#[test]
fn test_armor_override_and_restore() {
    let (temp_dir, game, mut manager) = setup();
    install(
        &mut manager,
        temp_dir.path(),
        "Armor1",
        &[("Armor1/nativepc/armor/a.tex", "armor one")],
    );
    install(
        &mut manager,
        temp_dir.path(),
        "Armor2",
        &[("nativePC\\armor\\a.tex", "armor two")],
    );
    assert_eq!(manager.registry().get("Armor2").unwrap().order, 1);

    manager.enable("Armor1", None).unwrap();
    manager.enable("Armor2", None).unwrap();
    let result = manager.sync(None).unwrap();
    assert_eq!(result.status, OperationStatus::Success);

    let live = game.join("nativepc").join("armor").join("a.tex");
    assert_eq!(fs::read_to_string(&live).unwrap(), "armor two");

    let mods = manager.mods().unwrap();
    assert!(mods.iter().all(|m| m.has_conflict));

    manager.disable("Armor2", None).unwrap();
    manager.sync(None).unwrap();
    assert_eq!(fs::read_to_string(&live).unwrap(), "armor one");
    assert!(!manager.mod_info("Armor2").unwrap().enabled);
    assert!(manager.mod_info("Armor1").unwrap().enabled);
}

#[test]
fn test_delete_everything_leaves_game_dir_clean() {
    let (temp_dir, game, mut manager) = setup();
    fs::write(game.join("MonsterHunterWorld.exe"), "game").unwrap();
    install(
        &mut manager,
        temp_dir.path(),
        "Armor1",
        &[
            ("nativepc/armor/a.tex", "armor one"),
            ("dinput8.dll", "loader"),
        ],
    );
    install(
        &mut manager,
        temp_dir.path(),
        "Armor2",
        &[("nativepc/armor/a.tex", "armor two")],
    );
    manager.enable("Armor1", None).unwrap();
    manager.enable("Armor2", None).unwrap();
    assert!(game.join("dinput8.dll").exists());

    assert!(manager.delete("Armor2", None).unwrap().success);
    assert_eq!(
        fs::read_to_string(game.join("nativepc/armor/a.tex")).unwrap(),
        "armor one"
    );
    assert!(manager.delete("Armor1", None).unwrap().success);

    let remaining: Vec<String> = fs::read_dir(&game)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(remaining, vec!["MonsterHunterWorld.exe"]);
    assert!(manager.registry().is_empty());
}

#[test]
fn test_state_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");
    let game = temp_dir.path().join("game");
    fs::create_dir_all(&game).unwrap();

    {
        let mut manager = ModManager::open(&config_path).unwrap();
        manager.set_game_directory(&game, None).unwrap();
        install(
            &mut manager,
            temp_dir.path(),
            "Armor1",
            &[("nativepc/armor/a.tex", "armor one")],
        );
        manager.enable("Armor1", None).unwrap();
    }

    let mut manager = ModManager::open(&config_path).unwrap();
    assert!(manager.registry().is_enabled("Armor1"));
    let result = manager.sync(None).unwrap();
    assert!(result.success);
    assert_eq!(
        fs::read_to_string(game.join("nativepc/armor/a.tex")).unwrap(),
        "armor one"
    );
}
