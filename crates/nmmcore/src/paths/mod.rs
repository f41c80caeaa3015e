//! Game-relative path handling.
//!
//! Mod archives are frequently authored on Windows, so entry names may use
//! `\` separators and arbitrary casing. This module handles:
//! - Converting `\` to `/` and dropping empty / `.` components
//! - Rejecting entries that would escape their destination (`..`, absolute)
//! - Case-insensitive lookup keys (the game itself is case-insensitive)
//! - Unicode normalization (NFC) for consistent path matching
//! - Recognizing OS junk entries that never belong in a mod payload

use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Name of the payload-root directory inside mod archives and the game dir.
pub const NATIVEPC: &str = "nativepc";

/// Entries that archivers add but that are never part of a mod.
const IGNORED_COMPONENTS: &[&str] = &["__macosx", ".ds_store", "thumbs.db", "desktop.ini"];

/// Convert Windows path separators to `/`.
/// `nativepc\armor\a.tex` -> `nativepc/armor/a.tex`
pub fn to_forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Split an archive entry name into clean components.
///
/// Returns `None` if the entry tries to leave its root (`..`, a leading
/// `/`, or a drive prefix such as `C:`).
pub fn split_components(path: &str) -> Option<Vec<String>> {
    let unified = to_forward_slashes(path);
    if unified.starts_with('/') {
        return None;
    }

    let mut parts = Vec::new();
    for (idx, part) in unified.split('/').enumerate() {
        match part {
            "" | "." => continue,
            ".." => return None,
            _ if idx == 0 && part.len() == 2 && part.ends_with(':') => return None,
            _ => parts.push(part.to_string()),
        }
    }
    Some(parts)
}

/// Clean an entry name into canonical `a/b/c` form (see [`split_components`]).
pub fn canonical(path: &str) -> Option<String> {
    split_components(path).map(|parts| parts.join("/"))
}

/// Normalize a path for lookups and comparisons (NFC normalized, lowercase, forward slashes, trimmed)
pub fn normalize_for_lookup(path: &str) -> String {
    path.nfc()
        .collect::<String>()
        .to_lowercase()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Whether a single path component names the payload root.
pub fn is_nativepc(component: &str) -> bool {
    component.eq_ignore_ascii_case(NATIVEPC)
}

/// Whether any component of `path` is archiver junk (`__MACOSX`, `.DS_Store`, ...).
pub fn is_ignored_entry(path: &str) -> bool {
    path.split(['/', '\\']).any(|part| {
        let lower = part.to_ascii_lowercase();
        IGNORED_COMPONENTS.contains(&lower.as_str())
    })
}

/// Join a base path with a `/`-separated relative path.
pub fn join_relative(base: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(base.to_path_buf(), |acc, part| acc.join(part))
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp = temp_sibling(path);
    ensure_parent_dirs(path)?;
    if let Err(err) = std::fs::write(&temp, contents) {
        let _ = std::fs::remove_file(&temp);
        return Err(err);
    }
    std::fs::rename(&temp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp);
    })
}

/// `<dir>/.<name>.<pid>.<nanos>.tmp` next to `path`.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_name = format!(".{name}.{}.{stamp}.tmp", std::process::id());
    match path.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

/// Remove empty directories from `start` upwards, stopping at (and never
/// removing) `stop`.
pub fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        let is_empty = std::fs::read_dir(&current)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty || std::fs::remove_dir(&current).is_err() {
            break;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
}
