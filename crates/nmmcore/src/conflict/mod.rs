//! File conflict detection between mods.
//!
//! When multiple enabled mods write the same game-relative path, the one
//! with the higher load order wins. This module computes the winner of
//! every path and reports winning/losing status per mod. It is a pure
//! function of the enabled set and never touches the filesystem.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::modinfo::ModFiles;
use crate::paths::normalize_for_lookup;

/// One enabled mod as seen by the resolver.
#[derive(Debug, Clone, Copy)]
pub struct ModLayer<'a> {
    pub name: &'a str,
    pub order: usize,
    pub files: &'a ModFiles,
}

/// Who writes one destination path, and who wins it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolution {
    /// Destination as shipped by the winning mod
    pub relative_path: String,
    pub winner: String,
    /// Every writer, lowest order first
    pub writers: Vec<String>,
}

impl PathResolution {
    pub fn is_conflict(&self) -> bool {
        self.writers.len() > 1
    }
}

/// A file conflict between two mods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConflict {
    /// Lookup key of the conflicting path
    pub relative_path: String,
    pub winner: String,
    pub loser: String,
}

/// Summary of conflicts for a single mod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModConflicts {
    /// Other mods sharing at least one path with this one
    pub conflicts_with: BTreeSet<String>,
    /// Files this mod wins (overrides lower-order mods)
    pub winning: Vec<FileConflict>,
    /// Files this mod loses (hidden by higher-order mods)
    pub losing: Vec<FileConflict>,
}

impl ModConflicts {
    pub fn is_empty(&self) -> bool {
        self.winning.is_empty() && self.losing.is_empty()
    }

    pub fn has_winning(&self) -> bool {
        !self.winning.is_empty()
    }

    pub fn has_losing(&self) -> bool {
        !self.losing.is_empty()
    }
}

/// Winner of every destination path written by the enabled set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Keyed by [`normalize_for_lookup`] of the destination
    pub paths: BTreeMap<String, PathResolution>,
}

impl Resolution {
    pub fn get(&self, destination: &str) -> Option<&PathResolution> {
        self.paths.get(&normalize_for_lookup(destination))
    }

    /// Per-mod conflict summary. Mods without conflicts are absent.
    pub fn conflicts(&self) -> HashMap<String, ModConflicts> {
        let mut result: HashMap<String, ModConflicts> = HashMap::new();

        for (key, path) in self.paths.iter().filter(|(_, p)| p.is_conflict()) {
            for writer in &path.writers {
                let entry = result.entry(writer.clone()).or_default();
                entry.conflicts_with.extend(
                    path.writers
                        .iter()
                        .filter(|other| *other != writer)
                        .cloned(),
                );

                if writer == &path.winner {
                    for loser in path.writers.iter().filter(|w| *w != writer) {
                        entry.winning.push(FileConflict {
                            relative_path: key.clone(),
                            winner: writer.clone(),
                            loser: loser.clone(),
                        });
                    }
                } else {
                    entry.losing.push(FileConflict {
                        relative_path: key.clone(),
                        winner: path.winner.clone(),
                        loser: writer.clone(),
                    });
                }
            }
        }

        result
    }

    /// Paths whose winner is `name`.
    pub fn won_by<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a PathResolution> + 'a {
        self.paths.values().filter(move |p| p.winner == name)
    }
}

/// Resolve every destination path of the enabled mods.
///
/// Writers are ordered by `(order, name)`; the last one wins.
pub fn resolve(mods: &[ModLayer<'_>]) -> Resolution {
    let mut layers: Vec<&ModLayer<'_>> = mods.iter().collect();
    layers.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(b.name)));

    let mut paths: BTreeMap<String, PathResolution> = BTreeMap::new();
    for layer in layers {
        for destination in layer.files.destinations() {
            let key = normalize_for_lookup(&destination);
            let entry = paths.entry(key).or_insert_with(|| PathResolution {
                relative_path: destination.clone(),
                winner: String::new(),
                writers: Vec::new(),
            });
            // A mod listing the same path twice still counts once
            if entry.writers.last().map(String::as_str) == Some(layer.name) {
                continue;
            }
            entry.writers.push(layer.name.to_string());
            entry.winner = layer.name.to_string();
            entry.relative_path = destination;
        }
    }

    Resolution { paths }
}

/// Quick check: does this mod have any conflicts?
pub fn has_conflicts(mod_name: &str, conflicts: &HashMap<String, ModConflicts>) -> bool {
    conflicts
        .get(mod_name)
        .map(|c| !c.is_empty())
        .unwrap_or(false)
}
