//! Archive inspection and payload layout.
//!
//! Reads a mod archive's central directory without extracting anything,
//! builds a virtual file tree for preview, and locates the `nativepc`
//! payload root. The same entry listing drives [`plan_layout`], which
//! decides where every file ends up relative to the game directory, and
//! [`extract_planned`], which writes exactly those files.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::error::{Error, IoContext, Result};
use crate::modinfo::ModFiles;
use crate::paths::{self, NATIVEPC};
use crate::progress::{ProgressFn, ProgressTracker};

/// A node in the virtual file tree read from an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveFileNode {
    pub name: String,
    /// Archive-relative path, `/`-separated
    pub path: String,
    pub is_directory: bool,
    /// Present only for directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ArchiveFileNode>>,
}

/// Result of inspecting an archive, shown to the user before install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivePreview {
    #[serde(rename = "hasNativePC")]
    pub has_native_pc: bool,
    /// Archive-relative path of the payload root, empty if none was found
    #[serde(rename = "nativePCPath")]
    pub native_pc_path: String,
    pub files: Vec<ArchiveFileNode>,
}

/// One raw entry of the archive's central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Index inside the archive (entry order)
    pub index: usize,
    /// Canonical `/`-separated path
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// A file scheduled for extraction: archive index → game-relative destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub index: usize,
    /// Destination relative to the game directory (`nativepc/...` or a root path)
    pub destination: String,
}

/// Where every file of an archive goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutPlan {
    pub files: Vec<PlannedFile>,
    pub mod_files: ModFiles,
}

/// Whether any entry is a file that would actually be installed.
pub fn has_files(entries: &[ArchiveEntry]) -> bool {
    entries
        .iter()
        .any(|e| !e.is_dir && !paths::is_ignored_entry(&e.path))
}

/// Inspect an archive without writing anything to disk.
pub fn inspect(archive_path: &Path) -> Result<ArchivePreview> {
    let entries = read_entries(archive_path)?;
    if !has_files(&entries) {
        return Err(Error::ArchiveEmpty(archive_path.to_path_buf()));
    }

    let native_pc_path = find_payload_root(&entries).unwrap_or_default();
    tracing::debug!(
        "Inspected {:?}: {} entries, payload root {:?}",
        archive_path,
        entries.len(),
        native_pc_path
    );

    Ok(ArchivePreview {
        has_native_pc: !native_pc_path.is_empty(),
        native_pc_path,
        files: build_tree(&entries),
    })
}

/// Alias kept for the presentation boundary, which calls it "preview".
pub fn preview(archive_path: &Path) -> Result<ArchivePreview> {
    inspect(archive_path)
}

/// Read the central directory of a zip archive.
pub fn read_entries(archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
    let file = File::open(archive_path).map_err(|e| Error::unreadable(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| Error::unreadable(archive_path, e))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| Error::unreadable(archive_path, e))?;
        let raw_name = entry.name().to_string();
        let path = paths::canonical(&raw_name).ok_or_else(|| {
            Error::unreadable(archive_path, format!("unsafe entry path {raw_name:?}"))
        })?;
        if path.is_empty() {
            continue;
        }
        entries.push(ArchiveEntry {
            index,
            path,
            is_dir: entry.is_dir(),
            size: entry.size(),
        });
    }
    Ok(entries)
}

/// Find the shallowest directory named `nativepc`.
///
/// Directories may only be implied by file paths, so every directory
/// prefix of every entry is considered. Equal depth resolves to whichever
/// appears first in entry order.
pub fn find_payload_root(entries: &[ArchiveEntry]) -> Option<String> {
    let mut best: Option<(usize, String)> = None;

    for entry in entries {
        if paths::is_ignored_entry(&entry.path) {
            continue;
        }
        let components: Vec<&str> = entry.path.split('/').collect();
        let dir_count = if entry.is_dir {
            components.len()
        } else {
            components.len() - 1
        };

        for (idx, component) in components.iter().take(dir_count).enumerate() {
            if !paths::is_nativepc(component) {
                continue;
            }
            let depth = idx + 1;
            if best.as_ref().map_or(true, |(d, _)| depth < *d) {
                best = Some((depth, components[..=idx].join("/")));
            }
            break;
        }
    }

    best.map(|(_, path)| path)
}

/// Partition archive files into `nativepc` and root placements.
///
/// * under the payload root → `nativepc`, with the payload root stripped
/// * under the payload root's parent → `root`, with that parent stripped
/// * anywhere else → `root`, at its archive-relative path
///
/// Junk entries are skipped and duplicate destinations keep the first entry.
pub fn plan_layout(entries: &[ArchiveEntry], native_pc_path: &str) -> LayoutPlan {
    let payload: Vec<&str> = if native_pc_path.is_empty() {
        Vec::new()
    } else {
        native_pc_path.split('/').collect()
    };
    let base: &[&str] = if payload.is_empty() {
        &[]
    } else {
        &payload[..payload.len() - 1]
    };

    let mut plan = LayoutPlan::default();
    let mut seen: HashSet<String> = HashSet::new();

    for entry in entries.iter().filter(|e| !e.is_dir) {
        if paths::is_ignored_entry(&entry.path) {
            continue;
        }
        let components: Vec<&str> = entry.path.split('/').collect();

        let in_payload = if payload.is_empty() {
            None
        } else {
            strip_components(&components, &payload)
        };

        let (destination, in_nativepc) = if let Some(rest) = in_payload {
            (format!("{NATIVEPC}/{rest}"), true)
        } else if let Some(rest) = strip_components(&components, base) {
            (rest, false)
        } else {
            (entry.path.clone(), false)
        };

        if !seen.insert(paths::normalize_for_lookup(&destination)) {
            tracing::debug!("Skipping duplicate archive entry {:?}", entry.path);
            continue;
        }

        if in_nativepc {
            let relative = destination[NATIVEPC.len() + 1..].to_string();
            plan.mod_files.nativepc.push(relative);
        } else {
            plan.mod_files.root.push(destination.clone());
        }
        plan.files.push(PlannedFile {
            index: entry.index,
            destination,
        });
    }

    plan
}

/// Case-insensitively strip a component prefix; `None` unless something remains.
fn strip_components(components: &[&str], prefix: &[&str]) -> Option<String> {
    if components.len() <= prefix.len() {
        return None;
    }
    let matches = components
        .iter()
        .zip(prefix)
        .all(|(a, b)| a.eq_ignore_ascii_case(b));
    matches.then(|| components[prefix.len()..].join("/"))
}

/// Extract planned files below `dest_root`, returning the total bytes written.
pub fn extract_planned(
    archive_path: &Path,
    plan: &LayoutPlan,
    dest_root: &Path,
    progress: Option<&ProgressFn<'_>>,
) -> Result<u64> {
    let file = File::open(archive_path).map_err(|e| Error::unreadable(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| Error::unreadable(archive_path, e))?;
    let mut tracker = ProgressTracker::new(progress, plan.files.len());
    let mut total = 0u64;

    for planned in &plan.files {
        let mut entry = archive
            .by_index(planned.index)
            .map_err(|e| Error::unreadable(archive_path, e))?;
        let target = paths::join_relative(dest_root, &planned.destination);
        paths::ensure_parent_dirs(&target).with_path("create directory for", &target)?;

        let mut out = File::create(&target).with_path("create", &target)?;
        total += io::copy(&mut entry, &mut out).with_path("extract into", &target)?;
        tracker.bump(&planned.destination);
    }

    tracker.finish();
    Ok(total)
}

struct TreeNode {
    name: String,
    path: String,
    is_dir: bool,
    children: Vec<usize>,
    by_name: HashMap<String, usize>,
}

/// Build the preview tree in entry order, synthesizing implied directories.
fn build_tree(entries: &[ArchiveEntry]) -> Vec<ArchiveFileNode> {
    let mut nodes: Vec<TreeNode> = Vec::new();
    let mut roots: Vec<usize> = Vec::new();
    let mut root_index: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let components: Vec<&str> = entry.path.split('/').collect();
        let mut parent: Option<usize> = None;

        for (idx, component) in components.iter().enumerate() {
            let is_last = idx + 1 == components.len();
            let is_dir = !is_last || entry.is_dir;

            let existing = match parent {
                Some(p) => nodes[p].by_name.get(*component).copied(),
                None => root_index.get(*component).copied(),
            };

            let node_id = match existing {
                Some(id) => {
                    nodes[id].is_dir |= is_dir;
                    id
                }
                None => {
                    let id = nodes.len();
                    nodes.push(TreeNode {
                        name: component.to_string(),
                        path: components[..=idx].join("/"),
                        is_dir,
                        children: Vec::new(),
                        by_name: HashMap::new(),
                    });
                    match parent {
                        Some(p) => {
                            nodes[p].children.push(id);
                            nodes[p].by_name.insert(component.to_string(), id);
                        }
                        None => {
                            roots.push(id);
                            root_index.insert(component.to_string(), id);
                        }
                    }
                    id
                }
            };
            parent = Some(node_id);
        }
    }

    roots.iter().map(|&id| to_file_node(&nodes, id)).collect()
}

fn to_file_node(nodes: &[TreeNode], id: usize) -> ArchiveFileNode {
    let node = &nodes[id];
    ArchiveFileNode {
        name: node.name.clone(),
        path: node.path.clone(),
        is_directory: node.is_dir,
        children: node.is_dir.then(|| {
            node.children
                .iter()
                .map(|&child| to_file_node(nodes, child))
                .collect()
        }),
    }
}
