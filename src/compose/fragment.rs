//! Compose fragment model and discovery

use crate::error::{Result, SigilError};
use crate::settings::Project;
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// Sort position for fragments without an explicit order marker
pub const DEFAULT_ORDER: i64 = 99_999_999;

/// Marker scanned for in the raw fragment text
const ORDER_MARKER: &str = "manage-order";

/// One discovered compose template file
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Absolute path the fragment was loaded from
    pub path: PathBuf,
    /// Parsed document
    pub doc: Value,
    /// Merge position, lower merges earlier
    pub order: i64,
}

impl Fragment {
    /// Read and parse a fragment file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_text(path, &text)
    }

    /// Parse a fragment from its raw text
    pub fn from_text(path: &Path, text: &str) -> Result<Self> {
        let order = parse_order(path, text)?;
        let doc = serde_yaml::from_str(text).map_err(|e| {
            SigilError::FragmentParse(format!("{}: {}", path.display(), e))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            doc,
            order,
        })
    }
}

/// Extract the merge order from the raw text. The marker may be written
/// with or without a colon; the rest of its line must be an integer.
pub fn parse_order(path: &Path, text: &str) -> Result<i64> {
    let rest = match text.split_once(ORDER_MARKER) {
        Some((_, rest)) => rest,
        None => return Ok(DEFAULT_ORDER),
    };
    let line = rest.lines().next().unwrap_or("");
    let cleaned = line.replace(':', "");
    let cleaned = cleaned.trim();
    cleaned.parse::<i64>().map_err(|_| SigilError::OrderMarker {
        path: path.display().to_string(),
        message: format!("'{}' is not an integer", cleaned),
    })
}

/// Sort fragments by order, keeping discovery order among equals
pub fn sort_fragments(fragments: &mut [Fragment]) {
    fragments.sort_by_key(|fragment| fragment.order);
}

/// Collect candidate fragment paths for a project, in a fixed tree order:
/// the image-definition tree, the whole project tree, the system override
/// tree, then the project-local override locations. Duplicates keep their
/// first position.
pub fn discover_fragments(project: &Project) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = Vec::new();

    for tree in [project.images_dir(), project.root.clone(), project.etc_base.clone()] {
        collect_tree(&tree, &mut found);
    }

    for path in project.override_paths() {
        if path.is_file() {
            push_unique(&mut found, path);
        } else if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&path)
                .into_iter()
                .flatten()
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| p.is_file() && is_fragment_name(p))
                .collect();
            entries.sort();
            for entry in entries {
                push_unique(&mut found, entry);
            }
        }
    }

    found
}

fn collect_tree(root: &Path, found: &mut Vec<PathBuf>) {
    if !root.is_dir() {
        return;
    }
    for entry in walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if entry.file_type().is_file() && is_fragment_name(path) {
            push_unique(found, path.to_path_buf());
        }
    }
}

fn is_fragment_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("docker-compose") && name.ends_with(".yml"))
        .unwrap_or(false)
}

fn push_unique(found: &mut Vec<PathBuf>, path: PathBuf) {
    if !found.contains(&path) {
        found.push(path);
    }
}
