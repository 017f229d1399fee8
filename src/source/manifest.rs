//! Project manifest parsing

use crate::error::{Result, SigilError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name marking the project root
pub const MANIFEST_FILE: &str = "MANIFEST";

/// Parsed project manifest
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Odoo version, e.g. "15.0"
    #[serde(deserialize_with = "version_as_string")]
    pub version: String,
    /// Module repository groups
    #[serde(default)]
    pub modules: Vec<ModuleGroup>,
    /// Addon paths relative to the project root
    #[serde(default)]
    pub addons_paths: Vec<String>,
}

/// One manifest entry: a checkout subdirectory plus its repository urls
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleGroup {
    /// Subdirectory the repositories are checked out under
    pub path: String,
    /// Branch tracked by every repository in the group
    pub branch: String,
    /// Repository urls
    pub urls: Vec<String>,
}

/// A single module repository derived from the manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Repository name (last url segment, ".git" stripped)
    pub name: String,
    /// Checkout directory relative to the project root
    pub subdir: PathBuf,
    /// Repository url
    pub url: String,
    /// Tracked branch
    pub branch: String,
}

impl Manifest {
    /// Load and parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SigilError::Manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            SigilError::Manifest(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Locate the project root by searching upward for a manifest file
    pub fn find_root(start: &Path) -> Result<PathBuf> {
        for dir in start.ancestors() {
            if dir.join(MANIFEST_FILE).is_file() {
                return Ok(dir.to_path_buf());
            }
        }
        Err(SigilError::Manifest(format!(
            "no {} found in {} or any parent directory",
            MANIFEST_FILE,
            start.display()
        )))
    }

    /// Derive the flat module list. A url listed twice is fatal because two
    /// checkouts would race for the same directory.
    pub fn modules(&self) -> Result<Vec<Module>> {
        let mut modules = Vec::new();
        for group in &self.modules {
            for url in &group.urls {
                let url = url.trim();
                let last = url.rsplit('/').next().unwrap_or(url);
                let name = last.strip_suffix(".git").unwrap_or(last).to_string();
                modules.push(Module {
                    subdir: PathBuf::from(&group.path).join(&name),
                    name,
                    url: url.to_string(),
                    branch: group.branch.clone(),
                });
            }
        }
        for module in &modules {
            let count = modules.iter().filter(|m| m.url == module.url).count();
            if count > 1 {
                return Err(SigilError::Manifest(format!(
                    "url {} is listed more than once",
                    module.url
                )));
            }
        }
        Ok(modules)
    }
}

fn version_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        // manifest versions are written like 15.0; keep the trailing .0
        Raw::Number(n) if n.fract() == 0.0 => format!("{:.1}", n),
        Raw::Number(n) => n.to_string(),
    })
}
