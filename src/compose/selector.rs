//! Fragment inclusion policy

use crate::settings::SettingsStore;
use std::path::{Path, PathBuf};

/// Marker excluding a fragment from composition regardless of any flag
pub const NO_AUTO_COMPOSE: &str = "NO-AUTO-COMPOSE";

/// Decides which discovered fragments take part in a composition run.
///
/// The decision is a pure function of the candidate path and body, the
/// feature flags in the settings store, the platform identifier and the
/// Odoo version; exclusions are reported at debug level only.
pub struct FragmentSelector<'a> {
    settings: &'a SettingsStore,
    destination: PathBuf,
    odoo_version: String,
    platform: String,
}

impl<'a> FragmentSelector<'a> {
    /// Selector for a destination file, flags and version, on a platform
    /// identifier such as `std::env::consts::OS`
    pub fn new(
        settings: &'a SettingsStore,
        destination: &Path,
        odoo_version: &str,
        platform: &str,
    ) -> Self {
        Self {
            settings,
            destination: destination.to_path_buf(),
            odoo_version: odoo_version.to_string(),
            platform: platform.to_string(),
        }
    }

    /// Decide inclusion for one candidate, logging exclusions
    pub fn use_file(&self, path: &Path, body: &str) -> bool {
        let include = self.decide(path, body);
        if !include {
            tracing::debug!("Ignoring compose fragment {}", path.display());
        }
        include
    }

    fn decide(&self, path: &Path, body: &str) -> bool {
        let segments: Vec<String> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        // system-wide override trees always win
        if segments.iter().any(|s| s == "etc") {
            return true;
        }

        if body.contains(NO_AUTO_COMPOSE) {
            return false;
        }

        let parent_flag = format!("run_{}", parent_name(path));

        // under the image tree the parent directory names the feature
        if segments.iter().any(|s| s == "images") {
            if !self.flag(&parent_flag) {
                return false;
            }
            if !segments.iter().any(|s| s.contains(".run_")) {
                return true;
            }
        }

        // platform-specific fragments decide both ways
        if segments.iter().any(|s| s.contains("platform_")) {
            let current = format!("platform_{}", self.platform);
            if !segments.iter().any(|s| s.contains(&current)) {
                return false;
            }
            return self.flag(&parent_flag);
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if file_name.contains(&format!("run_odoo_version.{}.yml", self.odoo_version)) {
            return true;
        }

        // conditional fragments: any enabled run_* token includes, any
        // !run_* token includes when its feature is off
        if self.flag(&parent_flag) {
            let tokens: Vec<&str> = segments
                .iter()
                .flat_map(|s| s.split('.'))
                .collect();
            for token in tokens.iter().filter(|t| t.starts_with("run_")) {
                let bare = token.strip_prefix("run_").unwrap_or(token);
                // run_devmode fragments match a plain DEVMODE flag too
                if self.flag(token) || self.flag(bare) {
                    return true;
                }
            }
            for token in tokens.iter().filter(|t| t.starts_with("!run_")) {
                if !self.flag(&token[1..]) {
                    return true;
                }
            }
            return false;
        }

        // never re-ingest our own output
        if path == self.destination {
            return false;
        }
        if let Some(dest_dir) = self.destination.parent() {
            if path.starts_with(dest_dir) {
                return false;
            }
        }

        true
    }

    fn flag(&self, key: &str) -> bool {
        self.settings.get_bool(key)
    }
}

fn parent_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
