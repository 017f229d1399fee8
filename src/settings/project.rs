//! Typed per-invocation project context
//!
//! All derived values (paths, names, defaults) are computed once when the
//! context is built, instead of being resolved lazily out of a loosely
//! typed bag at every access.

use crate::error::{Result, SigilError};
use crate::settings::store::SettingsStore;
use crate::source::manifest::{Manifest, MANIFEST_FILE};
use std::path::{Path, PathBuf};

/// Project context for one invocation
#[derive(Debug, Clone)]
pub struct Project {
    /// Project name; defaults to the customs directory name
    pub name: String,
    /// Customs identifier (always the root directory name)
    pub customs: String,
    /// Project root, the directory holding the manifest
    pub root: PathBuf,
    /// Per-project run directory
    pub run_dir: PathBuf,
    /// User-level base directory (normally ~/.odoo)
    pub home_base: PathBuf,
    /// System-wide override tree (normally /etc/odoo)
    pub etc_base: PathBuf,
    /// Whether the run directory lives inside the project tree
    pub local_settings: bool,
    /// Parsed project manifest
    pub manifest: Manifest,
}

impl Project {
    /// Build the context for the project containing the current directory
    pub fn discover(project_name: Option<&str>, local: bool) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let root = Manifest::find_root(&cwd)?;
        let home_base = dirs::home_dir()
            .map(|home| home.join(".odoo"))
            .ok_or_else(|| {
                SigilError::InvalidConfig("cannot determine the home directory".into())
            })?;
        Self::with_bases(&root, &home_base, Path::new("/etc/odoo"), project_name, local)
    }

    /// Build the context with explicit base directories
    pub fn with_bases(
        root: &Path,
        home_base: &Path,
        etc_base: &Path,
        project_name: Option<&str>,
        local: bool,
    ) -> Result<Self> {
        let manifest = Manifest::load(&root.join(MANIFEST_FILE))?;
        let customs = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SigilError::InvalidConfig(format!(
                    "project root {} has no directory name",
                    root.display()
                ))
            })?;
        let name = project_name.map(str::to_string).unwrap_or_else(|| customs.clone());
        let run_dir = if local {
            root.join(".odoo").join("run")
        } else {
            home_base.join("run").join(&name)
        };
        Ok(Self {
            name,
            customs,
            root: root.to_path_buf(),
            run_dir,
            home_base: home_base.to_path_buf(),
            etc_base: etc_base.to_path_buf(),
            local_settings: local,
            manifest,
        })
    }

    /// Settings file inside the run directory
    pub fn settings_file(&self) -> PathBuf {
        self.run_dir.join("settings")
    }

    /// Mirror of the values seeded into the settings store on reload
    pub fn settings_auto_file(&self) -> PathBuf {
        self.run_dir.join("settings.auto")
    }

    /// Final composed artifact
    pub fn compose_destination(&self) -> PathBuf {
        self.run_dir.join("docker-compose.yml")
    }

    /// Scratch directory handed to the external resolver
    pub fn scratch_dir(&self) -> PathBuf {
        self.run_dir.join(".tmp.compose")
    }

    /// Image-definition tree
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Settings file written by interactive toggles
    pub fn project_settings_file(&self) -> PathBuf {
        self.root.join("settings")
    }

    /// Script executed after a successful reload, if present
    pub fn after_reload_script(&self) -> PathBuf {
        self.root.join("after-reload")
    }

    /// Name of the default docker network for this project
    pub fn network_name(&self) -> String {
        format!("{}_network", self.name)
    }

    /// Stale local run tree left behind by a previous `--local` invocation
    pub fn stale_local_dir(&self) -> Option<PathBuf> {
        let local_dir = self.root.join(".odoo");
        (!self.local_settings && local_dir.exists()).then_some(local_dir)
    }

    /// Override compose locations, in application order. Each may be a
    /// single file or a directory scanned non-recursively.
    pub fn override_paths(&self) -> Vec<PathBuf> {
        vec![
            self.root.join("docker-compose.project.yml"),
            self.home_base.join("docker-compose.yml"),
            self.home_base.join(&self.name).join("docker-compose.yml"),
        ]
    }

    /// Settings files layered over the defaults, lowest precedence first
    pub fn settings_layers(&self) -> Vec<PathBuf> {
        vec![
            self.etc_base.join("settings"),
            self.home_base.join("settings"),
            self.project_settings_file(),
        ]
    }

    /// Create the run directory and its support subdirectories
    pub fn ensure_run_dirs(&self) -> Result<()> {
        for sub in ["config", "sqlscripts", "debug", "proxy"] {
            std::fs::create_dir_all(self.run_dir.join(sub))?;
        }
        Ok(())
    }

    /// Build the run settings store: built-in defaults, then the system,
    /// user and project layers, then forced values. Not yet persisted.
    pub fn build_settings(&self, forced: &[(String, String)]) -> Result<SettingsStore> {
        let mut store = SettingsStore::load(self.settings_file())?;
        store.clear();
        for (key, value) in self.default_settings() {
            store.set(&key, &value);
        }
        for layer in self.settings_layers() {
            if layer.is_file() {
                let overlay = SettingsStore::load(&layer)?;
                store.merge_from(&overlay);
            }
        }
        for (key, value) in forced {
            store.set(key, value);
        }
        Ok(store)
    }

    /// Defaults derived from the project context
    pub(crate) fn default_settings(&self) -> Vec<(String, String)> {
        vec![
            ("CUSTOMS".into(), self.customs.clone()),
            ("CUSTOMS_DIR".into(), self.root.display().to_string()),
            ("PROJECT_NAME".into(), self.name.clone()),
            ("HOST_RUN_DIR".into(), self.run_dir.display().to_string()),
            ("NETWORK_NAME".into(), self.network_name()),
            ("ODOO_VERSION".into(), self.manifest.version.clone()),
            ("OWNER_UID".into(), current_uid().to_string()),
            (
                "LOCAL_SETTINGS".into(),
                if self.local_settings { "1" } else { "0" }.into(),
            ),
        ]
    }
}

/// Effective uid of the invoking user
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

/// Sanitize a database name: the project name stands in when no explicit
/// name is given, a leading digit gets a "db" prefix, punctuation becomes
/// underscores, the result is lowercased.
pub fn get_db_name(db: &str, customs: &str) -> String {
    let base = if db.is_empty() { customs } else { db };
    let mut name = String::with_capacity(base.len() + 2);
    if base.starts_with(|c: char| c.is_ascii_digit()) {
        name.push_str("db");
    }
    name.push_str(base);
    name.chars()
        .map(|c| {
            if "?:/*\\!@#$%^&*()-".contains(c) {
                '_'
            } else {
                c
            }
        })
        .collect::<String>()
        .to_lowercase()
}

/// Registry reference parsed from the HUB_URL setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRef {
    /// Host, with an optional port
    pub host: String,
    /// Path prefix under the host
    pub prefix: String,
}

impl RegistryRef {
    /// Parse `[user:password@]host[:port]/prefix`. Credentials are
    /// accepted for compatibility and dropped.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let without_creds = match trimmed.rsplit_once('@') {
            Some((_, rest)) => rest,
            None => trimmed,
        };
        let (host, prefix) = without_creds.split_once('/').ok_or_else(|| {
            SigilError::InvalidConfig(format!("registry reference '{}' has no prefix", raw))
        })?;
        if host.is_empty() || prefix.is_empty() {
            return Err(SigilError::InvalidConfig(format!(
                "registry reference '{}' is incomplete",
                raw
            )));
        }
        Ok(Self {
            host: host.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn project_in(temp: &Path, local: bool) -> Project {
        let root = temp.join("customs/acme");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(MANIFEST_FILE), r#"{"version": 15.0}"#).unwrap();
        let home = temp.join("home/.odoo");
        let etc = temp.join("etc/odoo");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::create_dir_all(&etc).unwrap();
        Project::with_bases(&root, &home, &etc, None, local).unwrap()
    }

    #[test]
    fn test_run_dir_placement() {
        let temp = tempdir().unwrap();
        let shared = project_in(temp.path(), false);
        assert_eq!(
            shared.run_dir,
            temp.path().join("home/.odoo/run/acme")
        );

        let local = project_in(temp.path(), true);
        assert_eq!(local.run_dir, local.root.join(".odoo/run"));
    }

    #[test]
    fn test_project_name_override() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("customs/acme");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(MANIFEST_FILE), r#"{"version": 15.0}"#).unwrap();

        let project = Project::with_bases(
            &root,
            &temp.path().join("home/.odoo"),
            &temp.path().join("etc/odoo"),
            Some("staging"),
            false,
        )
        .unwrap();
        assert_eq!(project.name, "staging");
        assert_eq!(project.customs, "acme");
        assert_eq!(project.network_name(), "staging_network");
    }

    #[test]
    fn test_settings_layering_precedence() {
        let temp = tempdir().unwrap();
        let project = project_in(temp.path(), false);

        std::fs::write(project.etc_base.join("settings"), "RUN_MAIL=0\nRUN_CUPS=0\n").unwrap();
        std::fs::write(project.home_base.join("settings"), "RUN_MAIL=1\n").unwrap();
        std::fs::write(project.project_settings_file(), "RUN_PROXY=1\n").unwrap();

        let forced = vec![("RUN_CUPS".to_string(), "1".to_string())];
        let store = project.build_settings(&forced).unwrap();

        assert_eq!(store.get("RUN_MAIL"), Some("1"));
        assert_eq!(store.get("RUN_PROXY"), Some("1"));
        assert_eq!(store.get("RUN_CUPS"), Some("1"));
        assert_eq!(store.get("CUSTOMS"), Some("acme"));
        assert_eq!(store.get("ODOO_VERSION"), Some("15.0"));
        assert_eq!(
            store.get("HOST_RUN_DIR"),
            Some(project.run_dir.display().to_string().as_str())
        );
    }

    #[test]
    fn test_stale_local_dir_detection() {
        let temp = tempdir().unwrap();
        let project = project_in(temp.path(), false);
        assert!(project.stale_local_dir().is_none());

        std::fs::create_dir_all(project.root.join(".odoo")).unwrap();
        assert_eq!(project.stale_local_dir(), Some(project.root.join(".odoo")));

        let local = project_in(temp.path(), true);
        assert!(local.stale_local_dir().is_none());
    }

    #[test]
    fn test_get_db_name() {
        assert_eq!(get_db_name("", "Acme"), "acme");
        assert_eq!(get_db_name("2wheels", "acme"), "db2wheels");
        assert_eq!(get_db_name("my-db!prod", "acme"), "my_db_prod");
        assert_eq!(get_db_name("Plain", "acme"), "plain");
    }

    #[test]
    fn test_registry_ref_parse() {
        let plain = RegistryRef::parse("hub.example.com/odoo").unwrap();
        assert_eq!(plain.host, "hub.example.com");
        assert_eq!(plain.prefix, "odoo");

        let full = RegistryRef::parse("user:secret@hub.example.com:5000/erp").unwrap();
        assert_eq!(full.host, "hub.example.com:5000");
        assert_eq!(full.prefix, "erp");

        assert!(RegistryRef::parse("no-prefix-here").is_err());
        assert!(RegistryRef::parse("/only-prefix").is_err());
    }
}
