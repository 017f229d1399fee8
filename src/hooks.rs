//! Hook plugin surface
//!
//! Hooks extend the composer at two fixed points: right after the
//! settings store is populated, and after the resolved document has been
//! post-processed. Native hooks implement [`ComposeHook`]; user-supplied
//! executables named `after-settings` or `after-compose` under the image
//! tree are wrapped in [`ScriptHook`] adapters and run in lexicographic
//! path order. Hook failures abort the run.

use crate::error::{Result, SigilError};
use crate::settings::{Project, SettingsStore};
use serde_yaml::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Context handed to compose hooks
#[derive(Debug, Clone)]
pub struct HookCapabilities {
    /// Project name
    pub project_name: String,
    /// Project root directory
    pub project_root: PathBuf,
    /// Run directory holding settings and the destination file
    pub run_dir: PathBuf,
    /// Odoo version from the manifest
    pub odoo_version: String,
}

impl HookCapabilities {
    /// Capabilities for a project context
    pub fn from_project(project: &Project) -> Self {
        Self {
            project_name: project.name.clone(),
            project_root: project.root.clone(),
            run_dir: project.run_dir.clone(),
            odoo_version: project.manifest.version.clone(),
        }
    }

    /// Environment variables exposing the capabilities to script hooks
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("SIGIL_PROJECT".into(), self.project_name.clone()),
            (
                "SIGIL_PROJECT_ROOT".into(),
                self.project_root.display().to_string(),
            ),
            ("SIGIL_RUN_DIR".into(), self.run_dir.display().to_string()),
            ("SIGIL_ODOO_VERSION".into(), self.odoo_version.clone()),
        ]
    }
}

/// A callback invoked at the composer's hook points
pub trait ComposeHook {
    /// Stable name used in logs and errors
    fn name(&self) -> String;

    /// Runs right after the settings store is populated
    fn after_settings(&self, _settings: &mut SettingsStore) -> Result<()> {
        Ok(())
    }

    /// Runs after post-processing, before the document is persisted
    fn after_compose(
        &self,
        _settings: &mut SettingsStore,
        _doc: &mut Value,
        _caps: &HookCapabilities,
    ) -> Result<()> {
        Ok(())
    }
}

/// Which hook point a discovered script serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ScriptKind {
    AfterSettings,
    AfterCompose,
}

/// Adapter running a user-supplied executable as a hook.
///
/// `after-compose` scripts receive the document on stdin and may print a
/// mutated document to stdout; empty output means unchanged. Both kinds
/// receive the settings as environment variables plus the settings file
/// path in `SIGIL_SETTINGS_FILE`, and may edit that file; the store is
/// re-read after the script finishes.
pub struct ScriptHook {
    path: PathBuf,
    kind: ScriptKind,
}

impl ScriptHook {
    fn command(&self, settings: &SettingsStore, extra: &[(String, String)]) -> Command {
        let mut command = Command::new(&self.path);
        command.envs(settings.iter());
        command.env("SIGIL_SETTINGS_FILE", settings.path());
        for (key, value) in extra {
            command.env(key, value);
        }
        command
    }
}

impl ComposeHook for ScriptHook {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn after_settings(&self, settings: &mut SettingsStore) -> Result<()> {
        if self.kind != ScriptKind::AfterSettings {
            return Ok(());
        }
        tracing::info!("Running settings hook {}", self.name());
        let status = self
            .command(settings, &[])
            .status()
            .map_err(|e| SigilError::Hook {
                name: self.name(),
                message: format!("cannot execute: {}", e),
            })?;
        if !status.success() {
            return Err(SigilError::Hook {
                name: self.name(),
                message: format!("exited with {}", status),
            });
        }
        settings.reload()
    }

    fn after_compose(
        &self,
        settings: &mut SettingsStore,
        doc: &mut Value,
        caps: &HookCapabilities,
    ) -> Result<()> {
        if self.kind != ScriptKind::AfterCompose {
            return Ok(());
        }
        tracing::info!("Running compose hook {}", self.name());
        let text = serde_yaml::to_string(doc).map_err(|e| SigilError::Hook {
            name: self.name(),
            message: format!("cannot serialize document: {}", e),
        })?;

        let mut child = self
            .command(settings, &caps.env_vars())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SigilError::Hook {
                name: self.name(),
                message: format!("cannot execute: {}", e),
            })?;
        // fed from its own thread: stdout and stderr stay undrained until
        // wait_with_output, and the script may emit more than a pipe
        // buffer before it reads the document
        let writer = child
            .stdin
            .take()
            .map(|mut stdin| std::thread::spawn(move || stdin.write_all(text.as_bytes())));
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(SigilError::Hook {
                name: self.name(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if let Some(writer) = writer {
            match writer.join() {
                // a script is free to exit without reading the document
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(SigilError::Hook {
                        name: self.name(),
                        message: format!("cannot write document: {}", e),
                    });
                }
                _ => {}
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            *doc = serde_yaml::from_str(&stdout).map_err(|e| SigilError::Hook {
                name: self.name(),
                message: format!("returned an unparsable document: {}", e),
            })?;
        }
        settings.reload()
    }
}

/// Ordered collection of hooks
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn ComposeHook>>,
}

impl HookRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; hooks run in registration order
    pub fn register(&mut self, hook: Box<dyn ComposeHook>) {
        self.hooks.push(hook);
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True when no hooks are registered
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Register executables named `after-settings` or `after-compose`
    /// discovered under a tree, in lexicographic path order
    pub fn discover_scripts(&mut self, tree: &Path) {
        let mut scripts: Vec<(PathBuf, ScriptKind)> = Vec::new();
        for entry in walkdir::WalkDir::new(tree)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || !is_executable(entry.path()) {
                continue;
            }
            let kind = match entry.file_name().to_str() {
                Some("after-settings") => ScriptKind::AfterSettings,
                Some("after-compose") => ScriptKind::AfterCompose,
                _ => continue,
            };
            scripts.push((entry.path().to_path_buf(), kind));
        }
        scripts.sort();
        for (path, kind) in scripts {
            tracing::debug!("Discovered hook script {}", path.display());
            self.register(Box::new(ScriptHook { path, kind }));
        }
    }

    /// Run the settings hook point; the store is persisted after each hook
    pub fn run_after_settings(&self, settings: &mut SettingsStore) -> Result<()> {
        for hook in &self.hooks {
            hook.after_settings(settings)?;
            settings.persist()?;
        }
        Ok(())
    }

    /// Run the compose hook point; the store is persisted after each hook
    pub fn run_after_compose(
        &self,
        settings: &mut SettingsStore,
        doc: &mut Value,
        caps: &HookCapabilities,
    ) -> Result<()> {
        for hook in &self.hooks {
            hook.after_compose(settings, doc, caps)?;
            settings.persist()?;
        }
        Ok(())
    }
}

/// Run the project's after-reload script, if present
pub fn run_after_reload_script(project: &Project, settings: &SettingsStore) -> Result<()> {
    let script = project.after_reload_script();
    if !script.is_file() || !is_executable(&script) {
        tracing::debug!(
            "No reload script at {}, skipping",
            script.display()
        );
        return Ok(());
    }
    tracing::info!("Running reload script {}", script.display());
    let status = Command::new(&script)
        .envs(settings.iter())
        .env("SIGIL_SETTINGS_FILE", settings.path())
        .current_dir(&project.root)
        .status()
        .map_err(|e| SigilError::Hook {
            name: script.display().to_string(),
            message: format!("cannot execute: {}", e),
        })?;
    if !status.success() {
        return Err(SigilError::Hook {
            name: script.display().to_string(),
            message: format!("exited with {}", status),
        });
    }
    Ok(())
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn store(dir: &Path) -> SettingsStore {
        let mut store = SettingsStore::load(dir.join("settings")).unwrap();
        store.set("DBNAME", "acme");
        store.persist().unwrap();
        store
    }

    fn caps() -> HookCapabilities {
        HookCapabilities {
            project_name: "acme".to_string(),
            project_root: PathBuf::from("/src/acme"),
            run_dir: PathBuf::from("/run/acme"),
            odoo_version: "15.0".to_string(),
        }
    }

    fn write_script(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }

    struct CountingHook {
        label: usize,
        log: Arc<AtomicUsize>,
    }

    impl ComposeHook for CountingHook {
        fn name(&self) -> String {
            format!("counting-{}", self.label)
        }

        fn after_compose(
            &self,
            settings: &mut SettingsStore,
            _doc: &mut Value,
            _caps: &HookCapabilities,
        ) -> Result<()> {
            // record invocation order through the shared counter
            let seen = self.log.fetch_add(1, Ordering::SeqCst);
            assert_eq!(seen, self.label);
            settings.set(&format!("HOOK_{}", self.label), "ran");
            Ok(())
        }
    }

    #[test]
    fn test_hooks_run_in_registration_order_and_persist() {
        let temp = tempdir().unwrap();
        let mut settings = store(temp.path());
        let log = Arc::new(AtomicUsize::new(0));

        let mut registry = HookRegistry::new();
        for label in 0..3 {
            registry.register(Box::new(CountingHook {
                label,
                log: Arc::clone(&log),
            }));
        }

        let mut doc = Value::Null;
        registry
            .run_after_compose(&mut settings, &mut doc, &caps())
            .unwrap();

        assert_eq!(log.load(Ordering::SeqCst), 3);
        let reloaded = SettingsStore::load(temp.path().join("settings")).unwrap();
        assert_eq!(reloaded.get("HOOK_2"), Some("ran"));
    }

    #[test]
    fn test_script_hook_mutates_document_via_stdout() {
        let temp = tempdir().unwrap();
        let mut settings = store(temp.path());
        let script = temp.path().join("after-compose");
        write_script(
            &script,
            "#!/bin/sh\ncat > /dev/null\nprintf 'services:\\n  web:\\n    image: %s\\n' \"$SIGIL_PROJECT\"\n",
        );

        let hook = ScriptHook {
            path: script,
            kind: ScriptKind::AfterCompose,
        };
        let mut doc: Value = serde_yaml::from_str("services: {}\n").unwrap();
        hook.after_compose(&mut settings, &mut doc, &caps()).unwrap();

        assert_eq!(doc["services"]["web"]["image"].as_str(), Some("acme"));
    }

    #[test]
    fn test_script_hook_empty_output_keeps_document() {
        let temp = tempdir().unwrap();
        let mut settings = store(temp.path());
        let script = temp.path().join("after-compose");
        write_script(&script, "#!/bin/sh\ncat > /dev/null\n");

        let hook = ScriptHook {
            path: script,
            kind: ScriptKind::AfterCompose,
        };
        let original: Value = serde_yaml::from_str("services:\n  web:\n    image: nginx\n").unwrap();
        let mut doc = original.clone();
        hook.after_compose(&mut settings, &mut doc, &caps()).unwrap();

        assert_eq!(doc, original);
    }

    #[test]
    fn test_failing_script_hook_aborts() {
        let temp = tempdir().unwrap();
        let mut settings = store(temp.path());
        let script = temp.path().join("after-compose");
        write_script(&script, "#!/bin/sh\necho 'hook exploded' >&2\nexit 3\n");

        let hook = ScriptHook {
            path: script,
            kind: ScriptKind::AfterCompose,
        };
        let mut doc = Value::Null;
        let err = hook
            .after_compose(&mut settings, &mut doc, &caps())
            .unwrap_err();
        assert!(err.to_string().contains("hook exploded"));
    }

    #[test]
    fn test_hook_may_ignore_its_stdin() {
        let temp = tempdir().unwrap();
        let mut settings = store(temp.path());
        let script = temp.path().join("after-compose");
        write_script(
            &script,
            "#!/bin/sh\nprintf 'services:\\n  web:\\n    image: quick\\n'\n",
        );

        let hook = ScriptHook {
            path: script,
            kind: ScriptKind::AfterCompose,
        };
        // too large for the pipe buffer, so the write cannot finish
        // before the script exits
        let blob = "x".repeat(1 << 20);
        let mut doc: Value = serde_yaml::from_str(&format!(
            "services:\n  web:\n    environment:\n      BLOB: {}\n",
            blob
        ))
        .unwrap();
        hook.after_compose(&mut settings, &mut doc, &caps()).unwrap();

        assert_eq!(doc["services"]["web"]["image"].as_str(), Some("quick"));
    }

    #[test]
    fn test_large_documents_cross_the_hook_pipes() {
        let temp = tempdir().unwrap();
        let mut settings = store(temp.path());
        let script = temp.path().join("after-compose");
        // fills stdout past the pipe buffer before reading the document
        write_script(
            &script,
            "#!/bin/sh\ni=0\nwhile [ $i -lt 20000 ]; do echo '# pad'; i=$((i+1)); done\ncat > /dev/null\nprintf 'services:\\n  web:\\n    image: resized\\n'\n",
        );

        let hook = ScriptHook {
            path: script,
            kind: ScriptKind::AfterCompose,
        };
        let blob = "x".repeat(1 << 20);
        let mut doc: Value = serde_yaml::from_str(&format!(
            "services:\n  web:\n    environment:\n      BLOB: {}\n",
            blob
        ))
        .unwrap();
        hook.after_compose(&mut settings, &mut doc, &caps()).unwrap();

        assert_eq!(doc["services"]["web"]["image"].as_str(), Some("resized"));
    }

    #[test]
    fn test_settings_script_edits_are_reloaded() {
        let temp = tempdir().unwrap();
        let mut settings = store(temp.path());
        let script = temp.path().join("after-settings");
        write_script(
            &script,
            "#!/bin/sh\nprintf 'INJECTED=1\\n' >> \"$SIGIL_SETTINGS_FILE\"\n",
        );

        let hook = ScriptHook {
            path: script,
            kind: ScriptKind::AfterSettings,
        };
        hook.after_settings(&mut settings).unwrap();
        assert_eq!(settings.get("INJECTED"), Some("1"));
        assert_eq!(settings.get("DBNAME"), Some("acme"));
    }

    #[test]
    fn test_discovery_finds_executables_in_order() {
        let temp = tempdir().unwrap();
        let tree = temp.path().join("images");
        std::fs::create_dir_all(tree.join("a")).unwrap();
        std::fs::create_dir_all(tree.join("z")).unwrap();
        write_script(&tree.join("z/after-compose"), "#!/bin/sh\n");
        write_script(&tree.join("a/after-compose"), "#!/bin/sh\n");
        write_script(&tree.join("a/after-settings"), "#!/bin/sh\n");
        // not executable, must be skipped
        std::fs::write(tree.join("a/after-compose.disabled"), "#!/bin/sh\n").unwrap();
        std::fs::write(tree.join("z/README"), "docs").unwrap();

        let mut registry = HookRegistry::new();
        registry.discover_scripts(&tree);
        assert_eq!(registry.len(), 3);
    }
}
