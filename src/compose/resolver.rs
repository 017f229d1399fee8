//! External compose resolution

use crate::error::{Result, SigilError};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Default resolver binary
pub const DEFAULT_COMPOSE_BIN: &str = "docker-compose";

/// Setting key overriding the resolver binary
pub const COMPOSE_BIN_KEY: &str = "DOCKER_COMPOSE_BIN";

/// Runs the `config` subcommand of a docker-compose binary to validate
/// and canonicalize merged documents.
pub struct ComposeResolver {
    bin: String,
}

impl ComposeResolver {
    /// Resolver around a compose binary name or path
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Resolve documents into one canonical document.
    ///
    /// Documents are laid out as numbered files inside the scratch
    /// directory, which is created fresh and removed again whether
    /// resolution succeeds or fails. The environment mapping is overlaid
    /// on the process environment for the child.
    pub fn resolve(
        &self,
        scratch_dir: &Path,
        docs: &[Value],
        env: &BTreeMap<String, String>,
    ) -> Result<Value> {
        if docs.is_empty() {
            return Err(SigilError::Resolver("no documents to resolve".into()));
        }
        let _guard = ScratchGuard::create(scratch_dir)?;

        let mut files = Vec::new();
        for (i, doc) in docs.iter().enumerate() {
            let path = scratch_dir.join(format!("docker-compose-{:05}.yml", i));
            let text = serde_yaml::to_string(doc)
                .map_err(|e| SigilError::Yaml(format!("cannot serialize document: {}", e)))?;
            std::fs::write(&path, text)?;
            files.push(path);
        }

        let mut command = Command::new(&self.bin);
        for file in &files {
            command.arg("-f").arg(file);
        }
        command.arg("config");
        command.current_dir(scratch_dir);
        command.envs(env);

        tracing::debug!("Resolving configuration via {}", self.bin);
        let output = command
            .output()
            .map_err(|e| SigilError::Resolver(format!("cannot run {}: {}", self.bin, e)))?;
        if !output.status.success() {
            return Err(SigilError::Resolver(format!(
                "{} config failed: {}",
                self.bin,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        serde_yaml::from_slice(&output.stdout).map_err(|e| {
            SigilError::Resolver(format!("unparsable output from {}: {}", self.bin, e))
        })
    }
}

/// Removes the scratch directory when dropped
struct ScratchGuard {
    path: PathBuf,
}

impl ScratchGuard {
    fn create(path: &Path) -> Result<Self> {
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        }
        std::fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn write_stub(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-compose");
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn doc(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_resolve_passes_files_and_env() {
        let temp = tempdir().unwrap();
        let stub = write_stub(
            temp.path(),
            "#!/bin/sh\nprintf 'services:\\n  web:\\n    image: %s\\n' \"$STAMP\"\n",
        );
        let mut env = BTreeMap::new();
        env.insert("STAMP".to_string(), "nginx:stamped".to_string());

        let scratch = temp.path().join("scratch");
        let resolver = ComposeResolver::new(stub.display().to_string());
        let resolved = resolver
            .resolve(&scratch, &[doc("services: {}\n")], &env)
            .unwrap();

        assert_eq!(
            resolved["services"]["web"]["image"].as_str(),
            Some("nginx:stamped")
        );
        assert!(!scratch.exists());
    }

    #[test]
    fn test_resolve_echoes_first_file() {
        let temp = tempdir().unwrap();
        // $1 is the first -f flag, $2 its file
        let stub = write_stub(temp.path(), "#!/bin/sh\ncat \"$2\"\n");

        let scratch = temp.path().join("scratch");
        let resolver = ComposeResolver::new(stub.display().to_string());
        let input = doc("services:\n  odoo:\n    image: odoo:15\n");
        let resolved = resolver
            .resolve(&scratch, &[input.clone()], &BTreeMap::new())
            .unwrap();

        assert_eq!(resolved, input);
        assert!(!scratch.exists());
    }

    #[test]
    fn test_failure_propagates_and_cleans_up() {
        let temp = tempdir().unwrap();
        let stub = write_stub(temp.path(), "#!/bin/sh\necho 'broken config' >&2\nexit 1\n");

        let scratch = temp.path().join("scratch");
        let resolver = ComposeResolver::new(stub.display().to_string());
        let err = resolver
            .resolve(&scratch, &[doc("services: {}\n")], &BTreeMap::new())
            .unwrap_err();

        assert!(matches!(err, SigilError::Resolver(_)));
        assert!(err.to_string().contains("broken config"));
        assert!(!scratch.exists());
    }

    #[test]
    fn test_missing_binary_is_an_error() {
        let temp = tempdir().unwrap();
        let resolver = ComposeResolver::new("/nonexistent/docker-compose");
        let err = resolver
            .resolve(
                &temp.path().join("scratch"),
                &[doc("services: {}\n")],
                &BTreeMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SigilError::Resolver(_)));
    }
}
