//! Manifest-driven multi-repository synchronization
//!
//! The manifest lists every module repository with its branch and
//! checkout directory. Pull makes the working tree match that list:
//! missing checkouts are added as submodules, every checkout is switched
//! to its branch, then all of them are pulled in parallel. Push is the
//! mirror image, finishing with a submodule pointer commit at the root.

use crate::error::{Result, SigilError};
use crate::settings::Project;
use crate::source::manifest::Module;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Options for a pull run
#[derive(Debug, Clone)]
pub struct PullOptions {
    /// Restrict the run to one module by name
    pub module: Option<String>,
    /// Clone depth for newly added submodules
    pub depth: Option<u32>,
    /// Pull modules in parallel
    pub threaded: bool,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            module: None,
            depth: None,
            threaded: true,
        }
    }
}

/// Git synchronization over one project tree
pub struct SourceSync<'a> {
    project: &'a Project,
}

impl<'a> SourceSync<'a> {
    pub fn new(project: &'a Project) -> Self {
        Self { project }
    }

    /// Bring every manifest module up to date
    pub fn pull(&self, options: &PullOptions) -> Result<()> {
        let root = &self.project.root;
        ensure_clean(root)?;
        // a failing root pull is tolerated, local-only roots are common
        if let Err(e) = git(root, &["pull"]) {
            tracing::warn!("Root pull failed: {}", e);
        }

        let modules = filter_modules(
            self.project.manifest.modules()?,
            options.module.as_deref(),
        );

        for module in &modules {
            self.ensure_module(module, options.depth)?;
        }
        for module in &modules {
            self.checkout_module(module)?;
        }
        self.pull_modules(&modules, options.threaded)
    }

    /// Push every manifest module, then the root pointer commit
    pub fn push(&self) -> Result<()> {
        tracing::info!("Pulling before push");
        self.pull(&PullOptions::default())?;

        let modules = self.project.manifest.modules()?;
        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for module in &modules {
            let module = module.clone();
            let dir = self.project.root.join(&module.subdir);
            let failures = Arc::clone(&failures);
            handles.push(std::thread::spawn(move || {
                tracing::info!("Pushing {}", module.name);
                for attempt in 0.. {
                    match git(&dir, &["push"]) {
                        Ok(()) => return,
                        Err(e) if attempt >= 5 => {
                            let mut failures =
                                failures.lock().unwrap_or_else(|p| p.into_inner());
                            failures.push(format!("{}: {}", module.name, e));
                            return;
                        }
                        Err(_) => std::thread::sleep(Duration::from_secs(1)),
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.join();
        }
        let failures = failures.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if !failures.is_empty() {
            return Err(SigilError::Git(format!(
                "push failed for {}",
                failures.join(", ")
            )));
        }

        // recording moved submodule pointers may legitimately find nothing
        for module in &modules {
            let subdir = module.subdir.display().to_string();
            let _ = git(&self.project.root, &["add", &subdir]);
        }
        let _ = git(&self.project.root, &["commit", "-m", "."]);
        git(&self.project.root, &["push"])
    }

    /// Add a missing module checkout as a submodule
    fn ensure_module(&self, module: &Module, depth: Option<u32>) -> Result<()> {
        let root = &self.project.root;
        let full_path = root.join(&module.subdir);
        if full_path.is_dir() {
            return Ok(());
        }
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Adding submodule {}", module.name);
        let depth_value;
        let mut args: Vec<&str> = vec!["submodule", "add", "--force"];
        if let Some(depth) = depth {
            depth_value = depth.to_string();
            args.push("--depth");
            args.push(&depth_value);
        }
        let subdir = module.subdir.display().to_string();
        args.extend(["-b", &module.branch, &module.url, &subdir]);
        git(root, &args)?;
        git(&full_path, &["checkout", &module.branch])?;
        git(&full_path, &["submodule", "update", "--init"])
    }

    /// Switch an existing checkout to its manifest branch. A directory
    /// that is not a repository is reported and skipped.
    fn checkout_module(&self, module: &Module) -> Result<()> {
        let module_dir = self.project.root.join(&module.subdir);
        if !module_dir.exists() {
            return Ok(());
        }
        if !is_git_repo(&module_dir) {
            tracing::warn!("Invalid repository at {}", module_dir.display());
            return Ok(());
        }
        git(&module_dir, &["checkout", &module.branch]).map_err(|e| {
            SigilError::Git(format!(
                "cannot switch {} to {}: {}",
                module.name, module.branch, e
            ))
        })
    }

    /// Pull all checkouts, parallel by default. Failed modules get one
    /// serial second chance before the failure is fatal.
    fn pull_modules(&self, modules: &[Module], threaded: bool) -> Result<()> {
        let retry: Arc<Mutex<Vec<Module>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for module in modules {
            let module = module.clone();
            let dir = self.project.root.join(&module.subdir);
            let retry = Arc::clone(&retry);
            let worker = move || {
                tracing::info!("Pulling {}", module.name);
                if git(&dir, &["pull", "--no-edit"]).is_err() {
                    let mut retry = retry.lock().unwrap_or_else(|p| p.into_inner());
                    retry.push(module);
                }
            };
            if threaded {
                handles.push(std::thread::spawn(worker));
            } else {
                worker();
            }
        }
        for handle in handles {
            let _ = handle.join();
        }

        let failed = retry.lock().unwrap_or_else(|p| p.into_inner()).clone();
        for module in failed {
            tracing::info!("Retrying pull of {}", module.name);
            git(&self.project.root.join(&module.subdir), &["pull", "--no-edit"])?;
        }
        Ok(())
    }
}

/// Restrict the module list to one module by name, when given
pub fn filter_modules(modules: Vec<Module>, name: Option<&str>) -> Vec<Module> {
    match name {
        Some(name) => modules.into_iter().filter(|m| m.name == name).collect(),
        None => modules,
    }
}

/// Refuse to operate on a dirty repository
fn ensure_clean(dir: &Path) -> Result<()> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(dir)
        .output()
        .map_err(|e| SigilError::Git(format!("cannot run git: {}", e)))?;
    if !output.status.success() {
        return Err(SigilError::Git(format!(
            "{} is not a git repository",
            dir.display()
        )));
    }
    if !output.stdout.is_empty() {
        return Err(SigilError::Git(format!(
            "{} has uncommitted changes, commit or stash them first",
            dir.display()
        )));
    }
    Ok(())
}

/// Whether a directory is inside a git work tree
fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(dir)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Run git with inherited stdio, failing on a nonzero exit
fn git(dir: &Path, args: &[&str]) -> Result<()> {
    tracing::debug!("git {} in {}", args.join(" "), dir.display());
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .map_err(|e| SigilError::Git(format!("cannot run git: {}", e)))?;
    if !status.success() {
        return Err(SigilError::Git(format!(
            "git {} failed in {} with {}",
            args.join(" "),
            dir.display(),
            status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn module(name: &str) -> Module {
        Module {
            name: name.to_string(),
            subdir: PathBuf::from("common").join(name),
            url: format!("https://example.com/{}.git", name),
            branch: "main".to_string(),
        }
    }

    #[test]
    fn test_filter_modules() {
        let modules = vec![module("web-tools"), module("reporting")];

        let all = filter_modules(modules.clone(), None);
        assert_eq!(all.len(), 2);

        let one = filter_modules(modules.clone(), Some("reporting"));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name, "reporting");

        let none = filter_modules(modules, Some("missing"));
        assert!(none.is_empty());
    }

    #[test]
    fn test_pull_options_default_is_threaded() {
        let options = PullOptions::default();
        assert!(options.threaded);
        assert!(options.module.is_none());
        assert!(options.depth.is_none());
    }

    #[test]
    fn test_ensure_clean_on_fresh_repo() {
        let temp = tempdir().unwrap();
        let status = Command::new("git")
            .args(["init", "-q"])
            .current_dir(temp.path())
            .status()
            .unwrap();
        assert!(status.success());

        ensure_clean(temp.path()).unwrap();

        std::fs::write(temp.path().join("scratch.txt"), "x").unwrap();
        let err = ensure_clean(temp.path()).unwrap_err();
        assert!(err.to_string().contains("uncommitted changes"));
    }

    #[test]
    fn test_is_git_repo_detection() {
        let temp = tempdir().unwrap();
        let plain = temp.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();

        let repo = temp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        Command::new("git")
            .args(["init", "-q"])
            .current_dir(&repo)
            .status()
            .unwrap();

        assert!(is_git_repo(&repo));
        assert!(!is_git_repo(&plain));
    }
}
