//! Persistent key=value settings store

use crate::error::{Result, SigilError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Durable, insertion-ordered key=value store backing one settings file.
///
/// Keys are stored as written; lookups fall back across the exact, lower-
/// and upper-cased key forms. All mutation is in-memory until an explicit
/// [`SettingsStore::persist`], which rewrites the file in full.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    /// Backing file path
    path: PathBuf,
    /// Entries in insertion order
    entries: Vec<(String, String)>,
}

impl SettingsStore {
    /// Load a store from a file; a missing file yields an empty store
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            entries: Vec::new(),
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-read the backing file, discarding in-memory state
    pub fn reload(&mut self) -> Result<()> {
        self.entries.clear();
        if !self.path.exists() {
            return Ok(());
        }
        let text = std::fs::read_to_string(&self.path)?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.entries
                    .push((key.trim().to_string(), value.to_string()));
            }
        }
        Ok(())
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a value, falling back across exact/lower/upper key forms.
    /// An unset key is `None`, never an error.
    pub fn get(&self, key: &str) -> Option<&str> {
        for candidate in [key.to_string(), key.to_lowercase(), key.to_uppercase()] {
            if let Some((_, value)) = self.entries.iter().find(|(k, _)| *k == candidate) {
                return Some(value.as_str());
            }
        }
        None
    }

    /// Look up a value with a default for unset keys
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Boolean view: "1" is true, anything else (including unset) is false
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key) == Some("1")
    }

    /// Integer view: unset or empty parses as 0
    pub fn get_int(&self, key: &str) -> Result<i64> {
        let raw = self.get(key).unwrap_or("");
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse::<i64>()
            .map_err(|e| SigilError::Settings(format!("key {} is not an integer: {}", key, e)))
    }

    /// Set a key, returning whether the stored value changed
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(k, _)| k == key) {
            if existing == value {
                return false;
            }
            *existing = value.to_string();
            return true;
        }
        self.entries.push((key.to_string(), value.to_string()));
        true
    }

    /// Remove a key (exact match), returning the previous value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Snapshot of the store as an environment mapping
    pub fn env_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Copy every entry of `other` into this store
    pub fn merge_from(&mut self, other: &SettingsStore) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    /// Rewrite the backing file in full
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }
}
