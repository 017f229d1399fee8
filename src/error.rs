//! Error types for Sigil

use thiserror::Error;

/// Result type for Sigil operations
pub type Result<T> = std::result::Result<T, SigilError>;

/// Sigil error types
#[derive(Error, Debug)]
pub enum SigilError {
    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Fragment parse error: {0}")]
    FragmentParse(String),

    #[error("Invalid order marker in {path}: {message}")]
    OrderMarker { path: String, message: String },

    #[error("Service '{service}' already exists in {fragment}")]
    ServiceCollision { service: String, fragment: String },

    #[error("Compose resolver error: {0}")]
    Resolver(String),

    #[error("Hook '{name}' failed: {message}")]
    Hook { name: String, message: String },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
