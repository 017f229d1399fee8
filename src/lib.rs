//! Sigil - tooling for multi-container Odoo project environments
//!
//! Sigil manages the runtime environment of an Odoo project tree. It
//! provides:
//!
//! - Layered docker-compose composition from template fragments
//! - Per-project settings layering with hook points for extension
//! - Btrfs snapshots of the postgres data volume
//! - Manifest-driven git synchronization of module repositories

pub mod compose;
pub mod error;
pub mod hooks;
pub mod settings;
pub mod snapshot;
pub mod source;

pub use error::{Result, SigilError};
