//! Settings persistence and project context
//!
//! This module provides the persistent key=value settings store and the
//! typed per-invocation project context derived from it.

pub mod project;
pub mod store;

pub use project::{get_db_name, Project, RegistryRef};
pub use store::SettingsStore;
