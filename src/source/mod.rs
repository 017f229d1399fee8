//! Project manifest and source tree synchronization

pub mod manifest;
pub mod sync;

pub use manifest::{Manifest, Module, ModuleGroup, MANIFEST_FILE};
pub use sync::{filter_modules, PullOptions, SourceSync};
