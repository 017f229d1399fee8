//! Layered docker-compose composition
//!
//! This module turns the compose fragments scattered across a project
//! into one resolved docker-compose.yml: discovery and selection,
//! ordered merging, token substitution, service reference expansion,
//! external resolution and post-processing.

pub mod expand;
pub mod fragment;
pub mod interpolate;
pub mod merge;
pub mod pipeline;
pub mod postprocess;
pub mod resolver;
pub mod selector;

pub use expand::expand_references;
pub use fragment::{discover_fragments, sort_fragments, Fragment};
pub use merge::{deep_merge, fold_documents};
pub use pipeline::{reload_project, ComposePipeline};
pub use postprocess::{post_process, PostProcessContext};
pub use resolver::ComposeResolver;
pub use selector::FragmentSelector;
