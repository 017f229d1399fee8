//! Composition pipeline
//!
//! Drives one full composition run: fragment discovery, selection,
//! ordering, per-fragment preparation, token substitution, service
//! reference expansion, folding, external resolution, post-processing
//! and the compose hook point. The destination file is written only
//! after every stage has succeeded.

use crate::compose::expand::expand_references;
use crate::compose::fragment::{discover_fragments, sort_fragments, Fragment};
use crate::compose::interpolate::substitute_document;
use crate::compose::merge::{fold_documents, normalize_kv_list};
use crate::compose::postprocess::{post_process, PostProcessContext, COMPOSE_FILE_VERSION};
use crate::compose::resolver::{ComposeResolver, COMPOSE_BIN_KEY, DEFAULT_COMPOSE_BIN};
use crate::compose::selector::FragmentSelector;
use crate::error::{Result, SigilError};
use crate::hooks::{run_after_reload_script, HookCapabilities, HookRegistry};
use crate::settings::{Project, SettingsStore};
use serde_yaml::{Mapping, Value};

/// Env file reference appended to every service before substitution
const SETTINGS_ENV_FILE: &str = "$HOST_RUN_DIR/settings";

/// One composition run over a project
pub struct ComposePipeline<'a> {
    project: &'a Project,
    hooks: &'a HookRegistry,
    platform: String,
}

impl<'a> ComposePipeline<'a> {
    /// Pipeline for a project, selecting fragments for the host platform
    pub fn new(project: &'a Project, hooks: &'a HookRegistry) -> Self {
        Self {
            project,
            hooks,
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Compose the final document without touching the destination file
    pub fn compose(&self, settings: &mut SettingsStore) -> Result<Value> {
        let destination = self.project.compose_destination();
        let selector = FragmentSelector::new(
            settings,
            &destination,
            &self.project.manifest.version,
            &self.platform,
        );

        let mut fragments = Vec::new();
        for path in discover_fragments(self.project) {
            let body = std::fs::read_to_string(&path)?;
            if !selector.use_file(&path, &body) {
                continue;
            }
            fragments.push(Fragment::from_text(&path, &body)?);
        }
        tracing::info!(
            "Composing {} fragments for project {}",
            fragments.len(),
            self.project.name
        );
        sort_fragments(&mut fragments);
        self.prepare_fragments(&mut fragments, settings)?;

        expand_references(&mut fragments)?;
        let docs: Vec<Value> = fragments.into_iter().map(|f| f.doc).collect();
        let merged = fold_documents(docs);

        let resolver = ComposeResolver::new(settings.get_or(COMPOSE_BIN_KEY, DEFAULT_COMPOSE_BIN));
        let mut resolved =
            resolver.resolve(&self.project.scratch_dir(), &[merged], &settings.env_map())?;

        post_process(
            &mut resolved,
            &PostProcessContext::from_settings(self.project, settings)?,
        );

        let caps = HookCapabilities::from_project(self.project);
        self.hooks.run_after_compose(settings, &mut resolved, &caps)?;
        Ok(resolved)
    }

    /// Compose and persist the destination file
    pub fn run(&self, settings: &mut SettingsStore) -> Result<Value> {
        let doc = self.compose(settings)?;
        let text = serde_yaml::to_string(&doc)
            .map_err(|e| SigilError::Yaml(format!("cannot serialize composition: {}", e)))?;
        let destination = self.project.compose_destination();
        std::fs::write(&destination, text)?;
        tracing::info!("Wrote {}", destination.display());
        Ok(doc)
    }

    /// Stamp each fragment with the shared defaults before substitution:
    /// the compose file version, the accumulated network table, the run
    /// settings env file on every service and a canonical environment
    /// shape. Empty fragments are dropped.
    fn prepare_fragments(
        &self,
        fragments: &mut Vec<Fragment>,
        settings: &SettingsStore,
    ) -> Result<()> {
        fragments.retain(|f| matches!(f.doc.as_mapping(), Some(m) if !m.is_empty()));

        let env = settings.env_map();
        let mut networks = default_network_table();
        for fragment in fragments.iter_mut() {
            // network definitions accumulate so every later fragment
            // attaches to the full table
            if let Some(extra) = fragment.doc.get("networks").and_then(Value::as_mapping) {
                for (key, value) in extra {
                    networks.insert(key.clone(), value.clone());
                }
            }
            if let Some(map) = fragment.doc.as_mapping_mut() {
                map.insert(
                    Value::from("version"),
                    Value::from(COMPOSE_FILE_VERSION),
                );
                map.insert(
                    Value::from("networks"),
                    Value::Mapping(networks.clone()),
                );
                if let Some(services) = map.get_mut("services").and_then(Value::as_mapping_mut) {
                    for (_, service) in services.iter_mut() {
                        stamp_service(service);
                    }
                }
            }
            fragment.doc = substitute_document(&fragment.doc, &env)?;
        }
        Ok(())
    }
}

/// Seed network table; the name token resolves during substitution
fn default_network_table() -> Mapping {
    let mut bridge = Mapping::new();
    bridge.insert(Value::from("driver"), Value::from("bridge"));
    bridge.insert(Value::from("name"), Value::from("$NETWORK_NAME"));
    let mut networks = Mapping::new();
    networks.insert(Value::from("default"), Value::Mapping(bridge));
    networks
}

/// Give one service the canonical env shape: env_file always a list
/// containing the run settings file, environment always a mapping
fn stamp_service(service: &mut Value) {
    let Some(service) = service.as_mapping_mut() else {
        return;
    };

    if !service.contains_key("env_file") {
        service.insert(Value::from("env_file"), Value::Sequence(Vec::new()));
    }
    if let Some(value) = service.get_mut("env_file") {
        if value.is_string() {
            let single = value.clone();
            *value = Value::Sequence(vec![single]);
        }
        if let Some(seq) = value.as_sequence_mut() {
            let settings_ref = Value::from(SETTINGS_ENV_FILE);
            if !seq.contains(&settings_ref) {
                seq.push(settings_ref);
            }
        }
    }

    match service.get_mut("environment") {
        Some(environment) => normalize_kv_list(environment),
        None => {
            service.insert(Value::from("environment"), Value::Mapping(Mapping::new()));
        }
    }
}

/// Rebuild a project's run directory from scratch: settings layering,
/// hook discovery, composition and the after-reload script.
pub fn reload_project(project: &Project, forced: &[(String, String)]) -> Result<Value> {
    if let Some(stale) = project.stale_local_dir() {
        tracing::info!("Removing stale local run directory {}", stale.display());
        std::fs::remove_dir_all(&stale)?;
    }
    project.ensure_run_dirs()?;

    let mut settings = project.build_settings(forced)?;
    settings.persist()?;
    write_settings_auto(project, forced)?;

    let mut hooks = HookRegistry::new();
    hooks.discover_scripts(&project.images_dir());
    hooks.run_after_settings(&mut settings)?;

    let pipeline = ComposePipeline::new(project, &hooks);
    let doc = pipeline.run(&mut settings)?;

    run_after_reload_script(project, &settings)?;
    Ok(doc)
}

/// Mirror the values the reload itself injected, for inspection
fn write_settings_auto(project: &Project, forced: &[(String, String)]) -> Result<()> {
    let mut auto = SettingsStore::load(project.settings_auto_file())?;
    auto.clear();
    for (key, value) in project.default_settings() {
        auto.set(&key, &value);
    }
    for (key, value) in forced {
        auto.set(key, value);
    }
    auto.persist()
}
