//! Final document post-processing

use crate::error::Result;
use crate::settings::{Project, RegistryRef, SettingsStore};
use serde_yaml::Value;

/// Compose schema version stamped on generated documents
pub const COMPOSE_FILE_VERSION: &str = "3.8";

/// Context for the final post-processing pass
#[derive(Debug, Clone)]
pub struct PostProcessContext {
    /// Project name, prefixed onto every container name
    pub project_name: String,
    /// Customs identifier, part of registry image references
    pub customs: String,
    /// Whether services keep their restart policies
    pub restart_containers: bool,
    /// Registry to point built images at, when configured
    pub registry: Option<RegistryRef>,
}

impl PostProcessContext {
    /// Derive the context from the project and its settings
    pub fn from_settings(project: &Project, settings: &SettingsStore) -> Result<Self> {
        let registry = match settings.get("HUB_URL") {
            Some(url) if !url.trim().is_empty() => Some(RegistryRef::parse(url)?),
            _ => None,
        };
        Ok(Self {
            project_name: project.name.clone(),
            customs: project.customs.clone(),
            restart_containers: settings.get_bool("RESTART_CONTAINERS"),
            registry,
        })
    }
}

/// Apply the final invariants to a resolved document: stamp the schema
/// version, strip restart policies when disallowed, point built services
/// at the registry, and pin deterministic container names.
pub fn post_process(doc: &mut Value, ctx: &PostProcessContext) {
    if let Some(root) = doc.as_mapping_mut() {
        root.insert(Value::from("version"), Value::from(COMPOSE_FILE_VERSION));
    }

    let services = match doc.get_mut("services").and_then(Value::as_mapping_mut) {
        Some(map) => map,
        None => return,
    };
    for (name, service) in services.iter_mut() {
        let name = match name.as_str() {
            Some(name) => name,
            None => continue,
        };
        let service = match service.as_mapping_mut() {
            Some(map) => map,
            None => continue,
        };

        if !ctx.restart_containers {
            service.remove("restart");
        }

        if let Some(registry) = &ctx.registry {
            if has_build_section(service.get("build")) {
                service.insert(
                    Value::from("image"),
                    Value::from(format!(
                        "{}/{}/{}/{}:latest",
                        registry.host, registry.prefix, ctx.customs, name
                    )),
                );
            }
        }

        service.insert(
            Value::from("container_name"),
            Value::from(format!("{}_{}", ctx.project_name, name)),
        );
    }
}

/// A build section counts only when it carries content; null, false,
/// empty strings and empty containers do not.
fn has_build_section(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Sequence(seq)) => !seq.is_empty(),
        Some(Value::Mapping(map)) => !map.is_empty(),
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Some(Value::Tagged(_)) => true,
    }
}
