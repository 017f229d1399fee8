//! Service reference expansion

use crate::compose::fragment::Fragment;
use crate::error::{Result, SigilError};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Label requesting another service's definition under the bearer's name
pub const MERGE_LABEL: &str = "compose.merge";

/// Copy referenced service definitions under requesting names.
///
/// A service labeled `compose.merge: other` asks for `other`'s definition
/// to be copied under its own name into every fragment that defines
/// `other`; the later fold then layers the bearer's overrides on top of
/// the copy. A destination name already defined in such a fragment is a
/// fatal collision, so this must run exactly once per pipeline run.
pub fn expand_references(fragments: &mut [Fragment]) -> Result<()> {
    let mut requests: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for fragment in fragments.iter() {
        let services = match fragment.doc.get("services").and_then(Value::as_mapping) {
            Some(map) => map,
            None => continue,
        };
        for (name, service) in services {
            let name = match name.as_str() {
                Some(name) => name,
                None => continue,
            };
            let referenced = service
                .get("labels")
                .and_then(|labels| labels.get(MERGE_LABEL))
                .and_then(Value::as_str);
            if let Some(referenced) = referenced {
                tracing::debug!("Service {} requests a copy of {}", name, referenced);
                requests
                    .entry(referenced.to_string())
                    .or_default()
                    .insert(name.to_string());
            }
        }
    }

    for fragment in fragments.iter_mut() {
        let path = fragment.path.clone();
        let services = match fragment.doc.get_mut("services").and_then(Value::as_mapping_mut) {
            Some(map) => map,
            None => continue,
        };
        for (referenced, destinations) in &requests {
            let definition = match services.get(referenced.as_str()) {
                Some(definition) => definition.clone(),
                None => continue,
            };
            for destination in destinations {
                if services.contains_key(destination.as_str()) {
                    return Err(SigilError::ServiceCollision {
                        service: destination.clone(),
                        fragment: path.display().to_string(),
                    });
                }
                services.insert(Value::from(destination.as_str()), definition.clone());
            }
        }
    }

    Ok(())
}
