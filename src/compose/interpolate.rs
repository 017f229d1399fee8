//! Environment token substitution

use crate::error::{Result, SigilError};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Replace `$VAR` and `${VAR}` tokens with values from the environment
/// mapping. Unknown tokens stay literal so the external resolver gets a
/// chance at anything left over.
pub fn substitute_text(text: &str, env: &BTreeMap<String, String>) -> String {
    let pattern =
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    pattern
        .replace_all(text, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match env.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .to_string()
}

/// Substitute tokens across a whole document by round-tripping it
/// through its serialized form.
pub fn substitute_document(doc: &Value, env: &BTreeMap<String, String>) -> Result<Value> {
    let text = serde_yaml::to_string(doc)
        .map_err(|e| SigilError::Yaml(format!("cannot serialize fragment: {}", e)))?;
    let replaced = substitute_text(&text, env);
    serde_yaml::from_str(&replaced)
        .map_err(|e| SigilError::Yaml(format!("fragment invalid after substitution: {}", e)))
}
