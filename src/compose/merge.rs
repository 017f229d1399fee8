//! Deep merge of compose documents

use serde_yaml::{Mapping, Value};

/// Compose keys that may be written either as a `KEY=VALUE` string list
/// or as a mapping. Only these are normalized before merging; list-only
/// keys like `ports` and `volumes` must keep their shape.
const KV_LIST_KEYS: &[&str] = &["environment", "labels"];

/// Convert an all-string sequence into a mapping so that merging
/// overrides per key instead of keeping whole lists. Entries split on
/// the first `=`, else the first `:`; a bare token maps to null.
pub fn normalize_kv_list(value: &mut Value) {
    let items = match value.as_sequence() {
        Some(items) if items.iter().all(Value::is_string) => items,
        _ => return,
    };
    let mut mapping = Mapping::new();
    for item in items {
        let text = match item.as_str() {
            Some(text) => text,
            None => continue,
        };
        let (key, val) = if let Some((k, v)) = text.split_once('=') {
            (k, Some(v))
        } else if let Some((k, v)) = text.split_once(':') {
            (k, Some(v))
        } else {
            (text, None)
        };
        mapping.insert(Value::from(key), val.map(Value::from).unwrap_or(Value::Null));
    }
    *value = Value::Mapping(mapping);
}

/// Merge `src` into `dst`. Mappings recurse; a key missing from `dst`
/// takes the `src` value; any other collision keeps the `dst` value, so
/// the earlier fragment wins.
pub fn deep_merge(dst: &mut Value, src: &Value) {
    let src_map = match src.as_mapping() {
        Some(map) => map,
        None => return,
    };
    let dst_map = match dst.as_mapping_mut() {
        Some(map) => map,
        None => return,
    };
    for (key, src_value) in src_map {
        let mut src_value = src_value.clone();
        if is_kv_list_key(key) {
            normalize_kv_list(&mut src_value);
        }
        match dst_map.get_mut(key) {
            None => {
                dst_map.insert(key.clone(), src_value);
            }
            Some(dst_value) => {
                if is_kv_list_key(key) {
                    normalize_kv_list(dst_value);
                }
                if dst_value.is_mapping() && src_value.is_mapping() {
                    deep_merge(dst_value, &src_value);
                }
            }
        }
    }
}

/// Fold documents left-to-right into one; the first document seeds the
/// result and later ones only contribute what is missing.
pub fn fold_documents(docs: Vec<Value>) -> Value {
    let mut iter = docs.into_iter();
    let mut merged = match iter.next() {
        Some(first) => first,
        None => Value::Mapping(Mapping::new()),
    };
    for doc in iter {
        deep_merge(&mut merged, &doc);
    }
    merged
}

fn is_kv_list_key(key: &Value) -> bool {
    key.as_str()
        .map(|k| KV_LIST_KEYS.contains(&k))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_missing_keys_taken_from_source() {
        let mut dst = yaml("services:\n  web:\n    image: nginx\n");
        let src = yaml("services:\n  db:\n    image: postgres\nvolumes:\n  data: {}\n");
        deep_merge(&mut dst, &src);

        assert_eq!(dst["services"]["web"]["image"].as_str(), Some("nginx"));
        assert_eq!(dst["services"]["db"]["image"].as_str(), Some("postgres"));
        assert!(dst["volumes"]["data"].is_mapping());
    }

    #[test]
    fn test_scalar_collision_keeps_destination() {
        let mut dst = yaml("services:\n  web:\n    image: nginx:1\n");
        let src = yaml("services:\n  web:\n    image: nginx:2\n    restart: always\n");
        deep_merge(&mut dst, &src);

        assert_eq!(dst["services"]["web"]["image"].as_str(), Some("nginx:1"));
        assert_eq!(dst["services"]["web"]["restart"].as_str(), Some("always"));
    }

    #[test]
    fn test_environment_lists_merge_per_key() {
        let mut dst = yaml("services:\n  web:\n    environment:\n      - A=1\n      - B=2\n");
        let src = yaml("services:\n  web:\n    environment:\n      - B=9\n      - C=3\n");
        deep_merge(&mut dst, &src);

        let env = &dst["services"]["web"]["environment"];
        assert_eq!(env["A"].as_str(), Some("1"));
        assert_eq!(env["B"].as_str(), Some("2"));
        assert_eq!(env["C"].as_str(), Some("3"));
    }

    #[test]
    fn test_ports_lists_keep_their_shape() {
        let mut dst = yaml("services:\n  web:\n    ports:\n      - '8069:8069'\n");
        let src = yaml("services:\n  web:\n    ports:\n      - '9999:9999'\n");
        deep_merge(&mut dst, &src);

        let ports = dst["services"]["web"]["ports"].as_sequence().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].as_str(), Some("8069:8069"));
    }

    #[test]
    fn test_kv_normalization_shapes() {
        let mut value = yaml("- A=1\n- B:colon\n- BARE\n- C=x=y\n");
        normalize_kv_list(&mut value);

        assert_eq!(value["A"].as_str(), Some("1"));
        assert_eq!(value["B"].as_str(), Some("colon"));
        assert!(value["BARE"].is_null());
        assert_eq!(value["C"].as_str(), Some("x=y"));
    }

    #[test]
    fn test_mixed_list_left_alone() {
        let mut value = yaml("- A=1\n- 5\n");
        normalize_kv_list(&mut value);
        assert!(value.is_sequence());
    }

    #[test]
    fn test_fold_first_fragment_wins() {
        let docs = vec![
            yaml("services:\n  web:\n    image: override\n"),
            yaml("services:\n  web:\n    image: base\n    command: serve\n"),
        ];
        let merged = fold_documents(docs);
        assert_eq!(merged["services"]["web"]["image"].as_str(), Some("override"));
        assert_eq!(merged["services"]["web"]["command"].as_str(), Some("serve"));
    }

    #[test]
    fn test_merge_with_empty_leaves_destination_unchanged() {
        let mut doc = yaml(
            "services:\n  web:\n    image: nginx\n    environment:\n      A: \"1\"\nvolumes:\n  data: {}\n",
        );
        let original = doc.clone();

        deep_merge(&mut doc, &yaml("{}"));
        assert_eq!(doc, original);
    }

    #[test]
    fn test_self_merge_is_a_no_op() {
        let mut doc = yaml(
            "services:\n  web:\n    image: nginx\n    ports:\n      - '8069:8069'\n    environment:\n      A: \"1\"\n      B: \"2\"\n",
        );
        let original = doc.clone();

        deep_merge(&mut doc, &original);
        assert_eq!(doc, original);
    }
}
