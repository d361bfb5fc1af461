//! Layer merging for configuration values.
//!
//! Every configuration source (built-in defaults, config file, environment,
//! command-line flags) is expressed as a JSON value. Layers are folded in
//! precedence order, so later layers override earlier ones key by key.

use serde_json::{Map, Value};

/// Deep merge two JSON values, with `overlay` taking precedence over `base`.
///
/// - Objects are merged recursively: keys in overlay override keys in base
/// - Arrays, strings, numbers, booleans are replaced entirely
/// - If overlay is null, the base value is preserved (null means "not specified")
///
/// # Example
/// ```
/// use serde_json::json;
/// use json_exec::config::deep_merge;
///
/// let file = json!({ "global": { "log_level": "info", "extra_fields": { "app": "a" } } });
/// let flags = json!({ "global": { "log_level": "debug", "extra_fields": { "host": "h" } } });
/// let merged = deep_merge(file, flags);
/// assert_eq!(
///     merged,
///     json!({ "global": { "log_level": "debug", "extra_fields": { "app": "a", "host": "h" } } })
/// );
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Merge layers in order, with later layers taking precedence.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}

/// Set `value` at a dotted path such as `global.log_level`, creating
/// intermediate objects as needed. A non-object on the way is replaced.
pub fn set_path(root: &mut Value, dotted: &str, value: Value) {
    let (parents, leaf) = match dotted.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, dotted),
    };

    let mut current = root;
    for segment in parents.into_iter().flat_map(|p| p.split('.')) {
        current = as_object(current)
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }
    as_object(current).insert(leaf.to_string(), value);
}

fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}
