//! Environment variable layer.
//!
//! Each known setting can be supplied as `JSON_EXEC_<PATH>` where `<PATH>` is
//! the dotted setting path with dots replaced by underscores, upper-cased:
//! `global.log_level` is read from `JSON_EXEC_GLOBAL_LOG_LEVEL`.
//!
//! Only known keys are read, so an unrelated `JSON_EXEC_*` variable (such as
//! the identity variables exported for child processes) is never mistaken
//! for a setting. Empty values count as unset.

use super::merge::set_path;
use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// How an environment value is converted into a setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Text,
    Flag,
    /// Comma-separated `key=value` pairs.
    Fields,
}

const KNOWN_KEYS: [(&str, KeyKind); 9] = [
    ("global.log_level", KeyKind::Text),
    ("global.extra_fields", KeyKind::Fields),
    ("global.level_field_name", KeyKind::Text),
    ("global.message_field_name", KeyKind::Text),
    ("global.timestamp_field_name", KeyKind::Text),
    ("run.ignore_stdout", KeyKind::Flag),
    ("run.ignore_stderr", KeyKind::Flag),
    ("version.verbose", KeyKind::Flag),
    ("version.plaintext", KeyKind::Flag),
];

/// Environment variable name for a dotted setting path.
pub fn env_key(prefix: &str, dotted: &str) -> String {
    format!("{}_{}", prefix, dotted.replace('.', "_").to_ascii_uppercase())
}

/// Name of the variable that supplies the config file path.
pub fn config_file_var(prefix: &str) -> String {
    format!("{prefix}_CONFIG_FILE")
}

/// Build the environment layer from `vars`.
///
/// Takes an iterator so tests can pass synthetic data instead of `std::env::vars()`.
pub fn env_overlay(
    prefix: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<Value, ConfigError> {
    let vars: HashMap<String, String> = vars.into_iter().collect();
    let mut overlay = Value::Object(Map::new());

    for (path, kind) in KNOWN_KEYS {
        let key = env_key(prefix, path);
        let Some(raw) = vars.get(&key).filter(|v| !v.is_empty()) else {
            continue;
        };
        let value = match kind {
            KeyKind::Text => Value::String(raw.clone()),
            KeyKind::Flag => Value::Bool(parse_flag(&key, raw)?),
            KeyKind::Fields => Value::Object(parse_fields(&key, raw)?),
        };
        set_path(&mut overlay, path, value);
    }

    Ok(overlay)
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{raw}' is not a boolean"),
        }),
    }
}

fn parse_fields(key: &str, raw: &str) -> Result<Map<String, Value>, ConfigError> {
    let mut fields = Map::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, value)) = pair.split_once('=') else {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("'{pair}' is not in key=value form"),
            });
        };
        fields.insert(name.trim().to_string(), Value::String(value.to_string()));
    }
    Ok(fields)
}
