//! Configuration types and structures.
//!
//! Settings are decoded in two stages: the merged layers deserialize into
//! [`RawSettings`] (plain strings and maps, exactly as written), which
//! [`Settings::from_raw`] validates into the typed snapshot.

use crate::error::ConfigError;
use crate::logging::{
    DEFAULT_LEVEL_FIELD_NAME, DEFAULT_MESSAGE_FIELD_NAME, DEFAULT_TIMESTAMP_FIELD_NAME,
    FieldNames, LogLevel, SinkConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Prefix for every environment variable the application reads or exports.
pub const ENV_PREFIX: &str = "JSON_EXEC";

/// Name of the config folder in the user's home directory.
pub const DEFAULT_CONFIG_FOLDER: &str = ".json-exec";

/// Config file name without extension.
pub const DEFAULT_CONFIG_NAME: &str = "json-exec";

/// Accepted config file extensions, in search order.
pub const CONFIG_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Config settings as written in the file, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSettings {
    #[serde(default)]
    pub global: RawGlobalSettings,

    #[serde(default)]
    pub run: RunSettings,

    #[serde(default)]
    pub version: VersionSettings,
}

/// The `global` section as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawGlobalSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Scalars are accepted and stringified during validation.
    #[serde(default)]
    pub extra_fields: Map<String, Value>,

    #[serde(default)]
    pub level_field_name: String,

    #[serde(default)]
    pub message_field_name: String,

    #[serde(default)]
    pub timestamp_field_name: String,
}

impl Default for RawGlobalSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            extra_fields: Map::new(),
            level_field_name: DEFAULT_LEVEL_FIELD_NAME.to_string(),
            message_field_name: DEFAULT_MESSAGE_FIELD_NAME.to_string(),
            timestamp_field_name: DEFAULT_TIMESTAMP_FIELD_NAME.to_string(),
        }
    }
}

fn default_log_level() -> String {
    LogLevel::default().as_str().to_string()
}

/// Options for the `run` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Discard the command's stdout instead of capturing it.
    #[serde(default)]
    pub ignore_stdout: bool,

    /// Discard the command's stderr instead of capturing it.
    #[serde(default)]
    pub ignore_stderr: bool,
}

/// Options for the `version` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSettings {
    /// Include build and release information.
    #[serde(default)]
    pub verbose: bool,

    /// Print plain text instead of a log record.
    #[serde(default)]
    pub plaintext: bool,
}

/// One complete, validated settings snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Settings {
    pub global: GlobalSettings,
    pub run: RunSettings,
    pub version: VersionSettings,
}

/// Validated global output options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSettings {
    pub log_level: LogLevel,
    pub extra_fields: BTreeMap<String, String>,
    pub level_field_name: String,
    pub message_field_name: String,
    pub timestamp_field_name: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            extra_fields: BTreeMap::new(),
            level_field_name: DEFAULT_LEVEL_FIELD_NAME.to_string(),
            message_field_name: DEFAULT_MESSAGE_FIELD_NAME.to_string(),
            timestamp_field_name: DEFAULT_TIMESTAMP_FIELD_NAME.to_string(),
        }
    }
}

impl GlobalSettings {
    /// Validate the raw section. Blank field names fall back to the defaults.
    pub fn from_raw(raw: RawGlobalSettings) -> Result<Self, ConfigError> {
        let log_level = raw
            .log_level
            .parse::<LogLevel>()
            .map_err(|_| ConfigError::InvalidLogLevel {
                value: raw.log_level.clone(),
            })?;

        let extra_fields = raw
            .extra_fields
            .into_iter()
            .map(|(key, value)| stringify_field(&key, value).map(|v| (key, v)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Self {
            log_level,
            extra_fields,
            level_field_name: or_default(raw.level_field_name, DEFAULT_LEVEL_FIELD_NAME),
            message_field_name: or_default(raw.message_field_name, DEFAULT_MESSAGE_FIELD_NAME),
            timestamp_field_name: or_default(
                raw.timestamp_field_name,
                DEFAULT_TIMESTAMP_FIELD_NAME,
            ),
        })
    }

    /// Logger configuration derived from these options.
    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            min_level: self.log_level,
            field_names: FieldNames {
                level: self.level_field_name.clone(),
                message: self.message_field_name.clone(),
                timestamp: self.timestamp_field_name.clone(),
            },
            extra_fields: self.extra_fields.clone(),
        }
    }
}

impl Settings {
    /// Validate every section. Any failure rejects the whole snapshot.
    pub fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            global: GlobalSettings::from_raw(raw.global)?,
            run: raw.run,
            version: raw.version,
        })
    }
}

fn or_default(name: String, default: &str) -> String {
    if name.trim().is_empty() {
        default.to_string()
    } else {
        name
    }
}

fn stringify_field(key: &str, value: Value) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => Err(ConfigError::InvalidValue {
            key: format!("global.extra_fields.{key}"),
            reason: "extra field values must be scalars".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_raw(RawSettings::default()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.global.log_level, LogLevel::Info);
        assert_eq!(settings.global.level_field_name, "@level");
        assert_eq!(settings.global.message_field_name, "@message");
        assert_eq!(settings.global.timestamp_field_name, "@timestamp");
        assert!(settings.global.extra_fields.is_empty());
        assert!(!settings.run.ignore_stdout);
        assert!(!settings.run.ignore_stderr);
        assert!(!settings.version.verbose);
        assert!(!settings.version.plaintext);
    }

    #[test]
    fn test_blank_field_names_fall_back() {
        let raw = RawGlobalSettings {
            level_field_name: "  ".into(),
            message_field_name: String::new(),
            timestamp_field_name: "time".into(),
            ..Default::default()
        };
        let global = GlobalSettings::from_raw(raw).unwrap();
        assert_eq!(global.level_field_name, "@level");
        assert_eq!(global.message_field_name, "@message");
        assert_eq!(global.timestamp_field_name, "time");
    }

    #[test]
    fn test_none_disables_output() {
        for value in ["none", "NONE", "None"] {
            let raw = RawGlobalSettings {
                log_level: value.into(),
                ..Default::default()
            };
            let global = GlobalSettings::from_raw(raw).unwrap();
            assert_eq!(global.log_level, LogLevel::Disabled);
            assert!(!global.sink_config().should_log(LogLevel::Panic));
        }
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let raw = RawGlobalSettings {
            log_level: "loud".into(),
            ..Default::default()
        };
        let err = GlobalSettings::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel { ref value } if value == "loud"));
    }

    #[test]
    fn test_extra_fields_stringified() {
        let raw: RawSettings = serde_json::from_value(json!({
            "global": { "extra_fields": { "app": "billing", "port": 8080, "canary": true } }
        }))
        .unwrap();
        let settings = Settings::from_raw(raw).unwrap();
        let fields = &settings.global.extra_fields;
        assert_eq!(fields["app"], "billing");
        assert_eq!(fields["port"], "8080");
        assert_eq!(fields["canary"], "true");
    }

    #[test]
    fn test_nested_extra_field_rejected() {
        let raw: RawSettings = serde_json::from_value(json!({
            "global": { "extra_fields": { "nested": { "a": 1 } } }
        }))
        .unwrap();
        assert!(matches!(
            Settings::from_raw(raw),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_sink_config_mirrors_settings() {
        let mut global = GlobalSettings::default();
        global.log_level = LogLevel::Warn;
        global.message_field_name = "msg".into();
        global.extra_fields.insert("env".into(), "prod".into());

        let sink = global.sink_config();
        assert_eq!(sink.min_level, LogLevel::Warn);
        assert_eq!(sink.field_names.message, "msg");
        assert_eq!(sink.field_names.level, "@level");
        assert_eq!(sink.extra_fields["env"], "prod");
    }
}
