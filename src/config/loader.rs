//! Config file resolution and layer decoding.
//!
//! The config file is located with this precedence:
//! 1. an explicit path given on the command line
//! 2. the `JSON_EXEC_CONFIG_FILE` environment variable
//! 3. `json-exec.yaml` / `json-exec.yml` in the current directory
//! 4. the same names under `~/.json-exec/`
//!
//! An explicit path that does not exist is an error. When the default search
//! finds nothing, built-in defaults apply.

use super::merge::deep_merge_all;
use super::types::{
    CONFIG_EXTENSIONS, DEFAULT_CONFIG_FOLDER, DEFAULT_CONFIG_NAME, RawSettings, Settings,
};
use crate::error::ConfigError;
use serde_json::Value;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

/// Directories searched when no explicit config path is given.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub search_dirs: Vec<PathBuf>,
}

impl ConfigPaths {
    /// The current directory, then `~/.json-exec`. Unavailable locations are skipped.
    pub fn discover() -> Self {
        let cwd = std::env::current_dir().ok();
        let user_dir = dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_FOLDER));
        Self {
            search_dirs: cwd.into_iter().chain(user_dir).collect(),
        }
    }

    /// Create paths with explicit search directories.
    pub fn with_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// First existing `json-exec.{yaml,yml}` across the search directories.
    pub fn find(&self) -> Option<PathBuf> {
        self.search_dirs.iter().find_map(|dir| {
            CONFIG_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{DEFAULT_CONFIG_NAME}.{ext}")))
                .find(|candidate| candidate.is_file())
        })
    }
}

/// Where the active configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Requested by flag or environment variable.
    Explicit(PathBuf),
    /// Found by the default search.
    Discovered(PathBuf),
    /// No file; built-in defaults only.
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(path) | ConfigSource::Discovered(path) => Some(path),
            ConfigSource::Defaults => None,
        }
    }

    pub fn is_default(&self) -> bool {
        !matches!(self, ConfigSource::Explicit(_))
    }
}

/// Resolve the config file location.
///
/// `explicit` is the command-line value (only when the flag was given),
/// `env_override` the value of `JSON_EXEC_CONFIG_FILE`. Empty strings count
/// as absent. `$VAR` references in the requested path are expanded with `lookup`.
pub fn resolve_path(
    explicit: Option<&str>,
    env_override: Option<&str>,
    paths: &ConfigPaths,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigSource, ConfigError> {
    let requested = explicit
        .filter(|p| !p.is_empty())
        .or(env_override.filter(|p| !p.is_empty()));

    let Some(requested) = requested else {
        return Ok(paths
            .find()
            .map(ConfigSource::Discovered)
            .unwrap_or(ConfigSource::Defaults));
    };

    let expanded = expand_env(requested, lookup);
    let path = std::path::absolute(&expanded).map_err(|source| ConfigError::AbsolutePath {
        path: requested.to_string(),
        source,
    })?;

    let supported = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext));
    if !supported {
        return Err(ConfigError::UnsupportedExtension { path });
    }
    if !path.is_file() {
        return Err(ConfigError::NotFound { path });
    }
    Ok(ConfigSource::Explicit(path))
}

/// Expand `$NAME` and `${NAME}` references. Unset variables expand to nothing.
pub fn expand_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let start = i + 1;
        let rest = &input[start..];
        let reference = match rest.strip_prefix('{') {
            Some(braced) => braced.find('}').map(|end| (&braced[..end], end + 2)),
            None => {
                let len = rest
                    .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                    .unwrap_or(rest.len());
                (len > 0).then(|| (&rest[..len], len))
            }
        };
        match reference {
            Some((name, consumed)) => {
                out.push_str(&lookup(name).unwrap_or_default());
                while chars.next_if(|&(j, _)| j < start + consumed).is_some() {}
            }
            None => out.push('$'),
        }
    }
    out
}

/// A parsed config file together with a digest of its bytes.
#[derive(Debug, Clone)]
pub struct FileLayer {
    pub value: Value,
    pub digest: u64,
}

/// Read and parse a YAML config file. An empty file parses to null.
pub fn read_config_file(path: &Path) -> Result<FileLayer, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_yaml::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    Ok(FileLayer {
        value,
        digest: digest(&bytes),
    })
}

fn digest(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// The layers merged into a snapshot, lowest precedence first.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub file: Option<Value>,
    pub env: Value,
    pub flags: Value,
}

impl ConfigLayers {
    /// Merge defaults < file < env < flags and validate the result.
    pub fn decode(&self) -> Result<Settings, ConfigError> {
        let defaults = serde_json::to_value(RawSettings::default())?;
        let merged = deep_merge_all([
            defaults,
            self.file.clone().unwrap_or(Value::Null),
            self.env.clone(),
            self.flags.clone(),
        ]);
        let raw: RawSettings = serde_json::from_value(merged)?;
        Settings::from_raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use serde_json::json;
    use tempfile::TempDir;

    fn no_vars(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_resolve_defaults_when_nothing_found() {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::with_dirs(vec![temp.path().join("cwd"), temp.path().join("home")]);
        let source = resolve_path(None, None, &paths, no_vars).unwrap();
        assert_eq!(source, ConfigSource::Defaults);
        assert!(source.path().is_none());
    }

    #[test]
    fn test_resolve_discovers_in_order() {
        let temp = TempDir::new().unwrap();
        let cwd = temp.path().join("cwd");
        let home = temp.path().join("home");
        std::fs::create_dir_all(&cwd).unwrap();
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(home.join("json-exec.yaml"), "").unwrap();
        std::fs::write(cwd.join("json-exec.yml"), "").unwrap();

        let paths = ConfigPaths::with_dirs(vec![cwd.clone(), home]);
        let source = resolve_path(None, None, &paths, no_vars).unwrap();
        assert_eq!(source, ConfigSource::Discovered(cwd.join("json-exec.yml")));
        assert!(source.is_default());
    }

    #[test]
    fn test_explicit_beats_env() {
        let temp = TempDir::new().unwrap();
        let flag = temp.path().join("flag.yaml");
        let env = temp.path().join("env.yaml");
        std::fs::write(&flag, "").unwrap();
        std::fs::write(&env, "").unwrap();

        let paths = ConfigPaths::default();
        let source = resolve_path(flag.to_str(), env.to_str(), &paths, no_vars).unwrap();
        assert_eq!(source, ConfigSource::Explicit(flag));

        let source = resolve_path(None, env.to_str(), &paths, no_vars).unwrap();
        assert_eq!(source, ConfigSource::Explicit(env));
    }

    #[test]
    fn test_explicit_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.yaml");
        let err =
            resolve_path(missing.to_str(), None, &ConfigPaths::default(), no_vars).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_explicit_wrong_extension() {
        let temp = TempDir::new().unwrap();
        let toml = temp.path().join("config.toml");
        std::fs::write(&toml, "").unwrap();
        let err =
            resolve_path(toml.to_str(), None, &ConfigPaths::default(), no_vars).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedExtension { .. }));
    }

    #[test]
    fn test_explicit_path_expands_with_lookup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.yaml");
        std::fs::write(&path, "").unwrap();

        let dir = temp.path().to_str().unwrap().to_string();
        let lookup = |name: &str| (name == "CFG_DIR").then(|| dir.clone());
        let source =
            resolve_path(Some("${CFG_DIR}/app.yaml"), None, &ConfigPaths::default(), lookup)
                .unwrap();
        assert_eq!(source, ConfigSource::Explicit(path));
    }

    #[test]
    fn test_expand_env() {
        let lookup = |name: &str| match name {
            "HOME" => Some("/home/me".to_string()),
            "APP" => Some("json".to_string()),
            _ => None,
        };
        assert_eq!(
            expand_env("$HOME/.cfg/${APP}-exec.yaml", lookup),
            "/home/me/.cfg/json-exec.yaml"
        );
        assert_eq!(expand_env("/etc/$UNSET/x.yaml", lookup), "/etc//x.yaml");
        assert_eq!(expand_env("cost$", lookup), "cost$");
        assert_eq!(expand_env("${unterminated", lookup), "${unterminated");
        assert_eq!(expand_env("plain.yaml", lookup), "plain.yaml");
    }

    #[test]
    fn test_read_empty_and_invalid_files() {
        let temp = TempDir::new().unwrap();
        let empty = temp.path().join("empty.yaml");
        std::fs::write(&empty, "\n  \n").unwrap();
        assert_eq!(read_config_file(&empty).unwrap().value, Value::Null);

        let broken = temp.path().join("broken.yaml");
        std::fs::write(&broken, "global: [unclosed").unwrap();
        assert!(matches!(
            read_config_file(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_digest_tracks_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("c.yaml");
        std::fs::write(&path, "global:\n  log_level: info\n").unwrap();
        let first = read_config_file(&path).unwrap().digest;
        assert_eq!(first, read_config_file(&path).unwrap().digest);
        std::fs::write(&path, "global:\n  log_level: warn\n").unwrap();
        assert_ne!(first, read_config_file(&path).unwrap().digest);
    }

    #[test]
    fn test_layer_precedence() {
        let layers = ConfigLayers {
            file: Some(json!({
                "global": {"log_level": "warn", "message_field_name": "msg"},
                "run": {"ignore_stdout": true}
            })),
            env: json!({"global": {"log_level": "error"}}),
            flags: json!({"global": {"log_level": "debug", "level_field_name": null}}),
        };
        let settings = layers.decode().unwrap();
        assert_eq!(settings.global.log_level, LogLevel::Debug);
        assert_eq!(settings.global.message_field_name, "msg");
        assert_eq!(settings.global.level_field_name, "@level");
        assert!(settings.run.ignore_stdout);
    }

    #[test]
    fn test_wrong_types_fail_decode() {
        let layers = ConfigLayers {
            file: Some(json!({"run": {"ignore_stdout": "sometimes"}})),
            ..Default::default()
        };
        assert!(matches!(layers.decode(), Err(ConfigError::Decode(_))));
    }
}
