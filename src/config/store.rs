//! Settings snapshot store.
//!
//! Holds the active [`Settings`] as an immutable snapshot behind an
//! [`ArcSwap`]. Loads and reloads build a complete new snapshot, reconfigure
//! the logger sink, then swap the snapshot in; a failed decode leaves both
//! untouched. Reloads are serialized and skipped when the file bytes have
//! not changed since the last applied reload.

use super::loader::{ConfigLayers, ConfigSource, read_config_file};
use super::types::Settings;
use crate::error::ConfigError;
use crate::logging::JsonSink;
use arc_swap::ArcSwap;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Result of a reload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new snapshot is active.
    Reloaded,
    /// Nothing to do: no file, or its contents match the active snapshot.
    Unchanged,
}

pub struct SettingsStore {
    source: ConfigSource,
    env: Value,
    flags: Value,
    sink: Arc<JsonSink>,
    current: ArcSwap<Settings>,
    /// Digest of the file bytes behind the active snapshot. Guards reloads.
    applied_digest: Mutex<Option<u64>>,
}

impl SettingsStore {
    /// Load the initial snapshot from `source` plus the env and flag layers.
    ///
    /// The env and flag layers are kept and re-applied on every reload.
    pub fn load(
        source: ConfigSource,
        env: Value,
        flags: Value,
        sink: Arc<JsonSink>,
    ) -> Result<Self, ConfigError> {
        let file = source.path().map(read_config_file).transpose()?;
        let digest = file.as_ref().map(|f| f.digest);
        let layers = ConfigLayers {
            file: file.map(|f| f.value),
            env: env.clone(),
            flags: flags.clone(),
        };
        let settings = layers.decode()?;

        let store = Self {
            source,
            env,
            flags,
            sink,
            current: ArcSwap::from_pointee(Settings::default()),
            applied_digest: Mutex::new(digest),
        };
        store.apply(settings);
        Ok(store)
    }

    /// The active snapshot.
    pub fn current(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// Re-read the config file and swap in a new snapshot.
    ///
    /// On error the previous snapshot and logger configuration stay active.
    pub fn reload(&self) -> Result<ReloadOutcome, ConfigError> {
        let mut applied = self
            .applied_digest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(path) = self.source.path() else {
            return Ok(ReloadOutcome::Unchanged);
        };
        let file = read_config_file(path)?;
        if *applied == Some(file.digest) {
            debug!(config_file = %path.display(), "Configuration file unchanged, skipping reload");
            return Ok(ReloadOutcome::Unchanged);
        }

        let layers = ConfigLayers {
            file: Some(file.value),
            env: self.env.clone(),
            flags: self.flags.clone(),
        };
        let settings = layers.decode()?;
        self.apply(settings);
        *applied = Some(file.digest);
        Ok(ReloadOutcome::Reloaded)
    }

    /// Reconfigure the sink, then publish the snapshot.
    fn apply(&self, settings: Settings) {
        self.sink.configure(settings.global.sink_config());
        let settings = Arc::new(settings);
        self.current.store(Arc::clone(&settings));

        let rendered = serde_json::to_string(&*settings).unwrap_or_default();
        debug!(config_settings = %rendered, "Successfully parsed configuration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, SharedBuffer};
    use serde_json::json;
    use tempfile::TempDir;

    fn sink() -> Arc<JsonSink> {
        Arc::new(JsonSink::new(SharedBuffer::new(), SharedBuffer::new()))
    }

    fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("json-exec.yaml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let sink = sink();
        let store = SettingsStore::load(
            ConfigSource::Defaults,
            json!({}),
            json!({}),
            Arc::clone(&sink),
        )
        .unwrap();
        assert_eq!(*store.current(), Settings::default());
        assert_eq!(store.reload().unwrap(), ReloadOutcome::Unchanged);
        assert_eq!(sink.config().min_level, LogLevel::Info);
    }

    #[test]
    fn test_load_configures_sink() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            concat!(
                "global:\n",
                "  log_level: WARN\n",
                "  timestamp_field_name: ts\n",
                "  extra_fields:\n",
                "    app: billing\n",
            ),
        );
        let sink = sink();
        let store = SettingsStore::load(
            ConfigSource::Explicit(path),
            json!({}),
            json!({}),
            Arc::clone(&sink),
        )
        .unwrap();

        let config = sink.config();
        assert_eq!(config.min_level, LogLevel::Warn);
        assert_eq!(config.field_names.timestamp, "ts");
        assert_eq!(config.extra_fields["app"], "billing");
        assert_eq!(store.current().global.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_reload_applies_new_contents() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "global:\n  log_level: info\n");
        let sink = sink();
        let store = SettingsStore::load(
            ConfigSource::Discovered(path.clone()),
            json!({}),
            json!({}),
            Arc::clone(&sink),
        )
        .unwrap();

        std::fs::write(
            &path,
            "global:\n  log_level: error\nrun:\n  ignore_stderr: true\n",
        )
        .unwrap();
        assert_eq!(store.reload().unwrap(), ReloadOutcome::Reloaded);
        assert_eq!(store.current().global.log_level, LogLevel::Error);
        assert!(store.current().run.ignore_stderr);
        assert_eq!(sink.config().min_level, LogLevel::Error);
    }

    #[test]
    fn test_reload_with_same_bytes_is_noop() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "global:\n  log_level: debug\n");
        let store =
            SettingsStore::load(ConfigSource::Explicit(path.clone()), json!({}), json!({}), sink())
                .unwrap();
        let before = store.current();

        std::fs::write(&path, "global:\n  log_level: debug\n").unwrap();
        assert_eq!(store.reload().unwrap(), ReloadOutcome::Unchanged);
        assert!(Arc::ptr_eq(&before, &store.current()));
    }

    #[test]
    fn test_invalid_reload_keeps_previous_snapshot() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "global:\n  log_level: warn\n  message_field_name: msg\n");
        let sink = sink();
        let store = SettingsStore::load(
            ConfigSource::Explicit(path.clone()),
            json!({}),
            json!({}),
            Arc::clone(&sink),
        )
        .unwrap();
        let before = store.current();

        std::fs::write(&path, "global:\n  log_level: shouting\n  message_field_name: text\n")
            .unwrap();
        let err = store.reload().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel { .. }));
        assert_eq!(*store.current(), *before);
        assert_eq!(sink.config().field_names.message, "msg");

        std::fs::write(&path, "global: [broken").unwrap();
        assert!(matches!(store.reload(), Err(ConfigError::Parse { .. })));
        assert_eq!(*store.current(), *before);

        // A later valid edit is still picked up.
        std::fs::write(&path, "global:\n  log_level: debug\n").unwrap();
        assert_eq!(store.reload().unwrap(), ReloadOutcome::Reloaded);
        assert_eq!(store.current().global.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_env_and_flags_survive_reload() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "global:\n  log_level: info\n");
        let store = SettingsStore::load(
            ConfigSource::Explicit(path.clone()),
            json!({"run": {"ignore_stdout": true}}),
            json!({"global": {"log_level": "error"}}),
            sink(),
        )
        .unwrap();
        assert_eq!(store.current().global.log_level, LogLevel::Error);

        std::fs::write(&path, "global:\n  log_level: debug\n  level_field_name: lvl\n").unwrap();
        store.reload().unwrap();
        let current = store.current();
        assert_eq!(current.global.log_level, LogLevel::Error);
        assert_eq!(current.global.level_field_name, "lvl");
        assert!(current.run.ignore_stdout);
    }

    #[test]
    fn test_initial_invalid_file_fails_load() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "global:\n  log_level: 12\n");
        let err = SettingsStore::load(ConfigSource::Explicit(path), json!({}), json!({}), sink())
            .err()
            .unwrap();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigParseFailure);
    }

    #[test]
    fn test_concurrent_reloads_apply_once() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "global:\n  log_level: info\n");
        let sink = sink();
        let store = SettingsStore::load(
            ConfigSource::Explicit(path.clone()),
            json!({}),
            json!({}),
            Arc::clone(&sink),
        )
        .unwrap();

        std::fs::write(
            &path,
            "global:\n  log_level: warn\n  message_field_name: text\n",
        )
        .unwrap();

        const THREADS: usize = 8;
        let barrier = std::sync::Barrier::new(THREADS);
        let (barrier, store) = (&barrier, &store);
        let outcomes: Vec<ReloadOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        store.reload().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let reloaded = outcomes
            .iter()
            .filter(|o| **o == ReloadOutcome::Reloaded)
            .count();
        assert_eq!(reloaded, 1, "{outcomes:?}");
        assert_eq!(outcomes.len() - reloaded, THREADS - 1);

        let current = store.current();
        assert_eq!(current.global.log_level, LogLevel::Warn);
        assert_eq!(current.global.message_field_name, "text");
        assert_eq!(sink.config().min_level, LogLevel::Warn);
        assert_eq!(sink.config().field_names.message, "text");
    }
}
