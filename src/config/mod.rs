//! Layered configuration for json-exec.
//!
//! Settings are merged from four layers, later layers winning key by key:
//! 1. **Defaults** - built into the binary
//! 2. **File** - YAML config file (explicit, or found in `$CWD` / `~/.json-exec/`)
//! 3. **Environment** - `JSON_EXEC_<SECTION>_<KEY>` variables
//! 4. **Flags** - command-line flags that were actually given
//!
//! ## Environment Variables
//! - `JSON_EXEC_CONFIG_FILE` - Explicit config file path
//! - `JSON_EXEC_GLOBAL_LOG_LEVEL` - Minimum log level
//! - `JSON_EXEC_GLOBAL_EXTRA_FIELDS` - `key=value,key=value` extra fields
//! - `JSON_EXEC_RUN_IGNORE_STDOUT` / `JSON_EXEC_RUN_IGNORE_STDERR`
//!
//! The merged result is validated into an immutable [`Settings`] snapshot
//! held by a [`SettingsStore`], which the [`watcher`] refreshes when the
//! file changes on disk.

mod env;
mod loader;
mod merge;
pub mod store;
mod types;
pub mod watcher;

pub use env::{config_file_var, env_key, env_overlay};
pub use loader::{
    ConfigLayers, ConfigPaths, ConfigSource, FileLayer, expand_env, read_config_file, resolve_path,
};
pub use merge::{deep_merge, deep_merge_all, set_path};
pub use store::{ReloadOutcome, SettingsStore};
pub use types::*;
pub use watcher::{ConfigWatcherHandle, WatchEvent, WatcherConfig, start_config_watcher};
