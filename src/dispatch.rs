//! Command dispatch: the persistent setup shared by every subcommand.
//!
//! A [`Dispatcher`] parses arguments, exports identity variables for child
//! processes, loads the layered settings, starts the config watcher, and
//! then hands the active snapshot to the selected subcommand.

use crate::build_info::{BuildInfo, validate_env_pair};
use crate::cli::{Cli, Command, run, version};
use crate::config::{
    ConfigPaths, ConfigWatcherHandle, ENV_PREFIX, SettingsStore, WatcherConfig,
    config_file_var, env_overlay, resolve_path, start_config_watcher,
};
use crate::error::{DispatchError, ErrorCode, SUCCESS};
use crate::logging::JsonSink;
use clap::Parser;
use std::ffi::OsString;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct Dispatcher {
    sink: Arc<JsonSink>,
    env: Vec<(String, String)>,
    paths: ConfigPaths,
    watcher: Option<WatcherConfig>,
    build_info: BuildInfo,
    exit_code: i32,
}

impl Dispatcher {
    /// Dispatcher reading the process environment and the default search paths.
    pub fn new(sink: Arc<JsonSink>) -> Self {
        Self {
            sink,
            env: std::env::vars().collect(),
            paths: ConfigPaths::discover(),
            watcher: Some(WatcherConfig::default()),
            build_info: BuildInfo::current(),
            exit_code: ErrorCode::Usage.exit_code(),
        }
    }

    /// Use `env` instead of the process environment for settings.
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    pub fn with_paths(mut self, paths: ConfigPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_watcher(mut self, watcher: Option<WatcherConfig>) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn with_build_info(mut self, build_info: BuildInfo) -> Self {
        self.build_info = build_info;
        self
    }

    /// Exit code of the last step: usage until arguments parse.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn parse<I, T>(&mut self, args: I) -> Result<Cli, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args)?;
        self.exit_code = SUCCESS;
        Ok(cli)
    }

    /// Identity variables for child processes.
    pub fn exported_vars(&self) -> Vec<(String, String)> {
        self.build_info.exported_vars(ENV_PREFIX)
    }

    /// Export identity variables into the process environment.
    ///
    /// # Safety
    ///
    /// Must be called while the process is single-threaded: no other thread
    /// may read or write the environment concurrently.
    pub unsafe fn export_environment(&mut self) -> Result<(), DispatchError> {
        let vars = self.exported_vars();
        if let Err(e) = vars.iter().try_for_each(|(k, v)| validate_env_pair(k, v)) {
            self.exit_code = e.code().exit_code();
            return Err(e);
        }
        for (key, value) in vars {
            // SAFETY: upheld by the caller.
            unsafe { std::env::set_var(key, value) };
        }
        Ok(())
    }

    /// Load settings, start the watcher and run the subcommand.
    ///
    /// `out` receives plaintext output. Returns the process exit code.
    pub async fn execute(&mut self, cli: &Cli, out: &mut dyn Write) -> i32 {
        let store = match self.load(cli) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(error = %e, "failed to load configuration: {}", e);
                self.exit_code = e.code().exit_code();
                return self.exit_code;
            }
        };

        match store.source().path() {
            Some(path) => debug!(config_file = %path.display(), "Using configuration file"),
            None => debug!("No configuration file found, using defaults"),
        }

        // Held for the rest of the run; dropping it stops the watcher.
        let _watcher = self.start_watcher(&store);

        let settings = store.current();
        self.exit_code = match &cli.command {
            Command::Run(args) => run::execute(args, &settings.run).await,
            Command::Version(_) => version::execute(&settings.version, &self.build_info, out),
        };
        self.exit_code
    }

    fn load(&self, cli: &Cli) -> Result<SettingsStore, DispatchError> {
        let env_config_file = self
            .env
            .iter()
            .find(|(key, _)| *key == config_file_var(ENV_PREFIX))
            .map(|(_, value)| value.as_str());
        let lookup = |name: &str| {
            self.env
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };
        let source = resolve_path(
            cli.global.config_file.as_deref(),
            env_config_file,
            &self.paths,
            lookup,
        )?;

        let env = env_overlay(ENV_PREFIX, self.env.iter().cloned())?;
        let store = SettingsStore::load(source, env, cli.overlay(), Arc::clone(&self.sink))?;
        Ok(store)
    }

    fn start_watcher(&self, store: &Arc<SettingsStore>) -> Option<ConfigWatcherHandle> {
        let config = self.watcher.clone()?;
        let path = store.source().path()?.to_path_buf();
        match start_config_watcher(Arc::clone(store), &path, config) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(
                    "Failed to start config file watcher: {}. Continuing without reload.",
                    e
                );
                None
            }
        }
    }
}
