//! Exit codes and the typed errors that map onto them.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code of a successful run.
pub const SUCCESS: i32 = 0;

/// Failure categories, each with a fixed process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Bad flags or arguments, before parsing succeeds.
    Usage,
    GeneralFailure,
    /// The config file could not be located or read.
    ConfigLoadFailure,
    /// The config file was read but its contents are invalid.
    ConfigParseFailure,
    /// The child process could not be started at all.
    LaunchFailure,
}

impl ErrorCode {
    pub const fn exit_code(self) -> i32 {
        match self {
            ErrorCode::Usage => 1,
            ErrorCode::GeneralFailure => 2,
            ErrorCode::ConfigLoadFailure => 40,
            ErrorCode::ConfigParseFailure => 41,
            ErrorCode::LaunchFailure => 99,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Usage => "USAGE",
            ErrorCode::GeneralFailure => "GENERAL_FAILURE",
            ErrorCode::ConfigLoadFailure => "CONFIG_LOAD_FAILURE",
            ErrorCode::ConfigParseFailure => "CONFIG_PARSE_FAILURE",
            ErrorCode::LaunchFailure => "LAUNCH_FAILURE",
        };
        f.write_str(name)
    }
}

/// Errors raised while locating, reading or decoding configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config file '{}': file not found", path.display())]
    NotFound { path: PathBuf },

    #[error("unsupported config file type '{}': expected a .yaml or .yml file", path.display())]
    UnsupportedExtension { path: PathBuf },

    #[error("failed to determine absolute path of config file '{path}': {source}")]
    AbsolutePath {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to load config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error(
        "failed to parse log level '{value}': \
         must be one of debug, info, warn, error, fatal, panic or none"
    )]
    InvalidLogLevel { value: String },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to parse configuration settings: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::NotFound { .. }
            | ConfigError::UnsupportedExtension { .. }
            | ConfigError::AbsolutePath { .. }
            | ConfigError::Read { .. } => ErrorCode::ConfigLoadFailure,
            ConfigError::Parse { .. }
            | ConfigError::InvalidLogLevel { .. }
            | ConfigError::InvalidValue { .. }
            | ConfigError::Decode(_) => ErrorCode::ConfigParseFailure,
        }
    }
}

/// Errors raised by the persistent setup that precedes every subcommand.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to set environment variable '{key}': {reason}")]
    ExportEnv { key: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::ExportEnv { .. } => ErrorCode::GeneralFailure,
            DispatchError::Config(err) => err.code(),
        }
    }
}
