//! Build metadata and the environment variables exported to child processes.
//!
//! The build hash, release date and development flag are stamped in at
//! compile time through `JSON_EXEC_BUILD`, `JSON_EXEC_RELEASE_DATE` and
//! `JSON_EXEC_IS_DEVELOPMENT`.

use crate::config::env_key;
use crate::error::DispatchError;

const UNKNOWN_BUILD: &str = "unknown";
const UNRELEASED: &str = "Unreleased";

/// Identity of this binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub build: &'static str,
    pub command_name: &'static str,
    pub is_development: bool,
    pub release_date: &'static str,
    pub version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            build: option_env!("JSON_EXEC_BUILD").unwrap_or(UNKNOWN_BUILD),
            command_name: env!("CARGO_PKG_NAME"),
            is_development: option_env!("JSON_EXEC_IS_DEVELOPMENT")
                .map(|flag| !matches!(flag.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(true),
            release_date: option_env!("JSON_EXEC_RELEASE_DATE").unwrap_or(UNRELEASED),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn is_released(&self) -> bool {
        !self.release_date.is_empty() && self.release_date != UNRELEASED
    }

    /// Variables exported for child processes, with `prefix` applied.
    pub fn exported_vars(&self, prefix: &str) -> Vec<(String, String)> {
        [
            ("build", self.build.to_string()),
            ("command_name", self.command_name.to_string()),
            ("is_development", self.is_development.to_string()),
            ("release_date", self.release_date.to_string()),
            ("version", self.version.to_string()),
            ("os", std::env::consts::OS.to_string()),
            ("arch", std::env::consts::ARCH.to_string()),
        ]
        .into_iter()
        .map(|(name, value)| (env_key(prefix, name), value))
        .collect()
    }
}

/// Reject pairs that `std::env::set_var` would panic on.
pub fn validate_env_pair(key: &str, value: &str) -> Result<(), DispatchError> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.contains('=') {
        Some("key contains '='")
    } else if key.contains('\0') {
        Some("key contains a NUL byte")
    } else if value.contains('\0') {
        Some("value contains a NUL byte")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(DispatchError::ExportEnv {
            key: key.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
