//! Version subcommand for json-exec

use super::set_flag;
use crate::build_info::BuildInfo;
use crate::config::VersionSettings;
use crate::error::{ErrorCode, SUCCESS};
use clap::Args;
use serde_json::Value;
use std::io::Write;
use tracing::info;

/// Arguments for the version subcommand
#[derive(Args, Debug, Default)]
pub struct VersionArgs {
    /// Display the build number and release date
    #[arg(short, long)]
    pub verbose: bool,

    /// Print plain text instead of a JSON record
    #[arg(short, long)]
    pub plaintext: bool,
}

impl VersionArgs {
    pub(crate) fn apply_overlay(&self, overlay: &mut Value) {
        set_flag(overlay, "version.verbose", self.verbose);
        set_flag(overlay, "version.plaintext", self.plaintext);
    }
}

/// Human-readable version line.
pub fn describe(info: &BuildInfo, verbose: bool) -> String {
    let mut line = format!("{} version {}", info.command_name, info.version);
    if verbose {
        line.push_str(&format!(" build {}", info.build));
        if info.is_released() {
            line.push_str(&format!(" (Released {})", info.release_date));
        } else {
            line.push_str(" (Unreleased)");
        }
        if info.is_development {
            line.push_str(" [developer build]");
        }
    }
    line
}

/// Report the version. Plaintext goes to `out`, otherwise one info record is logged.
pub fn execute(settings: &VersionSettings, info: &BuildInfo, out: &mut dyn Write) -> i32 {
    let line = describe(info, settings.verbose);

    if settings.plaintext {
        return match writeln!(out, "{line}").and_then(|_| out.flush()) {
            Ok(()) => SUCCESS,
            Err(_) => ErrorCode::GeneralFailure.exit_code(),
        };
    }

    if settings.verbose {
        info!(
            version = info.version,
            build = info.build,
            release_date = info.release_date,
            developer_build = info.is_development,
            "{}",
            line
        );
    } else {
        info!(version = info.version, "{}", line);
    }
    SUCCESS
}
