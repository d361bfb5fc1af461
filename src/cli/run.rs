//! Run subcommand for json-exec
//!
//! Executes a command, captures its output, and logs one record before the
//! command starts and one describing the outcome.

use super::set_flag;
use crate::config::RunSettings;
use crate::error::{ErrorCode, SUCCESS};
use crate::logging::JsonField;
use clap::Args;
use serde_json::Value;
use std::process::{ExitStatus, Stdio};
use tracing::{Instrument, info, info_span, warn};

/// Arguments for the run subcommand
#[derive(Args, Debug)]
#[command(
    long_about = "run will execute the given system command with any flags passed to the \
                  command. Use -- before the system command when it requires its own flags."
)]
pub struct RunArgs {
    /// Ignore stdout output from the command
    #[arg(long)]
    pub ignore_stdout: bool,

    /// Ignore stderr output from the command
    #[arg(long)]
    pub ignore_stderr: bool,

    /// The command to execute, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl RunArgs {
    pub(crate) fn apply_overlay(&self, overlay: &mut Value) {
        set_flag(overlay, "run.ignore_stdout", self.ignore_stdout);
        set_flag(overlay, "run.ignore_stderr", self.ignore_stderr);
    }
}

/// What happened when the command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: i32,
    /// Why the command failed to start, or its non-zero exit status.
    pub error_message: Option<String>,
    /// Captured stdout; `None` when ignored.
    pub stdout: Option<String>,
    /// Captured stderr; `None` when ignored.
    pub stderr: Option<String>,
}

/// Run `argv` to completion and capture its output.
///
/// Ignored streams go to the null device. A command that cannot be started
/// yields the launch-failure exit code instead of an error.
pub async fn run_command(argv: &[String], settings: &RunSettings) -> RunOutcome {
    let capture = |ignored: bool| (!ignored).then(String::new);

    let Some((program, args)) = argv.split_first() else {
        return RunOutcome {
            exit_code: ErrorCode::LaunchFailure.exit_code(),
            error_message: Some("no command given".to_string()),
            stdout: capture(settings.ignore_stdout),
            stderr: capture(settings.ignore_stderr),
        };
    };

    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdout(stdio_for(settings.ignore_stdout))
        .stderr(stdio_for(settings.ignore_stderr));

    match command.output().await {
        Ok(output) => {
            let text = |ignored: bool, bytes: &[u8]| {
                (!ignored).then(|| String::from_utf8_lossy(bytes).into_owned())
            };
            RunOutcome {
                exit_code: exit_code_of(output.status),
                error_message: (!output.status.success()).then(|| describe_status(output.status)),
                stdout: text(settings.ignore_stdout, &output.stdout),
                stderr: text(settings.ignore_stderr, &output.stderr),
            }
        }
        Err(e) => RunOutcome {
            exit_code: ErrorCode::LaunchFailure.exit_code(),
            error_message: Some(format!("{program}: {e}")),
            stdout: capture(settings.ignore_stdout),
            stderr: capture(settings.ignore_stderr),
        },
    }
}

fn stdio_for(ignored: bool) -> Stdio {
    if ignored { Stdio::null() } else { Stdio::piped() }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(ErrorCode::GeneralFailure.exit_code())
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or(ErrorCode::GeneralFailure.exit_code())
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {code}"),
        None => status.to_string(),
    }
}

/// Run the command described by `args` and log the outcome. Returns the exit code.
pub async fn execute(args: &RunArgs, settings: &RunSettings) -> i32 {
    let (program, rest) = match args.command.split_first() {
        Some((program, rest)) => (program.as_str(), rest),
        None => ("", &[][..]),
    };
    let span = info_span!("run", command = %program, json.args = %JsonField(rest));

    async {
        info!("executing command: {}", args.command.join(" "));
        let outcome = run_command(&args.command, settings).await;

        if outcome.exit_code == SUCCESS {
            info!(
                exit_code = outcome.exit_code,
                stdout = outcome.stdout.as_deref(),
                stderr = outcome.stderr.as_deref(),
                "command completed successfully"
            );
        } else {
            warn!(
                exit_code = outcome.exit_code,
                error_message = outcome.error_message.as_deref(),
                stdout = outcome.stdout.as_deref(),
                stderr = outcome.stderr.as_deref(),
                "command exited with non-zero exit code {}",
                outcome.exit_code
            );
        }
        outcome.exit_code
    }
    .instrument(span)
    .await
}
