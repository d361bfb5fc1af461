//! CLI command definitions for json-exec
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.
//!
//! Flags only override configuration when they are actually given on the
//! command line; [`Cli::overlay`] turns the given flags into the highest
//! precedence configuration layer.

pub mod run;
pub mod version;

use crate::config::set_path;
use clap::{Args, Parser, Subcommand};
use run::RunArgs;
use serde_json::{Map, Value};
use version::VersionArgs;

/// Encodes output from a command into JSON messages containing common fields
#[derive(Parser, Debug)]
#[command(
    name = "json-exec",
    author,
    version,
    about,
    long_about = "json-exec executes a command, captures its stdout and stderr, and produces two \
                  JSON log records: the first describing the command and the second containing \
                  its results."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted by every subcommand.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Path to the configuration settings file
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config_file: Option<String>,

    /// Adjust output log level: debug, info, warn, error, fatal, panic or none
    #[arg(short = 'l', long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Additional field to include in every record (repeatable)
    #[arg(
        short = 'f',
        long = "field",
        global = true,
        value_name = "KEY=VALUE",
        value_parser = parse_key_val
    )]
    pub fields: Vec<(String, String)>,

    /// Alternate name for the level field
    #[arg(long, global = true, value_name = "NAME")]
    pub level_field: Option<String>,

    /// Alternate name for the message field
    #[arg(long, global = true, value_name = "NAME")]
    pub message_field: Option<String>,

    /// Alternate name for the timestamp field
    #[arg(long, global = true, value_name = "NAME")]
    pub timestamp_field: Option<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Executes an arbitrary system command with optional flags
    Run(RunArgs),

    /// Display application version information
    Version(VersionArgs),
}

impl Cli {
    /// The configuration layer contributed by the flags that were given.
    pub fn overlay(&self) -> Value {
        let mut overlay = self.global.overlay();
        match &self.command {
            Command::Run(args) => args.apply_overlay(&mut overlay),
            Command::Version(args) => args.apply_overlay(&mut overlay),
        }
        overlay
    }

    /// Subcommand name, as typed.
    pub fn command_name(&self) -> &'static str {
        match self.command {
            Command::Run(_) => "run",
            Command::Version(_) => "version",
        }
    }
}

impl GlobalArgs {
    fn overlay(&self) -> Value {
        let mut overlay = Value::Object(Map::new());
        let text_flags = [
            ("global.log_level", &self.log_level),
            ("global.level_field_name", &self.level_field),
            ("global.message_field_name", &self.message_field),
            ("global.timestamp_field_name", &self.timestamp_field),
        ];
        for (path, value) in text_flags {
            if let Some(value) = value {
                set_path(&mut overlay, path, Value::String(value.clone()));
            }
        }
        if !self.fields.is_empty() {
            let fields = self
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            set_path(&mut overlay, "global.extra_fields", Value::Object(fields));
        }
        overlay
    }
}

/// Set a boolean flag in the overlay only when it was given.
pub(crate) fn set_flag(overlay: &mut Value, path: &str, given: bool) {
    if given {
        set_path(overlay, path, Value::Bool(true));
    }
}

/// Parse a `key=value` pair.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{s}'"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
