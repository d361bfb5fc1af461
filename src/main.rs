//! json-exec
//!
//! Executes a command and encodes what happened as JSON log records.

use anyhow::{Context, Result};
use json_exec::dispatch::Dispatcher;
use json_exec::error::{ErrorCode, SUCCESS};
use json_exec::logging::{JsonSink, install_global};
use std::process;
use std::sync::Arc;
use tracing::error;

fn main() {
    let sink = Arc::new(JsonSink::stdio());
    if let Err(e) = install_global(Arc::clone(&sink)) {
        eprintln!("json-exec: {e}");
        process::exit(ErrorCode::GeneralFailure.exit_code());
    }

    let mut dispatcher = Dispatcher::new(sink);
    let cli = match dispatcher.parse(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Help and --version are printed through the error path too.
            let code = if e.use_stderr() {
                dispatcher.exit_code()
            } else {
                SUCCESS
            };
            process::exit(code);
        }
    };

    // SAFETY: the tokio runtime is built below, so no other thread exists yet.
    if let Err(e) = unsafe { dispatcher.export_environment() } {
        error!(error = %e, "failed to export environment: {}", e);
        process::exit(dispatcher.exit_code());
    }

    let code = match execute(&mut dispatcher, &cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "{:#}", e);
            ErrorCode::GeneralFailure.exit_code()
        }
    };
    process::exit(code);
}

fn execute(dispatcher: &mut Dispatcher, cli: &json_exec::cli::Cli) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let mut stdout = std::io::stdout();
    let code = runtime.block_on(dispatcher.execute(cli, &mut stdout));
    // The config watcher runs on a blocking thread; don't wait for it.
    runtime.shutdown_background();
    Ok(code)
}
