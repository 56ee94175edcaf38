//! repl-bridge entrypoint: one interactive program, one JSON-lines session on stdio.
//!
//! stdout carries protocol records only. Progress and fatal diagnostics go to stderr,
//! debug and trace logs go to files in the temp directory when enabled.

use clap::Parser;
use std::process::ExitCode;

use repl_bridge::config::BridgeConfig;
use repl_bridge::ipc::{emit_fatal, run_ipc_mode};
use repl_bridge::{init_logging, init_tracing, install_panic_hook, log_debug, log_file_path};

fn main() -> ExitCode {
    install_panic_hook();

    let mut config = match BridgeConfig::try_parse() {
        Ok(config) => config,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            emit_fatal(err.to_string().trim());
            return ExitCode::from(1);
        }
    };
    if let Err(err) = config.validate() {
        emit_fatal(&format!("invalid configuration: {err:#}"));
        return ExitCode::from(1);
    }

    init_logging(&config);
    init_tracing(&config);
    log_debug(&format!(
        "repl-bridge v{} starting (debug log: {})",
        env!("CARGO_PKG_VERSION"),
        log_file_path().display()
    ));

    match run_ipc_mode(&config) {
        Ok(exit) => {
            log_debug(&format!("exiting: {exit:?}"));
            ExitCode::from(exit.exit_code())
        }
        Err(err) => {
            log_debug(&format!("fatal: {err:#}"));
            ExitCode::from(1)
        }
    }
}
