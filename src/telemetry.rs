//! Structured turn records. Each finished turn becomes one flat JSON object in a trace
//! file next to the debug log, so per-turn timings can be queried without parsing text.

use crate::config::BridgeConfig;
use crate::log_debug;
use crate::repl::TurnStats;
use std::env;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Target used for per-turn events so they can be filtered out of the JSON stream.
pub const TURN_TARGET: &str = "repl_bridge::turn";

pub(crate) fn tracing_log_path() -> PathBuf {
    env::var("REPL_BRIDGE_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("repl_bridge_trace.jsonl"))
}

/// Turn records follow the same switches as the debug log.
fn tracing_enabled(config: &BridgeConfig) -> bool {
    (config.logs || config.log_timings) && !config.no_logs
}

fn open_trace_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber that writes turn records. Never touches stdout.
pub fn init_tracing(config: &BridgeConfig) {
    if !tracing_enabled(config) {
        return;
    }
    TRACING_INIT.get_or_init(|| {
        let path = tracing_log_path();
        match open_trace_file(&path) {
            Ok(file) => install_turn_subscriber(file),
            Err(err) => log_debug(&format!(
                "turn records disabled: cannot open {}: {err}",
                path.display()
            )),
        }
    });
}

fn install_turn_subscriber(file: File) {
    // Flattened so `outcome`, `elapsed_ms` and friends sit at the top level of each line.
    let subscriber = tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_max_level(Level::INFO)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(file)
        .with_current_span(false)
        .with_span_list(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        log_debug("turn records disabled: a global tracing subscriber is already set");
    }
}

/// One structured event per finished turn. `outcome` is one of ok, error, timeout,
/// process_exited, io_error.
pub(crate) fn record_turn(stats: &TurnStats, outcome: &'static str) {
    tracing::info!(
        target: TURN_TARGET,
        outcome,
        code_lines = stats.code_lines,
        drained_bytes = stats.drained_bytes,
        raw_bytes = stats.raw_bytes,
        stdout_lines = stats.stdout_lines,
        error_lines = stats.error_lines,
        truncated = stats.truncated,
        elapsed_ms = stats.elapsed_ms(),
        "turn finished"
    );
}
