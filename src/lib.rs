pub mod app;
pub mod config;
pub mod ipc;
mod lock;
pub mod prompt;
pub mod pty_session;
pub mod repl;
pub mod supervisor;
mod telemetry;

pub use app::{
    crash_log_path, init_logging, install_panic_hook, log_debug, log_debug_content,
    log_file_path, log_panic, timings_enabled,
};
pub(crate) use lock::lock_or_recover;
pub use telemetry::{init_tracing, TURN_TARGET};
