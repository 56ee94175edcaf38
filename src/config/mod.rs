//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

use defaults::default_term;
pub use defaults::{
    DEFAULT_COLS, DEFAULT_DRAIN_MS, DEFAULT_ECHO_REGEX, DEFAULT_ERROR_NAME, DEFAULT_ERROR_PREFIX,
    DEFAULT_ERROR_REGEX, DEFAULT_INTERRUPT_SETTLE_MS, DEFAULT_LINE_DELAY_MS,
    DEFAULT_MAX_TURN_BYTES, DEFAULT_PROMPT_LINE_REGEX, DEFAULT_PROMPT_REGEX, DEFAULT_QUIET_MS,
    DEFAULT_QUIT_COMMAND, DEFAULT_ROWS, DEFAULT_STARTUP_TIMEOUT_MS,
    DEFAULT_TURN_TIMEOUT_MS,
};

/// CLI options for the bridge. Validated values keep the child launch and the detector sane.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "repl-bridge",
    about = "REPL Bridge: drive an interactive console program over a JSON-lines protocol",
    author,
    version
)]
pub struct BridgeConfig {
    /// Interactive program to run under the pseudo-terminal (may include arguments)
    #[arg(long = "repl-cmd", env = "REPL_BRIDGE_CMD", default_value = "")]
    pub repl_cmd: String,

    /// Extra arguments to pass to the interactive program (repeatable)
    #[arg(long = "repl-arg", action = ArgAction::Append, value_name = "ARG", allow_hyphen_values = true)]
    pub repl_args: Vec<String>,

    /// TERM value exported to the interactive program
    #[arg(long = "term", default_value_t = default_term())]
    pub term_value: String,

    /// Working directory for the interactive program
    #[arg(long = "cwd")]
    pub working_dir: Option<PathBuf>,

    /// Regex marking the end of a turn (searched in the de-escaped output)
    #[arg(long = "prompt-regex", default_value = DEFAULT_PROMPT_REGEX)]
    pub prompt_regex: String,

    /// Regex matching a prompt prefix at the start of an output line
    #[arg(long = "prompt-line-regex", default_value = DEFAULT_PROMPT_LINE_REGEX)]
    pub prompt_line_regex: String,

    /// Regex matching echoed input lines anywhere in an output line
    #[arg(long = "echo-regex", default_value = DEFAULT_ECHO_REGEX)]
    pub echo_regex: String,

    /// Regex that switches a turn into error mode (case-insensitive by default)
    #[arg(long = "error-regex", default_value = DEFAULT_ERROR_REGEX)]
    pub error_regex: String,

    /// Informational prefix stripped from the primary error message
    #[arg(long = "error-prefix", default_value = DEFAULT_ERROR_PREFIX, allow_hyphen_values = true)]
    pub error_prefix: String,

    /// Error name reported when the program prints an error
    #[arg(long = "error-name", default_value = DEFAULT_ERROR_NAME)]
    pub error_name: String,

    /// Textual directive that makes the program exit
    #[arg(long = "quit-command", default_value = DEFAULT_QUIT_COMMAND)]
    pub quit_command: String,

    /// Time allowed for the initial prompt to appear (milliseconds)
    #[arg(long = "startup-timeout-ms", default_value_t = DEFAULT_STARTUP_TIMEOUT_MS)]
    pub startup_timeout_ms: u64,

    /// Time allowed for a single turn to reach the next prompt (milliseconds)
    #[arg(long = "turn-timeout-ms", default_value_t = DEFAULT_TURN_TIMEOUT_MS)]
    pub turn_timeout_ms: u64,

    /// Quiet period after a prompt match before a turn counts as complete (milliseconds)
    #[arg(long = "quiet-ms", default_value_t = DEFAULT_QUIET_MS)]
    pub quiet_ms: u64,

    /// Stale-output drain before each submission (milliseconds)
    #[arg(long = "drain-ms", default_value_t = DEFAULT_DRAIN_MS)]
    pub drain_ms: u64,

    /// Pause between submitted code lines (milliseconds)
    #[arg(long = "line-delay-ms", default_value_t = DEFAULT_LINE_DELAY_MS)]
    pub line_delay_ms: u64,

    /// Output discarded after an interrupt before answering (milliseconds)
    #[arg(long = "interrupt-settle-ms", default_value_t = DEFAULT_INTERRUPT_SETTLE_MS)]
    pub interrupt_settle_ms: u64,

    /// Terminal rows reported to the interactive program
    #[arg(long = "rows", default_value_t = DEFAULT_ROWS)]
    pub rows: u16,

    /// Terminal columns reported to the interactive program
    #[arg(long = "cols", default_value_t = DEFAULT_COLS)]
    pub cols: u16,

    /// Upper bound on buffered output per turn (bytes)
    #[arg(long = "max-turn-bytes", default_value_t = DEFAULT_MAX_TURN_BYTES)]
    pub max_turn_bytes: usize,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "REPL_BRIDGE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "REPL_BRIDGE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging code and output snippets (debug log only)
    #[arg(
        long = "log-content",
        env = "REPL_BRIDGE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable per-turn timing logs
    #[arg(long)]
    pub log_timings: bool,
}

/// Timing knobs consumed by the prompt detector and the PTY backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTimings {
    pub startup_timeout: Duration,
    pub turn_timeout: Duration,
    pub quiet_period: Duration,
    pub drain: Duration,
    pub line_delay: Duration,
    pub interrupt_settle: Duration,
}

impl Default for TurnTimings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_millis(DEFAULT_STARTUP_TIMEOUT_MS),
            turn_timeout: Duration::from_millis(DEFAULT_TURN_TIMEOUT_MS),
            quiet_period: Duration::from_millis(DEFAULT_QUIET_MS),
            drain: Duration::from_millis(DEFAULT_DRAIN_MS),
            line_delay: Duration::from_millis(DEFAULT_LINE_DELAY_MS),
            interrupt_settle: Duration::from_millis(DEFAULT_INTERRUPT_SETTLE_MS),
        }
    }
}

/// Program and argv resolved from `--repl-cmd` plus any `--repl-arg` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub term_value: String,
    pub rows: u16,
    pub cols: u16,
}
