use std::env;

pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_TURN_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_QUIET_MS: u64 = 300;
pub const DEFAULT_DRAIN_MS: u64 = 50;
pub const DEFAULT_LINE_DELAY_MS: u64 = 5;
pub const DEFAULT_INTERRUPT_SETTLE_MS: u64 = 500;

/// Tall and wide enough that the program never pages or reflows a turn.
pub const DEFAULT_ROWS: u16 = 80;
pub const DEFAULT_COLS: u16 = 120;

pub const DEFAULT_MAX_TURN_BYTES: usize = 4 * 1024 * 1024;

/// A fresh prompt always starts on its own line: `\n  12> `.
pub const DEFAULT_PROMPT_REGEX: &str = r"\n\s*\d+>\s";
/// Prompt or continuation prefix at the start of a line: `  12> ` or `  12. `.
pub const DEFAULT_PROMPT_LINE_REGEX: &str = r"^\s*\d+[>.]\s";
/// Echoed input embedded after other text on the same line.
pub const DEFAULT_ECHO_REGEX: &str = r"\s+\d+>\s";
pub const DEFAULT_ERROR_REGEX: &str = r"(?i)error:";

pub const DEFAULT_ERROR_PREFIX: &str = "[User] ";
pub const DEFAULT_ERROR_NAME: &str = "EvalError";
pub const DEFAULT_QUIT_COMMAND: &str = ":quit";

/// Upper bounds applied during validation.
pub(super) const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1000;
pub(super) const MAX_REPL_ARGS: usize = 64;
pub(super) const MAX_REPL_ARG_BYTES: usize = 8 * 1024;
pub(super) const MIN_TURN_BYTES: usize = 4 * 1024;

pub(super) fn default_term() -> String {
    env::var("REPL_BRIDGE_TERM")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "xterm-256color".to_string())
}
