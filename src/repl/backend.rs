use std::time::{Duration, Instant};
use thiserror::Error;

use crate::prompt::Evaluation;

/// Why a turn produced no evaluation.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The prompt never came back (or output never settled) within the turn timeout.
    #[error("evaluation did not finish within {0:?}")]
    Timeout(Duration),
    /// The interactive program is gone; the session cannot continue.
    #[error("interactive program exited: {diagnostic}")]
    ProcessExited { diagnostic: String },
    #[error("terminal I/O failed: {0:#}")]
    Io(#[from] anyhow::Error),
}

/// Submit code and get a classified result back. The PTY-driven REPL is one
/// implementation; anything that can evaluate a turn synchronously can stand in.
pub trait TurnExecutor {
    /// Run one turn. Empty code must return an empty success without touching the program.
    fn execute(&mut self, code: &str) -> Result<Evaluation, TurnError>;
    /// Ask the program to abandon whatever it is doing and settle back at its prompt.
    fn interrupt(&mut self) -> Result<(), TurnError>;
    /// Send the quit directive and make sure the program is gone afterward.
    fn shutdown(&mut self) -> Result<(), TurnError>;
    fn is_alive(&self) -> bool;
    /// One-line description of how the program ended, if it has.
    fn exit_diagnostic(&self) -> Option<String>;
}

/// Per-turn numbers reported to the trace log.
#[derive(Debug, Clone)]
pub struct TurnStats {
    pub started_at: Instant,
    pub finished_at: Instant,
    pub code_lines: usize,
    pub drained_bytes: usize,
    pub raw_bytes: usize,
    pub stdout_lines: usize,
    pub error_lines: usize,
    pub truncated: bool,
}

impl TurnStats {
    pub(super) fn new(now: Instant, code_lines: usize) -> Self {
        Self {
            started_at: now,
            finished_at: now,
            code_lines,
            drained_bytes: 0,
            raw_bytes: 0,
            stdout_lines: 0,
            error_lines: 0,
            truncated: false,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.finished_at
            .duration_since(self.started_at)
            .as_secs_f64()
            * 1000.0
    }
}

/// Result for code that never reaches the program.
pub fn empty_evaluation() -> Evaluation {
    Evaluation::Success {
        stdout: String::new(),
        value: String::new(),
    }
}
