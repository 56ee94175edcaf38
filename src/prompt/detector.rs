//! Decides when a turn is over: a prompt has appeared in the de-escaped output and the
//! program has then stayed quiet for a full quiet period.

use crate::log_debug;
use crate::pty_session::PtyRead;
use std::fmt;
use std::time::{Duration, Instant};

use super::patterns::PromptPatterns;
use super::strip::TerminalText;

/// How far back into already-scanned text a new prompt search starts, so a prompt split
/// across two reads is still found.
const PROMPT_LOOKBACK_BYTES: usize = 1024;
/// Upper bound on a single wait while no prompt has been seen, so liveness is rechecked.
const PRE_PROMPT_POLL: Duration = Duration::from_millis(100);

/// Where turn output comes from. The PTY backend implements this over its transport;
/// tests implement it over scripted chunks.
pub trait OutputSource {
    /// Wait up to `timeout` for output.
    fn read_output(&mut self, timeout: Duration) -> PtyRead;
    /// Whether the producing program is still running.
    fn producer_alive(&self) -> bool;
}

/// Output of one completed turn, escape sequences already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTurn {
    pub text: String,
    pub raw_bytes: usize,
    pub truncated: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    /// No completed turn before the deadline; the output may still have been flowing.
    Timeout { waited: Duration, raw_bytes: usize },
    /// Output ended, or the program died, before any prompt appeared.
    Disconnected { raw_bytes: usize },
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectError::Timeout { waited, raw_bytes } => write!(
                f,
                "turn not complete after {waited:?} ({raw_bytes} bytes seen)"
            ),
            DetectError::Disconnected { raw_bytes } => write!(
                f,
                "output ended before a prompt appeared ({raw_bytes} bytes seen)"
            ),
        }
    }
}

impl std::error::Error for DetectError {}

#[derive(Debug, Clone)]
pub struct PromptDetector {
    patterns: PromptPatterns,
    quiet_period: Duration,
    max_turn_bytes: usize,
}

impl PromptDetector {
    pub fn new(patterns: PromptPatterns, quiet_period: Duration, max_turn_bytes: usize) -> Self {
        Self {
            patterns,
            quiet_period,
            max_turn_bytes: max_turn_bytes.max(1),
        }
    }

    pub fn patterns(&self) -> &PromptPatterns {
        &self.patterns
    }

    /// Accumulate output until a prompt has been seen and no further byte has arrived for
    /// the quiet period. The deadline always wins: output that keeps flowing past it is a
    /// timeout even if a prompt scrolled by.
    pub fn wait_for_turn<S: OutputSource>(
        &self,
        source: &mut S,
        timeout: Duration,
    ) -> Result<CompletedTurn, DetectError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut text = TerminalText::new();
        // Output starts at the beginning of a line, which a newline-anchored prompt needs.
        text.feed(b"\n");
        let mut raw_bytes = 0usize;
        let mut truncated = false;
        let mut prompt_seen = false;
        let mut last_output = started;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(DetectError::Timeout {
                    waited: now.duration_since(started),
                    raw_bytes,
                });
            }
            let remaining = deadline - now;
            let slice = if prompt_seen {
                let quiet_left = (last_output + self.quiet_period).saturating_duration_since(now);
                quiet_left.max(Duration::from_millis(1)).min(remaining)
            } else {
                PRE_PROMPT_POLL.min(remaining)
            };

            match source.read_output(slice) {
                PtyRead::Data(chunk) => {
                    last_output = Instant::now();
                    raw_bytes += chunk.len();
                    let appended_at = text.feed(&chunk);
                    if !prompt_seen {
                        prompt_seen = self.prompt_in_tail(text.as_str(), appended_at);
                    }
                    if text.truncate_front(self.max_turn_bytes) > 0 && !truncated {
                        log_debug(&format!(
                            "turn output exceeded {} bytes; keeping the tail",
                            self.max_turn_bytes
                        ));
                        truncated = true;
                    }
                }
                PtyRead::Idle => {
                    if prompt_seen && last_output.elapsed() >= self.quiet_period {
                        return Ok(finish(text, raw_bytes, truncated, started));
                    }
                    if !prompt_seen && !source.producer_alive() {
                        return Err(DetectError::Disconnected { raw_bytes });
                    }
                }
                PtyRead::Closed => {
                    if prompt_seen {
                        return Ok(finish(text, raw_bytes, truncated, started));
                    }
                    return Err(DetectError::Disconnected { raw_bytes });
                }
            }
        }
    }

    fn prompt_in_tail(&self, text: &str, appended_at: usize) -> bool {
        let mut from = appended_at.saturating_sub(PROMPT_LOOKBACK_BYTES);
        while !text.is_char_boundary(from) {
            from -= 1;
        }
        self.patterns.prompt.is_match(&text[from..])
    }
}

fn finish(text: TerminalText, raw_bytes: usize, truncated: bool, started: Instant) -> CompletedTurn {
    let mut text = text.into_string();
    if text.starts_with('\n') {
        text.remove(0);
    }
    CompletedTurn {
        text,
        raw_bytes,
        truncated,
        elapsed: started.elapsed(),
    }
}
