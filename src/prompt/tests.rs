use super::*;
use crate::pty_session::PtyRead;
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// Hands out scripted chunks one per read, then behaves like a silent (or closed) terminal.
struct ScriptedOutput {
    chunks: VecDeque<Vec<u8>>,
    closed_when_empty: bool,
    alive: bool,
}

impl ScriptedOutput {
    fn new(chunks: &[&[u8]]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            closed_when_empty: false,
            alive: true,
        }
    }

    fn closing(mut self) -> Self {
        self.closed_when_empty = true;
        self
    }

    fn dead(mut self) -> Self {
        self.alive = false;
        self
    }
}

impl OutputSource for ScriptedOutput {
    fn read_output(&mut self, timeout: Duration) -> PtyRead {
        if let Some(chunk) = self.chunks.pop_front() {
            return PtyRead::Data(chunk);
        }
        if self.closed_when_empty {
            return PtyRead::Closed;
        }
        thread::sleep(timeout);
        PtyRead::Idle
    }

    fn producer_alive(&self) -> bool {
        self.alive
    }
}

/// Never goes quiet: a fresh prompt-bearing chunk every few milliseconds.
struct RollingOutput;

impl OutputSource for RollingOutput {
    fn read_output(&mut self, timeout: Duration) -> PtyRead {
        thread::sleep(timeout.min(Duration::from_millis(5)));
        PtyRead::Data(b"tick\n  1> ".to_vec())
    }

    fn producer_alive(&self) -> bool {
        true
    }
}

fn detector(quiet_ms: u64) -> PromptDetector {
    PromptDetector::new(
        PromptPatterns::default(),
        Duration::from_millis(quiet_ms),
        1024 * 1024,
    )
}

fn classify(text: &str) -> ClassifiedOutput {
    classify_output(text, &PromptPatterns::default())
}

#[test]
fn strip_removes_escape_sequences_but_keeps_line_controls() {
    let raw = b"\x1b[1m\x1b[31mred\x1b[0m\r\n\ttab\x1b]0;title\x07\n\x1b[?2004h  1> \x07";
    assert_eq!(strip_terminal_sequences(raw), "red\r\n\ttab\n  1> ");
}

#[test]
fn terminal_text_joins_sequences_split_across_chunks() {
    let mut text = TerminalText::new();
    text.feed(b"a\x1b[3");
    let offset = text.feed(b"1mb\xc3");
    text.feed(b"\xa9");
    assert_eq!(offset, 1);
    assert_eq!(text.as_str(), "ab\u{e9}");
}

#[test]
fn terminal_text_truncates_front_on_char_boundary() {
    let mut text = TerminalText::new();
    text.feed("\u{e9}\u{e9}xyz".as_bytes());
    let dropped = text.truncate_front(4);
    assert_eq!(dropped, 4);
    assert_eq!(text.as_str(), "xyz");
    assert_eq!(text.truncate_front(10), 0);
}

#[test]
fn turn_completes_after_prompt_and_quiet_period() {
    let mut source = ScriptedOutput::new(&[b"hello\n", b"\n  2> "]);
    let turn = detector(30)
        .wait_for_turn(&mut source, Duration::from_secs(2))
        .unwrap();
    assert_eq!(turn.text, "hello\n\n  2> ");
    assert_eq!(turn.raw_bytes, 12);
    assert!(!turn.truncated);
    assert!(turn.elapsed >= Duration::from_millis(30));
}

#[test]
fn prompt_split_across_reads_is_detected() {
    let mut source = ScriptedOutput::new(&[b"out\n  1", b"2> "]);
    let turn = detector(20)
        .wait_for_turn(&mut source, Duration::from_secs(2))
        .unwrap();
    assert_eq!(turn.text, "out\n  12> ");
}

#[test]
fn prompt_at_very_start_of_output_counts() {
    let mut source = ScriptedOutput::new(&[b"  1> "]);
    let turn = detector(20)
        .wait_for_turn(&mut source, Duration::from_secs(2))
        .unwrap();
    assert_eq!(turn.text, "  1> ");
}

#[test]
fn escape_codes_between_newline_and_prompt_do_not_hide_it() {
    let mut source = ScriptedOutput::new(&[b"x\r\n\x1b[2K\x1b[1G  3> \x1b[K"]);
    let turn = detector(20)
        .wait_for_turn(&mut source, Duration::from_secs(2))
        .unwrap();
    assert_eq!(turn.text, "x\r\n  3> ");
}

#[test]
fn output_after_prompt_restarts_quiet_period() {
    let mut source = ScriptedOutput::new(&[b"\n  1> ", b"late line\n"]);
    let turn = detector(20)
        .wait_for_turn(&mut source, Duration::from_secs(2))
        .unwrap();
    assert!(turn.text.ends_with("late line\n"));
}

#[test]
fn missing_prompt_times_out() {
    let mut source = ScriptedOutput::new(&[b"still thinking\n"]);
    let started = Instant::now();
    let err = detector(20)
        .wait_for_turn(&mut source, Duration::from_millis(150))
        .unwrap_err();
    assert!(matches!(err, DetectError::Timeout { raw_bytes: 15, .. }));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn continuously_rolling_output_times_out_even_with_prompts() {
    let err = detector(50)
        .wait_for_turn(&mut RollingOutput, Duration::from_millis(200))
        .unwrap_err();
    assert!(matches!(err, DetectError::Timeout { .. }));
}

#[test]
fn closed_stream_before_prompt_is_disconnected() {
    let mut source = ScriptedOutput::new(&[b"partial"]).closing();
    let err = detector(20)
        .wait_for_turn(&mut source, Duration::from_secs(2))
        .unwrap_err();
    assert_eq!(err, DetectError::Disconnected { raw_bytes: 7 });
}

#[test]
fn dead_producer_fails_fast_without_prompt() {
    let mut source = ScriptedOutput::new(&[]).dead();
    let started = Instant::now();
    let err = detector(20)
        .wait_for_turn(&mut source, Duration::from_secs(10))
        .unwrap_err();
    assert_eq!(err, DetectError::Disconnected { raw_bytes: 0 });
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn closed_stream_after_prompt_still_returns_turn() {
    let mut source = ScriptedOutput::new(&[b"bye\n  4> "]).closing();
    let turn = detector(500)
        .wait_for_turn(&mut source, Duration::from_secs(2))
        .unwrap();
    assert_eq!(turn.text, "bye\n  4> ");
}

#[test]
fn oversized_turn_keeps_tail() {
    let big = vec![b'a'; 8192];
    let mut source = ScriptedOutput::new(&[&big, b"\n  5> "]);
    let turn = PromptDetector::new(PromptPatterns::default(), Duration::from_millis(20), 4096)
        .wait_for_turn(&mut source, Duration::from_secs(2))
        .unwrap();
    assert!(turn.truncated);
    assert_eq!(turn.text.len(), 4096);
    assert!(turn.text.ends_with("\n  5> "));
}

#[test]
fn sticky_error_mode_routes_following_lines_to_traceback() {
    let classified = classify("line1\nerror: boom\nextra context\n");
    assert_eq!(classified.stdout, vec!["line1"]);
    assert_eq!(classified.errors, vec!["boom", "extra context"]);
    assert_eq!(
        classified.into_evaluation(),
        Evaluation::Failure {
            stdout: "line1\n".to_string(),
            evalue: "boom".to_string(),
            traceback: vec!["boom".to_string(), "extra context".to_string()],
        }
    );
}

#[test]
fn prompt_and_echo_lines_are_discarded() {
    let classified = classify("3> x = 1\n  4. y = 2\nresult  5> \n42\n  6> ");
    assert_eq!(classified.stdout, vec!["42"]);
    assert!(classified.errors.is_empty());
}

#[test]
fn clean_turn_is_success_with_newline_terminated_stdout() {
    let eval = classify("a\r\n\r\n   \nb\n  2> ").into_evaluation();
    assert_eq!(
        eval,
        Evaluation::Success {
            stdout: "a\nb\n".to_string(),
            value: String::new(),
        }
    );
}

#[test]
fn error_pattern_is_case_insensitive_but_exact() {
    assert!(classify("Error: nope\n").into_evaluation().is_failure());
    assert!(classify("ERROR: nope\n").into_evaluation().is_failure());
    assert!(!classify("erorr: nope\nno errors here\n")
        .into_evaluation()
        .is_failure());
}

#[test]
fn informational_prefix_and_placeholder_are_dropped() {
    let classified = classify(
        "[User] error: use of unknown declaration 'x'\n(null)\n  note: declared here\n  2> ",
    );
    assert_eq!(
        classified.errors,
        vec!["use of unknown declaration 'x'", "note: declared here"]
    );
}

#[test]
fn marker_in_middle_of_line_is_kept_verbatim() {
    let classified = classify("main.src:3:5: error: expected ')'\n");
    assert_eq!(classified.errors, vec!["main.src:3:5: error: expected ')'"]);
}

#[test]
fn error_carried_on_prompt_line_is_recorded() {
    let classified = classify("  2> error: bad input\n  3> y = 2\ndetail\n");
    assert!(classified.stdout.is_empty());
    assert_eq!(classified.errors, vec!["bad input", "detail"]);
}

#[test]
fn custom_patterns_reject_invalid_regex() {
    let err = PromptPatterns::compile("(", r"^>", r"\s>", "err", "").unwrap_err();
    assert!(format!("{err:#}").contains("invalid prompt regex"));
    assert!(PromptPatterns::compile("", r"^>", r"\s>", "err", "").is_err());
}

#[test]
fn strip_prompt_prefix_only_applies_at_line_start() {
    let patterns = PromptPatterns::default();
    assert_eq!(patterns.strip_prompt_prefix("  7> print(1)"), "print(1)");
    assert_eq!(patterns.strip_prompt_prefix("  7. cont"), "cont");
    assert_eq!(patterns.strip_prompt_prefix("value 7> x"), "value 7> x");
}
