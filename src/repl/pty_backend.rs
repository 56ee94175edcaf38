//! Drives an interactive program through the pseudo-terminal, one turn at a time.

use anyhow::{anyhow, Result};
use std::thread;
use std::time::{Duration, Instant};

use super::backend::{empty_evaluation, TurnError, TurnExecutor, TurnStats};
use crate::config::{BridgeConfig, TurnTimings};
use crate::prompt::{
    classify_output, DetectError, Evaluation, OutputSource, PromptDetector, PromptPatterns,
};
use crate::pty_session::{PtyPair, PtyRead, PtyTransport, WriteError};
use crate::supervisor::{Liveness, ReplProcess, TEARDOWN_STEP};
use crate::telemetry;
use crate::{log_debug, log_debug_content};

const INTERRUPT_BYTE: u8 = 0x03;
/// How long to wait for the watcher to record an exit before reporting it as unknown.
const DIAGNOSTIC_GRACE: Duration = Duration::from_millis(500);

/// Reads turn output from the transport while consulting the child's liveness.
struct LiveOutput<'a> {
    transport: &'a PtyTransport,
    liveness: &'a Liveness,
}

impl OutputSource for LiveOutput<'_> {
    fn read_output(&mut self, timeout: Duration) -> PtyRead {
        self.transport.read(timeout)
    }

    fn producer_alive(&self) -> bool {
        self.liveness.is_alive()
    }
}

/// An interactive program running under a pseudo-terminal. Field order matters on drop:
/// the master side closes first (the program sees a hangup), then any survivor is signalled.
pub struct PtyRepl {
    transport: PtyTransport,
    process: ReplProcess,
    detector: PromptDetector,
    timings: TurnTimings,
    quit_command: String,
    log_timings: bool,
}

impl PtyRepl {
    /// Launch the configured program and wait for its first prompt.
    pub fn start(config: &BridgeConfig) -> Result<Self> {
        let spec = config.launch_spec()?;
        let patterns = PromptPatterns::from_config(config)?;
        let timings = config.turn_timings();

        let mut pair = PtyPair::open(spec.rows, spec.cols)?;
        pair.configure_raw()?;
        let process = ReplProcess::launch(&mut pair, &spec)?;
        let transport = PtyTransport::new(pair.take_master())?;

        let mut repl = Self {
            transport,
            process,
            detector: PromptDetector::new(patterns, timings.quiet_period, config.max_turn_bytes),
            timings,
            quit_command: config.quit_command.clone(),
            log_timings: crate::timings_enabled(config),
        };
        repl.await_first_prompt()?;
        Ok(repl)
    }

    fn await_first_prompt(&mut self) -> Result<()> {
        let liveness = self.process.liveness();
        let mut source = LiveOutput {
            transport: &self.transport,
            liveness: &liveness,
        };
        match self
            .detector
            .wait_for_turn(&mut source, self.timings.startup_timeout)
        {
            Ok(turn) => {
                log_debug(&format!(
                    "first prompt after {:.1}ms ({} banner bytes discarded)",
                    turn.elapsed.as_secs_f64() * 1000.0,
                    turn.raw_bytes
                ));
                log_debug_content(&format!("banner: {:?}", turn.text));
                Ok(())
            }
            Err(DetectError::Timeout { raw_bytes, .. }) => Err(anyhow!(
                "timed out after {}ms waiting for the first prompt ({raw_bytes} bytes of output)",
                self.timings.startup_timeout.as_millis()
            )),
            Err(DetectError::Disconnected { .. }) => Err(anyhow!(
                "interactive program exited before its first prompt ({})",
                self.settled_diagnostic()
            )),
        }
    }

    /// Exit diagnostic, giving the watcher a moment to reap a child that just hung up.
    fn settled_diagnostic(&self) -> String {
        self.process.liveness().wait_for_exit(DIAGNOSTIC_GRACE);
        self.process
            .exit_diagnostic()
            .unwrap_or_else(|| "exit status unavailable".to_string())
    }

    fn process_exited(&self) -> TurnError {
        TurnError::ProcessExited {
            diagnostic: self.settled_diagnostic(),
        }
    }

    fn ensure_alive(&self) -> Result<(), TurnError> {
        if self.process.is_alive() {
            Ok(())
        } else {
            Err(self.process_exited())
        }
    }

    /// A write that stalls or fails on a dead program is a process exit. A live program
    /// that stops reading its input for the whole `budget` is a timeout.
    fn write_failure(&self, err: WriteError, budget: Duration) -> TurnError {
        if !self.process.is_alive() {
            return self.process_exited();
        }
        match err {
            WriteError::Stalled { pending, .. } => {
                log_debug(&format!("input queue stayed full ({pending} bytes unwritten)"));
                TurnError::Timeout(budget)
            }
            WriteError::PeerGone { .. } => self.process_exited(),
            WriteError::Io(err) => TurnError::Io(anyhow::Error::new(err).context("write to PTY failed")),
        }
    }

    /// Submit every code line, paced, then a blank line so multi-line input is accepted.
    /// The whole submission shares one turn-timeout budget.
    fn submit(&self, code: &str) -> Result<usize, TurnError> {
        let budget = self.timings.turn_timeout;
        let deadline = Instant::now() + budget;
        let liveness = self.process.liveness();
        let peer_alive = || liveness.is_alive();
        let mut lines = 0;
        for line in code.lines() {
            if lines > 0 {
                thread::sleep(self.timings.line_delay);
            }
            self.transport
                .send_line(line, deadline, &peer_alive)
                .map_err(|err| self.write_failure(err, budget))?;
            lines += 1;
        }
        thread::sleep(self.timings.line_delay);
        self.transport
            .send_line("", deadline, &peer_alive)
            .map_err(|err| self.write_failure(err, budget))?;
        Ok(lines)
    }

    fn record_turn(&self, stats: &TurnStats, outcome: &'static str) {
        telemetry::record_turn(stats, outcome);
        if self.log_timings {
            log_debug(&format!(
                "timing|phase=turn|outcome={outcome}|code_lines={}|raw_bytes={}|total_ms={:.1}",
                stats.code_lines,
                stats.raw_bytes,
                stats.elapsed_ms()
            ));
        }
    }
}

impl TurnExecutor for PtyRepl {
    fn execute(&mut self, code: &str) -> Result<Evaluation, TurnError> {
        if code.is_empty() {
            return Ok(empty_evaluation());
        }
        self.ensure_alive()?;
        log_debug_content(&format!("execute: {code:?}"));

        let mut stats = TurnStats::new(Instant::now(), code.lines().count());
        stats.drained_bytes = self.transport.drain(self.timings.drain);
        if let Err(err) = self.submit(code) {
            stats.finished_at = Instant::now();
            let outcome = match err {
                TurnError::Timeout(_) => "timeout",
                TurnError::ProcessExited { .. } => "process_exited",
                TurnError::Io(_) => "io_error",
            };
            self.record_turn(&stats, outcome);
            return Err(err);
        }

        let liveness = self.process.liveness();
        let mut source = LiveOutput {
            transport: &self.transport,
            liveness: &liveness,
        };
        let waited = self
            .detector
            .wait_for_turn(&mut source, self.timings.turn_timeout);
        stats.finished_at = Instant::now();

        let turn = match waited {
            Ok(turn) => turn,
            Err(DetectError::Timeout { raw_bytes, .. }) => {
                stats.raw_bytes = raw_bytes;
                if !self.process.is_alive() {
                    self.record_turn(&stats, "process_exited");
                    return Err(self.process_exited());
                }
                self.record_turn(&stats, "timeout");
                return Err(TurnError::Timeout(self.timings.turn_timeout));
            }
            Err(DetectError::Disconnected { raw_bytes }) => {
                stats.raw_bytes = raw_bytes;
                self.record_turn(&stats, "process_exited");
                return Err(self.process_exited());
            }
        };

        log_debug_content(&format!("turn output: {:?}", turn.text));
        let classified = classify_output(&turn.text, self.detector.patterns());
        stats.raw_bytes = turn.raw_bytes;
        stats.truncated = turn.truncated;
        stats.stdout_lines = classified.stdout.len();
        stats.error_lines = classified.errors.len();
        let evaluation = classified.into_evaluation();
        self.record_turn(
            &stats,
            if evaluation.is_failure() { "error" } else { "ok" },
        );
        Ok(evaluation)
    }

    fn interrupt(&mut self) -> Result<(), TurnError> {
        self.ensure_alive()?;
        let budget = self.timings.interrupt_settle;
        let liveness = self.process.liveness();
        let sent = self.transport.send_bytes(
            &[INTERRUPT_BYTE],
            Instant::now() + budget,
            &|| liveness.is_alive(),
        );
        match sent {
            Ok(()) => {}
            // The 0x03 cannot get past a full input queue; deliver the signal directly.
            Err(WriteError::Stalled { .. }) if self.process.is_alive() => {
                log_debug("input queue full, sending SIGINT to the program");
                self.process
                    .signal(libc::SIGINT)
                    .map_err(TurnError::Io)?;
            }
            Err(err) => return Err(self.write_failure(err, budget)),
        }
        let dropped = self.transport.discard_for(budget);
        log_debug(&format!("interrupt settled ({dropped} bytes discarded)"));
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), TurnError> {
        if self.process.is_alive() {
            let liveness = self.process.liveness();
            if let Err(err) = self.transport.send_line(
                &self.quit_command,
                Instant::now() + TEARDOWN_STEP,
                &|| liveness.is_alive(),
            ) {
                log_debug(&format!("failed to send quit directive: {err}"));
            }
        }
        if !self.process.terminate(TEARDOWN_STEP) {
            return Err(TurnError::Io(anyhow!(
                "pid {} survived the quit directive, SIGTERM and SIGKILL",
                self.process.pid()
            )));
        }
        log_debug(&format!(
            "interactive program stopped: {}",
            self.process
                .exit_diagnostic()
                .unwrap_or_else(|| "exit status unavailable".to_string())
        ));
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    fn exit_diagnostic(&self) -> Option<String> {
        self.process.exit_diagnostic()
    }
}
