use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

use crate::config::BridgeConfig;
use crate::repl::{PtyRepl, TurnExecutor};
use crate::{log_debug, log_debug_content};

use super::protocol::{Request, RequestKind, Response};
use super::router::route_request;

// ============================================================================
// Session Lifecycle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Ready,
    Serving,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Serving => "serving",
            SessionState::Terminated => "terminated",
        }
    }
}

/// Why the request loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// A `shutdown` request was answered.
    Shutdown,
    /// The input channel closed.
    EndOfInput,
    /// The interactive program died; the failure was reported to the client.
    ProcessDied,
}

impl SessionExit {
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionExit::Shutdown | SessionExit::EndOfInput => 0,
            SessionExit::ProcessDied => 1,
        }
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    if *state != next {
        log_debug(&format!("session {} -> {}", state.as_str(), next.as_str()));
        *state = next;
    }
}

// ============================================================================
// Response Sending
// ============================================================================

/// Write one record and flush so the client sees it before the next request is read.
pub fn send_response<W: Write>(output: &mut W, response: &Response) -> Result<()> {
    let json = serde_json::to_string(response).context("failed to encode response")?;
    writeln!(output, "{json}").context("failed to write response")?;
    output.flush().context("failed to flush response")?;
    Ok(())
}

/// Report a startup failure on both channels. Best effort: stdout may already be gone.
pub fn emit_fatal(message: &str) {
    eprintln!("repl-bridge: {message}");
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(err) = send_response(&mut out, &Response::fatal(message)) {
        log_debug(&format!("could not emit fatal record: {err:#}"));
    }
}

// ============================================================================
// Request Loop
// ============================================================================

/// Serve requests until shutdown, end of input, or the program's death. Exactly one
/// response is written per non-blank input line.
pub fn run_session<E, R, W>(
    executor: &mut E,
    error_name: &str,
    mut input: R,
    output: &mut W,
) -> Result<SessionExit>
where
    E: TurnExecutor,
    R: BufRead,
    W: Write,
{
    let mut state = SessionState::Ready;
    let mut buf = Vec::new();

    let exit = loop {
        buf.clear();
        let read = input
            .read_until(b'\n', &mut buf)
            .context("failed to read request")?;
        if read == 0 {
            break SessionExit::EndOfInput;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        transition(&mut state, SessionState::Serving);

        let request = match Request::parse_line(line) {
            Ok(request) => request,
            Err(err) => {
                log_debug(&format!("malformed request: {err}"));
                send_response(output, &Response::protocol_error(err.id, err.message))?;
                continue;
            }
        };
        log_debug_content(&format!(
            "request {} ({}): {:?}",
            request.id,
            request.kind.as_str(),
            request.code
        ));

        if request.kind != RequestKind::Shutdown && !executor.is_alive() {
            let diagnostic = executor.exit_diagnostic();
            log_debug(&format!(
                "interactive program is gone ({}); refusing request {}",
                diagnostic.as_deref().unwrap_or("exit status unavailable"),
                request.id
            ));
            send_response(
                output,
                &Response::process_died(request.id, diagnostic.as_deref()),
            )?;
            break SessionExit::ProcessDied;
        }

        let routed = route_request(executor, &request, error_name);
        send_response(output, &routed.response)?;
        if let Some(exit) = routed.exit {
            break exit;
        }
    };

    transition(&mut state, SessionState::Terminated);
    log_debug(&format!("session ended: {exit:?}"));
    Ok(exit)
}

// ============================================================================
// Entry Point
// ============================================================================

/// Launch the configured program, announce readiness, then serve stdin/stdout.
pub fn run_ipc_mode(config: &BridgeConfig) -> Result<SessionExit> {
    let mut state = SessionState::Starting;
    log_debug(&format!("starting JSON-lines session for {:?}", config.repl_cmd));

    let mut repl = match PtyRepl::start(config) {
        Ok(repl) => repl,
        Err(err) => {
            emit_fatal(&format!("{err:#}"));
            transition(&mut state, SessionState::Terminated);
            return Err(err);
        }
    };

    let stdout = io::stdout();
    let mut output = stdout.lock();
    send_response(&mut output, &Response::ready())?;
    transition(&mut state, SessionState::Ready);
    eprintln!("repl-bridge: REPL ready");

    let stdin = io::stdin();
    let exit = run_session(&mut repl, &config.error_name, stdin.lock(), &mut output)?;
    if exit == SessionExit::EndOfInput {
        if let Err(err) = repl.shutdown() {
            log_debug(&format!("teardown after end of input: {err}"));
        }
    }
    Ok(exit)
}
