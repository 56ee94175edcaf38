use crate::repl::{TurnError, TurnExecutor};
use crate::{log_debug, log_debug_content};

use super::protocol::{Request, RequestKind, Response};
use super::session::SessionExit;

/// What the loop does after answering one request.
#[derive(Debug)]
pub(super) struct Routed {
    pub(super) response: Response,
    pub(super) exit: Option<SessionExit>,
}

impl Routed {
    fn reply(response: Response) -> Self {
        Self {
            response,
            exit: None,
        }
    }

    fn finish(response: Response, exit: SessionExit) -> Self {
        Self {
            response,
            exit: Some(exit),
        }
    }
}

// ============================================================================
// Request Routing
// ============================================================================

pub(super) fn route_request<E: TurnExecutor>(
    executor: &mut E,
    request: &Request,
    error_name: &str,
) -> Routed {
    match &request.kind {
        RequestKind::Execute => handle_execute(executor, request.id, &request.code, error_name),
        RequestKind::Complete => Routed::reply(Response::completions(request.id, Vec::new())),
        RequestKind::IsComplete => {
            Routed::reply(Response::completeness(request.id, is_code_complete(&request.code)))
        }
        RequestKind::Interrupt => handle_interrupt(executor, request.id),
        RequestKind::Shutdown => handle_shutdown(executor, request.id),
        RequestKind::Unknown(kind) => Routed::reply(Response::protocol_error(
            request.id,
            format!("unknown request type: {kind}"),
        )),
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub(super) fn handle_execute<E: TurnExecutor>(
    executor: &mut E,
    id: i64,
    code: &str,
    error_name: &str,
) -> Routed {
    match executor.execute(code) {
        Ok(evaluation) => Routed::reply(Response::from_evaluation(id, evaluation, error_name)),
        Err(err) => turn_failure(executor, id, err),
    }
}

pub(super) fn handle_interrupt<E: TurnExecutor>(executor: &mut E, id: i64) -> Routed {
    match executor.interrupt() {
        Ok(()) => Routed::reply(Response::ok(id)),
        Err(err) => turn_failure(executor, id, err),
    }
}

/// Always answers `ok`: the client asked for the session to end and it will.
pub(super) fn handle_shutdown<E: TurnExecutor>(executor: &mut E, id: i64) -> Routed {
    if let Err(err) = executor.shutdown() {
        log_debug(&format!("shutdown incomplete: {err}"));
    }
    Routed::finish(Response::ok(id), SessionExit::Shutdown)
}

fn turn_failure<E: TurnExecutor>(executor: &E, id: i64, err: TurnError) -> Routed {
    match err {
        TurnError::Timeout(waited) => {
            log_debug(&format!("request {id} timed out after {waited:?}"));
            Routed::reply(Response::timeout(id))
        }
        TurnError::ProcessExited { diagnostic } => {
            log_debug(&format!("request {id}: interactive program exited ({diagnostic})"));
            Routed::finish(
                Response::process_died(id, Some(&diagnostic)),
                SessionExit::ProcessDied,
            )
        }
        TurnError::Io(err) if !executor.is_alive() => {
            log_debug_content(&format!("request {id}: I/O failure after exit: {err:#}"));
            let diagnostic = executor.exit_diagnostic();
            Routed::finish(
                Response::process_died(id, diagnostic.as_deref()),
                SessionExit::ProcessDied,
            )
        }
        TurnError::Io(err) => {
            log_debug(&format!("request {id}: terminal I/O failed: {err:#}"));
            Routed::reply(Response::error(id, "REPLError", format!("{err:#}"), Vec::new()))
        }
    }
}

/// Code is incomplete when its last line opens a block (`:`) or continues (`\`).
pub(super) fn is_code_complete(code: &str) -> bool {
    let trimmed = code.trim();
    match trimmed.lines().last() {
        None => true,
        Some(last) => {
            let last = last.trim();
            !(last.ends_with(':') || last.ends_with('\\'))
        }
    }
}
