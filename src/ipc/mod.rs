//! JSON-lines session over stdin/stdout.
//!
//! The bridge starts the interactive program, waits for its first prompt, and then
//! answers one request per input line until it is told to stop.
//!
//! Architecture:
//! - Session loop: reads a line, parses it, checks the program is still alive, routes it
//! - Router: maps each request kind onto the turn executor and builds the response
//! - Turn executor: the PTY-driven program (or any stand-in implementing the trait)
//!
//! Protocol:
//! - Each line is a JSON object
//! - Requests (client → bridge): {"id": 1, "type": "execute", "code": "..."}
//! - Responses (bridge → client): {"id": 1, "status": "ok"|"error", ...}
//! - A single {"status": "ready"} record (no id) precedes the first response

mod protocol;
mod router;
mod session;


pub use protocol::{
    MalformedRequest, RawRequest, Request, RequestKind, Response, Status, DEFAULT_REQUEST_ID,
};
pub use session::{
    emit_fatal, run_ipc_mode, run_session, send_response, SessionExit, SessionState,
};
