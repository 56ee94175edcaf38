//! Wire types for the JSON-lines protocol.
//!
//! One request object per input line, one response object per output line. Every
//! response except the startup `ready` record echoes the id of the request it answers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::prompt::Evaluation;

/// Id used when a line could not be parsed far enough to recover one.
pub const DEFAULT_REQUEST_ID: i64 = 0;

// ============================================================================
// Requests (client → bridge)
// ============================================================================

/// Request exactly as it appears on the wire. Unknown or missing `type` values are
/// kept as strings so they can be answered with a protocol error instead of a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRequest {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Execute,
    Complete,
    IsComplete,
    Interrupt,
    Shutdown,
    Unknown(String),
}

impl RequestKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "execute" => RequestKind::Execute,
            "complete" => RequestKind::Complete,
            "is_complete" => RequestKind::IsComplete,
            "interrupt" => RequestKind::Interrupt,
            "shutdown" => RequestKind::Shutdown,
            other => RequestKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RequestKind::Execute => "execute",
            RequestKind::Complete => "complete",
            RequestKind::IsComplete => "is_complete",
            RequestKind::Interrupt => "interrupt",
            RequestKind::Shutdown => "shutdown",
            RequestKind::Unknown(raw) => raw,
        }
    }
}

/// A request after the id default has been applied and the kind resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: i64,
    pub kind: RequestKind,
    pub code: String,
}

impl From<RawRequest> for Request {
    fn from(raw: RawRequest) -> Self {
        Self {
            id: raw.id.unwrap_or(DEFAULT_REQUEST_ID),
            kind: RequestKind::parse(&raw.kind),
            code: raw.code.unwrap_or_default(),
        }
    }
}

/// A line that is not a usable request. `id` is the line's own id whenever it is a valid
/// integer, even if other fields are not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MalformedRequest {
    pub id: i64,
    pub message: String,
}

impl Request {
    /// Parse one input line. The id is pulled out before the typed fields are checked so a
    /// wrong-typed `type` or `code` is still answered under the caller's id.
    pub fn parse_line(line: &str) -> Result<Self, MalformedRequest> {
        let value: Value = serde_json::from_str(line).map_err(|err| MalformedRequest {
            id: DEFAULT_REQUEST_ID,
            message: err.to_string(),
        })?;
        let id = value
            .get("id")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_REQUEST_ID);
        RawRequest::deserialize(&value)
            .map(Request::from)
            .map_err(|err| MalformedRequest {
                id,
                message: err.to_string(),
            })
    }
}

// ============================================================================
// Responses (bridge → client)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
    Ready,
}

/// Flat response record. Absent fields are omitted from the JSON entirely, so each
/// constructor below decides the exact shape a client sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evalue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completeness: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    fn bare(id: Option<i64>, status: Status) -> Self {
        Self {
            id,
            status,
            stdout: None,
            stderr: None,
            value: None,
            ename: None,
            evalue: None,
            traceback: None,
            completions: None,
            completeness: None,
            indent: None,
            message: None,
        }
    }

    /// Startup record: the program showed its first prompt.
    pub fn ready() -> Self {
        Self::bare(None, Status::Ready)
    }

    /// Startup failure record, emitted once before the bridge exits.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(None, Status::Error)
        }
    }

    /// `{"id":..,"status":"ok"}` for interrupt and shutdown.
    pub fn ok(id: i64) -> Self {
        Self::bare(Some(id), Status::Ok)
    }

    pub fn from_evaluation(id: i64, evaluation: Evaluation, error_name: &str) -> Self {
        match evaluation {
            Evaluation::Success { stdout, value } => Self {
                stdout: Some(stdout),
                stderr: Some(String::new()),
                value: Some(value),
                ..Self::bare(Some(id), Status::Ok)
            },
            Evaluation::Failure {
                stdout,
                evalue,
                traceback,
            } => Self {
                stdout: Some(stdout),
                stderr: Some(String::new()),
                ..Self::error(id, error_name, evalue, traceback)
            },
        }
    }

    pub fn error(
        id: i64,
        ename: &str,
        evalue: impl Into<String>,
        traceback: Vec<String>,
    ) -> Self {
        Self {
            ename: Some(ename.to_string()),
            evalue: Some(evalue.into()),
            traceback: Some(traceback),
            ..Self::bare(Some(id), Status::Error)
        }
    }

    /// Turn timeout; no partial output is returned.
    pub fn timeout(id: i64) -> Self {
        Self {
            stdout: Some(String::new()),
            stderr: Some(String::new()),
            ..Self::error(
                id,
                "TimeoutError",
                "Expression timed out",
                vec!["Expression evaluation timed out".to_string()],
            )
        }
    }

    pub fn process_died(id: i64, diagnostic: Option<&str>) -> Self {
        let mut traceback = vec!["REPL process terminated unexpectedly".to_string()];
        if let Some(diagnostic) = diagnostic {
            traceback.push(diagnostic.to_string());
        }
        Self::error(id, "REPLError", "REPL process died", traceback)
    }

    pub fn protocol_error(id: i64, evalue: impl Into<String>) -> Self {
        Self::error(id, "ProtocolError", evalue, Vec::new())
    }

    pub fn completions(id: i64, completions: Vec<String>) -> Self {
        Self {
            completions: Some(completions),
            ..Self::bare(Some(id), Status::Ok)
        }
    }

    pub fn completeness(id: i64, complete: bool) -> Self {
        Self {
            completeness: Some(if complete { "complete" } else { "incomplete" }.to_string()),
            indent: (!complete).then(|| "    ".to_string()),
            ..Self::bare(Some(id), Status::Ok)
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}
