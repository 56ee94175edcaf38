//! Turn execution: the executor seam the dispatcher talks to, and the
//! pseudo-terminal implementation behind it.

mod backend;
mod pty_backend;


pub use backend::{empty_evaluation, TurnError, TurnExecutor, TurnStats};
pub use pty_backend::PtyRepl;
