//! Pseudo-terminal plumbing: allocation, raw-mode setup, and the master-side transport
//! that the dispatcher reads from and writes to.

mod io;
mod osc;
mod pty;


pub(crate) use pty::{close_fd, errno_error};
pub use io::WriteError;
pub use pty::{PtyPair, PtyRead, PtyTransport};
