use crate::log_debug;
use crossbeam_channel::{SendTimeoutError, Sender};
use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::osc::respond_to_terminal_queries;

/// How long the reader sleeps in poll(2) before re-checking its stop flag.
const READER_POLL_MS: libc::c_int = 50;
const READ_BUFFER_BYTES: usize = 4096;
/// Longest single wait for room in a full input queue before the peer is rechecked.
const WRITE_POLL_SLICE: Duration = Duration::from_millis(20);

pub(super) fn should_retry_read_error(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock
}

/// A hung-up master reports EIO on Linux once every subordinate descriptor is closed.
pub(super) fn is_end_of_stream(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EIO)
}

enum Readiness {
    Readable,
    Timeout,
    Failed(io::Error),
}

fn wait_readable(fd: RawFd) -> Readiness {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: pollfd is a single valid struct on the stack; nfds matches.
    let ready = unsafe { libc::poll(&mut pollfd, 1, READER_POLL_MS) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Readiness::Timeout;
        }
        return Readiness::Failed(err);
    }
    if ready == 0 {
        return Readiness::Timeout;
    }
    // POLLHUP/POLLERR still go through read() so buffered bytes are not lost.
    Readiness::Readable
}

/// Continuously read from the PTY master and forward chunks until end-of-stream,
/// a hard read error, or `stop` is raised. Dropping `tx` on exit signals `Closed`.
pub(super) fn spawn_reader_thread(
    master_fd: RawFd,
    tx: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = [0u8; READ_BUFFER_BYTES];
        while !stop.load(Ordering::SeqCst) {
            match wait_readable(master_fd) {
                Readiness::Timeout => continue,
                Readiness::Failed(err) => {
                    log_debug(&format!("PTY poll error: {err}"));
                    break;
                }
                Readiness::Readable => {}
            }
            // SAFETY: buffer is a valid writable region of the advertised length.
            let n = unsafe {
                libc::read(
                    master_fd,
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };
            if n > 0 {
                let mut data = buffer.get(..n as usize).unwrap_or(&[]).to_vec();
                respond_to_terminal_queries(&mut data, master_fd);
                if data.is_empty() {
                    continue;
                }
                if !forward_chunk(&tx, data, &stop) {
                    break;
                }
                continue;
            }
            if n == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if should_retry_read_error(&err) {
                continue;
            }
            if !is_end_of_stream(&err) {
                log_debug(&format!("PTY read error: {err}"));
            }
            break;
        }
    })
}

/// Block on a full channel without ignoring the stop flag. Returns false once forwarding
/// should end.
fn forward_chunk(tx: &Sender<Vec<u8>>, mut data: Vec<u8>, stop: &AtomicBool) -> bool {
    loop {
        match tx.send_timeout(data, Duration::from_millis(READER_POLL_MS as u64)) {
            Ok(()) => return true,
            Err(SendTimeoutError::Disconnected(_)) => return false,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                data = back;
            }
        }
    }
}

/// Why a bounded write gave up before the whole buffer was accepted.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The program stopped reading and its input queue stayed full until the deadline.
    #[error("PTY input still full after {waited:?} ({pending} bytes unwritten)")]
    Stalled { waited: Duration, pending: usize },
    /// The program exited while its input queue was full; nothing will drain it.
    #[error("PTY reader exited with {pending} bytes unwritten")]
    PeerGone { pending: usize },
    #[error("write to PTY failed: {0}")]
    Io(#[from] io::Error),
}

/// Write the entire buffer to the PTY master. While the input queue is full, wait for room
/// in short poll(2) slices, giving up at `deadline` or once `peer_alive` reports the
/// reading side gone.
pub(super) fn write_all(
    fd: RawFd,
    mut data: &[u8],
    deadline: Instant,
    peer_alive: &dyn Fn() -> bool,
) -> Result<(), WriteError> {
    let started = Instant::now();
    while !data.is_empty() {
        // SAFETY: data points to a live slice of the given length.
        let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if written > 0 {
            data = data.get(written as usize..).unwrap_or(&[]);
            continue;
        }
        if written == 0 {
            return Err(io::Error::new(ErrorKind::WriteZero, "write returned 0").into());
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            ErrorKind::Interrupted => continue,
            ErrorKind::WouldBlock => {}
            _ => return Err(err.into()),
        }
        if !peer_alive() {
            return Err(WriteError::PeerGone {
                pending: data.len(),
            });
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(WriteError::Stalled {
                waited: now.duration_since(started),
                pending: data.len(),
            });
        }
        wait_writable(fd, WRITE_POLL_SLICE.min(deadline - now));
    }
    Ok(())
}

fn wait_writable(fd: RawFd, slice: Duration) {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let timeout_ms = slice.as_millis().clamp(1, WRITE_POLL_SLICE.as_millis()) as libc::c_int;
    // SAFETY: pollfd is a single valid struct on the stack; nfds matches.
    let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    // A hangup is reported as ready without room; sit out the slice instead of spinning.
    if ready > 0 && pollfd.revents & libc::POLLOUT == 0 {
        thread::sleep(slice);
    }
}
