//! Pseudo-terminal allocation and the master-side transport.
//!
//! The pair is opened with a fixed window size and the subordinate side is put into raw mode
//! before the child ever sees it, so the program never echoes our input back and never
//! translates line endings.

use crate::log_debug;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::io::{spawn_reader_thread, write_all, WriteError};

/// Chunks buffered between the reader thread and the dispatcher.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Freshly opened master/subordinate descriptors. Whatever is still owned on drop gets closed.
#[derive(Debug)]
pub struct PtyPair {
    master_fd: RawFd,
    slave_fd: RawFd,
}

impl PtyPair {
    /// Allocate a pseudo-terminal with the given window size.
    pub fn open(rows: u16, cols: u16) -> Result<Self> {
        let mut master_fd: RawFd = -1;
        let mut slave_fd: RawFd = -1;
        // SAFETY: libc::winsize is a plain C struct; zeroed is a valid baseline.
        let mut winsize: libc::winsize = unsafe { mem::zeroed() };
        winsize.ws_row = rows.max(1);
        winsize.ws_col = cols.max(1);

        #[allow(clippy::unnecessary_mut_passed)]
        // SAFETY: openpty expects valid pointers for master/slave/winsize; we pass stack locals.
        let result = unsafe {
            libc::openpty(
                &mut master_fd,
                &mut slave_fd,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut winsize,
            )
        };
        if result != 0 {
            return Err(errno_error("openpty failed"));
        }
        let pair = Self {
            master_fd,
            slave_fd,
        };
        // Keep both ends out of unrelated children; dup2 onto stdio clears the flag again.
        // SAFETY: both descriptors were just returned by openpty and are owned by `pair`.
        unsafe {
            set_cloexec(pair.master_fd)?;
            set_cloexec(pair.slave_fd)?;
        }
        Ok(pair)
    }

    pub fn master_fd(&self) -> RawFd {
        self.master_fd
    }

    pub fn slave_fd(&self) -> RawFd {
        self.slave_fd
    }

    /// Put the subordinate side into raw mode: no echo, no canonical editing,
    /// no CR/NL translation in either direction, byte-at-a-time reads.
    pub fn configure_raw(&self) -> Result<()> {
        if self.slave_fd < 0 {
            return Err(anyhow!("subordinate side already released"));
        }
        // SAFETY: termios is a plain C struct; tcgetattr fills it before we read any field.
        let mut attrs: libc::termios = unsafe { mem::zeroed() };
        if unsafe { libc::tcgetattr(self.slave_fd, &mut attrs) } != 0 {
            return Err(errno_error("tcgetattr failed"));
        }
        apply_raw_mode(&mut attrs);
        // SAFETY: attrs was populated by tcgetattr and only had flag bits cleared.
        if unsafe { libc::tcsetattr(self.slave_fd, libc::TCSANOW, &attrs) } != 0 {
            return Err(errno_error("tcsetattr failed"));
        }
        Ok(())
    }

    /// Close the subordinate descriptor in the parent once the child holds its own copy.
    pub fn release_slave(&mut self) {
        // SAFETY: slave_fd is owned by this pair and is reset so it is closed at most once.
        unsafe { close_fd(self.slave_fd) };
        self.slave_fd = -1;
    }

    /// Hand the master descriptor to its long-lived owner.
    pub fn take_master(&mut self) -> RawFd {
        mem::replace(&mut self.master_fd, -1)
    }
}

impl Drop for PtyPair {
    fn drop(&mut self) {
        // SAFETY: both descriptors are owned by this pair; -1 marks ones already handed off.
        unsafe {
            close_fd(self.master_fd);
            close_fd(self.slave_fd);
        }
    }
}

pub(super) fn apply_raw_mode(attrs: &mut libc::termios) {
    attrs.c_lflag &= !(libc::ECHO | libc::ECHOE | libc::ECHOK | libc::ECHONL | libc::ICANON);
    attrs.c_iflag &= !(libc::ICRNL | libc::INLCR | libc::IGNCR);
    attrs.c_oflag &= !libc::OPOST;
    attrs.c_cc[libc::VMIN] = 1;
    attrs.c_cc[libc::VTIME] = 0;
}

/// Outcome of a bounded wait for child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyRead {
    /// Every chunk that was available when the wait ended, concatenated.
    Data(Vec<u8>),
    /// Nothing arrived before the timeout.
    Idle,
    /// The reader hit end-of-stream; no more output will ever arrive.
    Closed,
}

/// Master side of the pseudo-terminal: byte writes plus a channel of output chunks
/// fed by a background reader that also answers terminal capability queries.
pub struct PtyTransport {
    master_fd: RawFd,
    output_rx: Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl PtyTransport {
    /// Take ownership of the master descriptor and start the reader thread.
    pub fn new(master_fd: RawFd) -> Result<Self> {
        if master_fd < 0 {
            return Err(anyhow!("invalid PTY master descriptor"));
        }
        // SAFETY: master_fd is a valid open descriptor handed over by the caller.
        if let Err(err) = unsafe { set_nonblocking(master_fd) } {
            // SAFETY: we own master_fd from this point on.
            unsafe { close_fd(master_fd) };
            return Err(err);
        }
        let (tx, rx) = bounded(OUTPUT_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader_thread(master_fd, tx, Arc::clone(&stop));
        Ok(Self {
            master_fd,
            output_rx: rx,
            stop,
            reader: Some(reader),
        })
    }

    /// Write raw bytes, waiting for room in the program's input queue until `deadline`.
    /// `peer_alive` is consulted while the queue is full so a dead program fails fast.
    pub fn send_bytes(
        &self,
        bytes: &[u8],
        deadline: Instant,
        peer_alive: &dyn Fn() -> bool,
    ) -> Result<(), WriteError> {
        write_all(self.master_fd, bytes, deadline, peer_alive)
    }

    /// Write one line of text followed by a single newline.
    pub fn send_line(
        &self,
        line: &str,
        deadline: Instant,
        peer_alive: &dyn Fn() -> bool,
    ) -> Result<(), WriteError> {
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        write_all(self.master_fd, &framed, deadline, peer_alive)
    }

    /// Wait up to `timeout` for output, then sweep up anything else already queued.
    pub fn read(&self, timeout: Duration) -> PtyRead {
        match self.output_rx.recv_timeout(timeout) {
            Ok(mut data) => {
                while let Ok(more) = self.output_rx.try_recv() {
                    data.extend_from_slice(&more);
                }
                PtyRead::Data(data)
            }
            Err(RecvTimeoutError::Timeout) => PtyRead::Idle,
            Err(RecvTimeoutError::Disconnected) => PtyRead::Closed,
        }
    }

    /// Discard output until `window` passes with nothing new. Returns the bytes dropped.
    pub fn drain(&self, window: Duration) -> usize {
        let mut dropped = 0;
        loop {
            match self.read(window) {
                PtyRead::Data(data) => dropped += data.len(),
                PtyRead::Idle | PtyRead::Closed => return dropped,
            }
        }
    }

    /// Discard everything produced during a fixed interval.
    pub fn discard_for(&self, interval: Duration) -> usize {
        let deadline = Instant::now() + interval;
        let mut dropped = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return dropped;
            }
            match self.read(deadline - now) {
                PtyRead::Data(data) => dropped += data.len(),
                PtyRead::Idle => return dropped,
                PtyRead::Closed => {
                    thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    return dropped;
                }
            }
        }
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                log_debug("PTY reader thread panicked");
            }
        }
        // SAFETY: the reader has stopped touching master_fd; we own it and close it once.
        unsafe { close_fd(self.master_fd) };
    }
}

/// Configure a descriptor for non-blocking reads.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor.
pub(super) unsafe fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = libc::fcntl(fd, libc::F_GETFL, 0);
    if flags < 0 {
        return Err(errno_error("fcntl(F_GETFL) failed"));
    }
    if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
        return Err(errno_error("fcntl(F_SETFL) failed"));
    }
    Ok(())
}

/// Mark a descriptor close-on-exec.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor.
pub(crate) unsafe fn set_cloexec(fd: RawFd) -> Result<()> {
    let flags = libc::fcntl(fd, libc::F_GETFD, 0);
    if flags < 0 {
        return Err(errno_error("fcntl(F_GETFD) failed"));
    }
    if libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
        return Err(errno_error("fcntl(F_SETFD) failed"));
    }
    Ok(())
}

/// Helper that formats OS errors with additional context.
pub(crate) fn errno_error(context: &str) -> anyhow::Error {
    anyhow!("{context}: {}", io::Error::last_os_error())
}

/// Close a file descriptor while ignoring errors.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor (or -1 to ignore).
pub(crate) unsafe fn close_fd(fd: RawFd) {
    if fd >= 0 {
        let _ = libc::close(fd);
    }
}
