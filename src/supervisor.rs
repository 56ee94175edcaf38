//! Launches the interactive program on the subordinate side of a pseudo-terminal and tracks
//! whether it is still running.
//!
//! A detached watcher thread blocks in `waitpid` for the child; when it returns, the watcher
//! records a one-line exit diagnostic and flips the shared liveness flag to false. The flag
//! never flips back, so any thread may poll it without coordination.

use crate::config::LaunchSpec;
use crate::lock_or_recover;
use crate::log_debug;
use crate::pty_session::{close_fd, errno_error, PtyPair};
use anyhow::{Context, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const LIVENESS_POLL: Duration = Duration::from_millis(10);
/// Grace given to each step of the teardown ladder (quit directive, SIGTERM, SIGKILL).
pub const TEARDOWN_STEP: Duration = Duration::from_millis(500);

/// Shared view of the child's state, written once by the watcher thread.
#[derive(Debug)]
pub struct Liveness {
    alive: AtomicBool,
    diagnostic: Mutex<Option<String>>,
}

impl Liveness {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            diagnostic: Mutex::new(None),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// One-line description of how the child ended, once it has.
    pub fn diagnostic(&self) -> Option<String> {
        lock_or_recover(&self.diagnostic, "liveness diagnostic").clone()
    }

    fn mark_exited(&self, diagnostic: String) {
        *lock_or_recover(&self.diagnostic, "liveness diagnostic") = Some(diagnostic);
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Poll until the child is gone or `timeout` elapses. Returns true if it is gone.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(LIVENESS_POLL.min(deadline - now));
        }
    }
}

/// Render a raw wait status the way a shell would describe it.
pub fn describe_wait_status(status: libc::c_int) -> String {
    if libc::WIFEXITED(status) {
        format!("exited with status {}", libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        format!("killed by signal {}", libc::WTERMSIG(status))
    } else {
        format!("ended with wait status {status:#x}")
    }
}

/// Handle to the launched interactive program.
pub struct ReplProcess {
    pid: libc::pid_t,
    liveness: Arc<Liveness>,
}

impl ReplProcess {
    /// Fork, attach the child to the subordinate side as its controlling terminal, and exec
    /// the program. The parent's copy of the subordinate descriptor is released on success.
    pub fn launch(pair: &mut PtyPair, spec: &LaunchSpec) -> Result<Self> {
        let prepared = PreparedExec::new(spec)?;
        let slave_fd = pair.slave_fd();
        let master_fd = pair.master_fd();

        // SAFETY: fork is called with every allocation for the child done up front.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(errno_error("fork failed"));
        }
        if pid == 0 {
            // SAFETY: we are in the freshly forked child; child_exec never returns.
            unsafe { child_exec(slave_fd, master_fd, &prepared) };
        }

        pair.release_slave();
        let liveness = Arc::new(Liveness::new());
        spawn_watcher(pid, Arc::clone(&liveness));
        log_debug(&format!(
            "launched {} (pid {pid}, {} args)",
            spec.program,
            spec.args.len()
        ));
        Ok(Self { pid, liveness })
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn exit_diagnostic(&self) -> Option<String> {
        self.liveness.diagnostic()
    }

    pub fn liveness(&self) -> Arc<Liveness> {
        Arc::clone(&self.liveness)
    }

    /// Deliver a signal to the child if it is still running.
    pub fn signal(&self, signal: libc::c_int) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        // SAFETY: pid is the child we forked; the watcher has not reaped it yet.
        if unsafe { libc::kill(self.pid, signal) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(err).with_context(|| format!("kill({}, {signal}) failed", self.pid));
        }
        Ok(())
    }

    /// Escalate from an already-sent quit directive to SIGTERM and then SIGKILL, waiting
    /// `step` between each. Returns true once the child is confirmed gone.
    pub fn terminate(&self, step: Duration) -> bool {
        if self.liveness.wait_for_exit(step) {
            return true;
        }
        self.kill_ladder(step)
    }

    fn kill_ladder(&self, step: Duration) -> bool {
        for signal in [libc::SIGTERM, libc::SIGKILL] {
            if let Err(err) = self.signal(signal) {
                log_debug(&format!("{err:#}"));
            }
            if self.liveness.wait_for_exit(step) {
                return true;
            }
        }
        log_debug(&format!("pid {} still running after SIGKILL", self.pid));
        false
    }
}

impl Drop for ReplProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            // No quit directive at this point: go straight to signals.
            let _ = self.kill_ladder(TEARDOWN_STEP);
        }
    }
}

fn spawn_watcher(pid: libc::pid_t, liveness: Arc<Liveness>) {
    thread::spawn(move || {
        let mut status: libc::c_int = 0;
        loop {
            // SAFETY: pid is our child; this thread is its only reaper.
            let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
            if ret == pid {
                let diagnostic = describe_wait_status(status);
                log_debug(&format!("pid {pid} {diagnostic}"));
                liveness.mark_exited(diagnostic);
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            liveness.mark_exited(format!("wait failed: {err}"));
            return;
        }
    });
}

/// Everything the child needs, allocated before fork so the child only makes raw libc calls.
struct PreparedExec {
    argv: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    working_dir: CString,
    term_key: CString,
    term_value: CString,
}

impl PreparedExec {
    fn new(spec: &LaunchSpec) -> Result<Self> {
        let mut argv = Vec::with_capacity(spec.args.len() + 1);
        argv.push(
            CString::new(spec.program.as_str())
                .with_context(|| format!("program contains NUL byte: {}", spec.program))?,
        );
        for arg in &spec.args {
            argv.push(
                CString::new(arg.as_str())
                    .with_context(|| format!("argument contains NUL byte: {arg}"))?,
            );
        }
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
        argv_ptrs.push(ptr::null());

        let dir = spec.working_dir.to_string_lossy();
        let working_dir = CString::new(dir.as_bytes())
            .with_context(|| format!("working directory contains NUL byte: {dir}"))?;
        let term_value = CString::new(spec.term_value.as_str())
            .with_context(|| format!("TERM contains NUL byte: {}", spec.term_value))?;
        let term_key = CString::new("TERM").context("TERM key")?;
        Ok(Self {
            argv,
            argv_ptrs,
            working_dir,
            term_key,
            term_value,
        })
    }
}

/// Child process setup after fork: claims the terminal and execs the program.
///
/// # Safety
///
/// Must only be called in the child process after `fork()`. Never returns: it either
/// replaces the process image or calls `_exit(127)`.
unsafe fn child_exec(slave_fd: RawFd, master_fd: RawFd, prepared: &PreparedExec) -> ! {
    close_fd(master_fd);
    if libc::setsid() == -1 {
        fail(b"repl-bridge: setsid failed\n");
    }
    if libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) == -1 {
        fail(b"repl-bridge: TIOCSCTTY failed\n");
    }
    if libc::dup2(slave_fd, libc::STDIN_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDOUT_FILENO) < 0
        || libc::dup2(slave_fd, libc::STDERR_FILENO) < 0
    {
        fail(b"repl-bridge: dup2 failed\n");
    }
    if slave_fd > libc::STDERR_FILENO {
        close_fd(slave_fd);
    }
    if libc::chdir(prepared.working_dir.as_ptr()) != 0 {
        fail(b"repl-bridge: chdir failed\n");
    }
    if libc::setenv(prepared.term_key.as_ptr(), prepared.term_value.as_ptr(), 1) != 0 {
        fail(b"repl-bridge: setenv(TERM) failed\n");
    }
    libc::execvp(prepared.argv[0].as_ptr(), prepared.argv_ptrs.as_ptr());
    fail(b"repl-bridge: exec failed\n");
}

/// Report a setup failure on whatever stderr the child has and exit without unwinding.
///
/// # Safety
///
/// Only for use in the forked child; performs no allocation.
unsafe fn fail(what: &[u8]) -> ! {
    let _ = libc::write(
        libc::STDERR_FILENO,
        what.as_ptr() as *const libc::c_void,
        what.len(),
    );
    libc::_exit(127);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty_session::{PtyRead, PtyTransport};
    use std::path::PathBuf;

    fn spec_for(script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: PathBuf::from("/"),
            term_value: "xterm-256color".to_string(),
            rows: 80,
            cols: 120,
        }
    }

    fn launch(script: &str) -> (PtyTransport, ReplProcess) {
        let spec = spec_for(script);
        let mut pair = PtyPair::open(spec.rows, spec.cols).unwrap();
        pair.configure_raw().unwrap();
        let process = ReplProcess::launch(&mut pair, &spec).unwrap();
        let transport = PtyTransport::new(pair.take_master()).unwrap();
        (transport, process)
    }

    fn collect_until_closed(transport: &PtyTransport, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        while Instant::now() < deadline {
            match transport.read(Duration::from_millis(50)) {
                PtyRead::Data(data) => out.extend_from_slice(&data),
                PtyRead::Idle => {}
                PtyRead::Closed => break,
            }
        }
        out
    }

    #[test]
    fn describe_wait_status_formats_exit_and_signal() {
        // Linux encodes exit codes in the high byte and signals in the low bits.
        assert_eq!(describe_wait_status(3 << 8), "exited with status 3");
        assert_eq!(describe_wait_status(libc::SIGKILL), "killed by signal 9");
    }

    #[test]
    fn liveness_flag_only_moves_to_false() {
        let liveness = Liveness::new();
        assert!(liveness.is_alive());
        assert!(!liveness.wait_for_exit(Duration::from_millis(20)));
        liveness.mark_exited("exited with status 0".to_string());
        assert!(!liveness.is_alive());
        assert!(liveness.wait_for_exit(Duration::ZERO));
        assert_eq!(
            liveness.diagnostic().as_deref(),
            Some("exited with status 0")
        );
    }

    #[test]
    fn child_output_reaches_master_and_exit_is_observed() {
        let (transport, process) = launch("printf 'TERM=%s\\n' \"$TERM\"; exit 3");
        let output = collect_until_closed(&transport, Duration::from_secs(5));
        assert_eq!(String::from_utf8_lossy(&output), "TERM=xterm-256color\n");
        assert!(process.liveness().wait_for_exit(Duration::from_secs(5)));
        assert_eq!(
            process.exit_diagnostic().as_deref(),
            Some("exited with status 3")
        );
    }

    #[test]
    fn child_sees_configured_window_size() {
        let (transport, process) = launch("stty size");
        let output = collect_until_closed(&transport, Duration::from_secs(5));
        assert_eq!(String::from_utf8_lossy(&output).trim(), "80 120");
        assert!(process.liveness().wait_for_exit(Duration::from_secs(5)));
    }

    #[test]
    fn terminate_escalates_to_signals_for_stubborn_child() {
        let (_transport, process) = launch("trap '' TERM; while :; do sleep 1; done");
        thread::sleep(Duration::from_millis(100));
        assert!(process.is_alive());
        assert!(process.terminate(Duration::from_millis(200)));
        assert!(!process.is_alive());
        assert_eq!(
            process.exit_diagnostic().as_deref(),
            Some("killed by signal 9")
        );
    }

    #[test]
    fn missing_program_reports_exec_failure() {
        let mut spec = spec_for("");
        spec.program = "/nonexistent/repl-bridge-missing".to_string();
        spec.args.clear();
        let mut pair = PtyPair::open(24, 80).unwrap();
        pair.configure_raw().unwrap();
        let process = ReplProcess::launch(&mut pair, &spec).unwrap();
        let transport = PtyTransport::new(pair.take_master()).unwrap();
        let output = collect_until_closed(&transport, Duration::from_secs(5));
        assert!(String::from_utf8_lossy(&output).contains("exec failed"));
        assert!(process.liveness().wait_for_exit(Duration::from_secs(5)));
        assert_eq!(
            process.exit_diagnostic().as_deref(),
            Some("exited with status 127")
        );
    }
}
