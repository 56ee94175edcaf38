use super::defaults::{MAX_REPL_ARGS, MAX_REPL_ARG_BYTES, MAX_TIMEOUT_MS, MIN_TURN_BYTES};
use super::{BridgeConfig, LaunchSpec, TurnTimings};
use crate::prompt::PromptPatterns;
use anyhow::{anyhow, bail, Context, Result};
use std::time::Duration;
use std::{env, fs, path::Path};

impl BridgeConfig {
    /// Check CLI values and normalize paths.
    pub fn validate(&mut self) -> Result<()> {
        check_timeout("--startup-timeout-ms", self.startup_timeout_ms)?;
        check_timeout("--turn-timeout-ms", self.turn_timeout_ms)?;
        check_timeout("--quiet-ms", self.quiet_ms)?;
        if self.quiet_ms >= self.turn_timeout_ms || self.quiet_ms >= self.startup_timeout_ms {
            bail!(
                "--quiet-ms ({}) must be shorter than both --turn-timeout-ms and --startup-timeout-ms",
                self.quiet_ms
            );
        }
        if self.drain_ms > self.turn_timeout_ms {
            bail!(
                "--drain-ms ({}) cannot exceed --turn-timeout-ms ({})",
                self.drain_ms,
                self.turn_timeout_ms
            );
        }
        if self.line_delay_ms > 1_000 {
            bail!(
                "--line-delay-ms must be between 0 and 1000, got {}",
                self.line_delay_ms
            );
        }
        if self.interrupt_settle_ms > self.turn_timeout_ms {
            bail!(
                "--interrupt-settle-ms ({}) cannot exceed --turn-timeout-ms ({})",
                self.interrupt_settle_ms,
                self.turn_timeout_ms
            );
        }
        if self.rows == 0 || self.cols == 0 {
            bail!(
                "--rows and --cols must be positive, got {}x{}",
                self.rows,
                self.cols
            );
        }
        if self.max_turn_bytes < MIN_TURN_BYTES {
            bail!(
                "--max-turn-bytes must be at least {MIN_TURN_BYTES}, got {}",
                self.max_turn_bytes
            );
        }

        let quit = self.quit_command.trim_end_matches(['\r', '\n']);
        if quit.is_empty() || quit.contains(['\r', '\n']) {
            bail!("--quit-command must be a single non-empty line");
        }
        self.quit_command = quit.to_string();

        if self.error_name.trim().is_empty() {
            bail!("--error-name cannot be empty");
        }

        if self.repl_args.len() > MAX_REPL_ARGS {
            bail!(
                "--repl-arg repeated too many times (max {MAX_REPL_ARGS}, got {})",
                self.repl_args.len()
            );
        }
        let total_arg_bytes: usize = self.repl_args.iter().map(|arg| arg.len()).sum();
        if total_arg_bytes > MAX_REPL_ARG_BYTES {
            bail!("combined --repl-arg length exceeds {MAX_REPL_ARG_BYTES} bytes");
        }

        let (program, _) = split_repl_command(&self.repl_cmd);
        if program.is_empty() {
            bail!("--repl-cmd (or REPL_BRIDGE_CMD) must name the interactive program to run");
        }
        resolve_program(&program)?;

        if let Some(dir) = &self.working_dir {
            let canonical = dir
                .canonicalize()
                .with_context(|| format!("failed to canonicalize --cwd '{}'", dir.display()))?;
            if !canonical.is_dir() {
                bail!("--cwd '{}' is not a directory", canonical.display());
            }
            self.working_dir = Some(canonical);
        }

        PromptPatterns::from_config(self)?;
        Ok(())
    }

    /// Snapshot the per-operation timeouts for the detector and backend.
    pub fn turn_timings(&self) -> TurnTimings {
        TurnTimings {
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
            turn_timeout: Duration::from_millis(self.turn_timeout_ms),
            quiet_period: Duration::from_millis(self.quiet_ms),
            drain: Duration::from_millis(self.drain_ms),
            line_delay: Duration::from_millis(self.line_delay_ms),
            interrupt_settle: Duration::from_millis(self.interrupt_settle_ms),
        }
    }

    /// Resolve the program, argv and working directory used to launch the child.
    pub fn launch_spec(&self) -> Result<LaunchSpec> {
        let (program, mut args) = split_repl_command(&self.repl_cmd);
        if program.is_empty() {
            bail!("no interactive program configured");
        }
        let program = resolve_program(&program)?;
        args.extend(self.repl_args.iter().cloned());
        let working_dir = match &self.working_dir {
            Some(dir) => dir.clone(),
            None => env::current_dir().context("failed to resolve current directory")?,
        };
        Ok(LaunchSpec {
            program,
            args,
            working_dir,
            term_value: self.term_value.clone(),
            rows: self.rows,
            cols: self.cols,
        })
    }
}

fn check_timeout(flag: &str, value_ms: u64) -> Result<()> {
    if value_ms == 0 || value_ms > MAX_TIMEOUT_MS {
        bail!("{flag} must be between 1 and {MAX_TIMEOUT_MS} ms, got {value_ms}");
    }
    Ok(())
}

/// Split a command string into program + args, honoring shell quoting when possible.
pub(super) fn split_repl_command(raw: &str) -> (String, Vec<String>) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (String::new(), Vec::new());
    }
    let parts = shell_words::split(trimmed)
        .unwrap_or_else(|_| trimmed.split_whitespace().map(|s| s.to_string()).collect());
    let mut parts = parts.into_iter();
    match parts.next() {
        Some(program) => (program, parts.collect()),
        None => (String::new(), Vec::new()),
    }
}

/// Accept a bare name (looked up on PATH at exec time) or an existing executable path.
pub(super) fn resolve_program(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("--repl-cmd cannot be empty");
    }

    let path = Path::new(trimmed);
    if !(path.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR)) {
        return Ok(trimmed.to_string());
    }

    let canonical = path
        .canonicalize()
        .with_context(|| format!("failed to canonicalize --repl-cmd '{trimmed}'"))?;
    let metadata = fs::metadata(&canonical)
        .with_context(|| format!("failed to inspect --repl-cmd '{}'", canonical.display()))?;
    if !metadata.is_file() {
        bail!("--repl-cmd '{}' is not a file", canonical.display());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o111 == 0 {
            bail!(
                "--repl-cmd '{}' exists but is not executable (mode {:o})",
                canonical.display(),
                mode
            );
        }
    }
    canonical
        .to_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("--repl-cmd must be valid UTF-8"))
}
