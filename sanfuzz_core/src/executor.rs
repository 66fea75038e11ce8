use crate::input::Input;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Reported in stderr when the target could not be started.
pub const BINARY_NOT_FOUND_MARKER: &str = "BINARY_NOT_FOUND";
/// Reported in stderr when the target exceeded its time budget and was killed.
pub const TIMEOUT_MARKER: &str = "TIMEOUT";
/// Prefix for any other harness-side failure (temp files, pipes, waiting).
pub const HARNESS_ERROR_MARKER: &str = "HARNESS_ERROR";

/// Return code used for every synthetic (harness-generated) result.
pub const SYNTHETIC_RETURN_CODE: i32 = -1;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of running the target once. Produced once per iteration and consumed
/// immediately by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    /// Process exit code. On Unix, death by signal `N` is reported as `-N`.
    /// Synthetic results use [`SYNTHETIC_RETURN_CODE`].
    pub return_code: i32,
    /// Captured standard output, decoded lossily.
    pub stdout: String,
    /// Captured standard error, decoded lossily.
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Result for a target that could not be started (missing or not executable).
    pub fn binary_not_found() -> Self {
        Self {
            return_code: SYNTHETIC_RETURN_CODE,
            stdout: String::new(),
            stderr: BINARY_NOT_FOUND_MARKER.to_string(),
            timed_out: false,
        }
    }

    /// Result for a target killed after exceeding its time budget.
    pub fn timeout() -> Self {
        Self {
            return_code: SYNTHETIC_RETURN_CODE,
            stdout: String::new(),
            stderr: TIMEOUT_MARKER.to_string(),
            timed_out: true,
        }
    }

    /// Result for any other harness-side failure; `detail` follows the marker in stderr.
    pub fn harness_error(detail: impl std::fmt::Display) -> Self {
        Self {
            return_code: SYNTHETIC_RETURN_CODE,
            stdout: String::new(),
            stderr: format!("{HARNESS_ERROR_MARKER}: {detail}"),
            timed_out: false,
        }
    }

    /// Returns `true` if this is the synthetic "binary not found" result.
    pub fn is_binary_not_found(&self) -> bool {
        self.return_code == SYNTHETIC_RETURN_CODE && self.stderr == BINARY_NOT_FOUND_MARKER
    }
}

/// An `Executor` runs the target against one input and reports what happened.
///
/// Executors never fail: every problem (missing binary, timeout, pipe errors) is
/// folded into the returned [`ExecutionResult`], so a campaign loop has no error
/// path that could end it early. One call is one verdict; there are no retries.
pub trait Executor<I: Input> {
    /// Runs the target once with `input`.
    ///
    /// # Returns
    /// The exit code and captured output, or a synthetic result describing why
    /// the target did not produce one.
    fn execute(&mut self, input: &I) -> ExecutionResult;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InputDelivery {
    /// Feed the input on the target's standard input.
    #[default]
    StdIn,
    /// Write the input to a temporary file and substitute its path for `{}` in
    /// the template, which is appended to the command line (split on whitespace).
    File(String),
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    /// Extra environment for the spawned target only, e.g. sanitizer options.
    pub envs: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandExecutorConfig {
    /// Runs `binary` with no arguments, input on stdin, and an inherited environment.
    pub fn for_binary(binary: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            command: vec![binary.as_ref().to_string_lossy().into_owned()],
            input_delivery: InputDelivery::StdIn,
            timeout,
            envs: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Adds one environment variable for the target process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }
}

/// Runs the target as a subprocess under a bounded time budget.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

enum WaitError {
    TimedOut,
    Io(io::Error),
}

impl CommandExecutor {
    /// Creates an executor that runs the target described by `config`.
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    /// Polls `child` until it exits or `deadline` passes.
    fn wait_until(child: &mut Child, deadline: Instant) -> Result<ExitStatus, WaitError> {
        let mut poll_interval = MIN_POLL_INTERVAL;
        loop {
            if let Some(status) = child.try_wait().map_err(WaitError::Io)? {
                return Ok(status);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::TimedOut);
            }
            thread::sleep(poll_interval.min(deadline - now));
            poll_interval = (poll_interval * 2).min(MAX_POLL_INTERVAL);
        }
    }

    /// Polls until `done` holds or `deadline` passes. Returns whether `done` held.
    fn finished_by(deadline: Instant, mut done: impl FnMut() -> bool) -> bool {
        let mut poll_interval = MIN_POLL_INTERVAL;
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(poll_interval.min(deadline - now));
            poll_interval = (poll_interval * 2).min(MAX_POLL_INTERVAL);
        }
    }

    /// Kills the target and everything it started, then reaps the direct child.
    fn terminate(child: &mut Child) {
        kill_process_group(child);
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// The target runs as leader of its own process group, so its group id is its pid.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; a stale group id yields ESRCH.
    let ret = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if ret != 0 {
        log::trace!("killpg({pgid}) failed: {}", io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn spawn_pipe_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn collect_pipe(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Maps an exit status to a single integer, using `-signal` for signal deaths.
pub fn return_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    SYNTHETIC_RETURN_CODE
}

impl<I: Input> Executor<I> for CommandExecutor {
    fn execute(&mut self, input: &I) -> ExecutionResult {
        let Some(program) = self.config.command.first() else {
            return ExecutionResult::harness_error("empty command line");
        };

        let mut cmd = Command::new(program);
        cmd.args(&self.config.command[1..]);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd.envs(&self.config.envs);
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }

        // Kept alive until the target has finished.
        let mut temp_file_handle: Option<tempfile::NamedTempFile> = None;

        match &self.config.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let mut named_temp_file = match tempfile::NamedTempFile::new() {
                    Ok(f) => f,
                    Err(e) => {
                        return ExecutionResult::harness_error(format!(
                            "failed to create temp file: {e}"
                        ));
                    }
                };
                if let Err(e) = named_temp_file
                    .write_all(input.as_bytes())
                    .and_then(|_| named_temp_file.flush())
                {
                    return ExecutionResult::harness_error(format!(
                        "failed to write temp file {:?}: {e}",
                        named_temp_file.path()
                    ));
                }
                let path_str = named_temp_file.path().to_string_lossy().into_owned();
                for part in arg_template.replace("{}", &path_str).split_whitespace() {
                    cmd.arg(part);
                }
                cmd.stdin(Stdio::null());
                temp_file_handle = Some(named_temp_file);
            }
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let deadline = Instant::now() + self.config.timeout;
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                ) =>
            {
                log::debug!("Failed to spawn {:?}: {}", self.config.command, e);
                return ExecutionResult::binary_not_found();
            }
            Err(e) => {
                log::warn!("Failed to spawn {:?}: {}", self.config.command, e);
                return ExecutionResult::harness_error(format!("failed to spawn target: {e}"));
            }
        };

        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());
        let stdin_writer = child.stdin.take().map(|mut stdin| {
            let data = input.as_bytes().to_vec();
            thread::spawn(move || {
                // The target may exit without reading its input.
                if let Err(e) = stdin.write_all(&data) {
                    if e.kind() != io::ErrorKind::BrokenPipe {
                        log::debug!("Error writing to target stdin: {e}");
                    }
                }
            })
        });

        // One budget covers the wait, the stdin write and draining both pipes.
        let outcome = Self::wait_until(&mut child, deadline);
        let status = match outcome {
            Ok(status) => status,
            // Helper threads are left to finish on their own once the group is dead.
            Err(WaitError::TimedOut) => {
                log::debug!("Target timed out after {:?}, killing", self.config.timeout);
                Self::terminate(&mut child);
                return ExecutionResult::timeout();
            }
            Err(WaitError::Io(e)) => {
                Self::terminate(&mut child);
                return ExecutionResult::harness_error(format!("failed waiting for target: {e}"));
            }
        };

        // A background process left behind by the target can hold the pipes open.
        let drained = Self::finished_by(deadline, || {
            stdin_writer.as_ref().is_none_or(|h| h.is_finished())
                && stdout_reader.as_ref().is_none_or(|h| h.is_finished())
                && stderr_reader.as_ref().is_none_or(|h| h.is_finished())
        });
        if !drained {
            log::debug!(
                "Target exited but its pipes stayed open past {:?}, killing its process group",
                self.config.timeout
            );
            kill_process_group(&child);
            return ExecutionResult::timeout();
        }
        drop(temp_file_handle);

        if let Some(writer) = stdin_writer {
            let _ = writer.join();
        }
        ExecutionResult {
            return_code: return_code_of(&status),
            stdout: collect_pipe(stdout_reader),
            stderr: collect_pipe(stderr_reader),
            timed_out: false,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_targets {
    use std::path::PathBuf;

    pub fn script(name: &str) -> PathBuf {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let path = manifest_dir.join("../test_targets").join(name);
        assert!(path.exists(), "Test target missing: {path:?}");
        path
    }

    /// Runs a shell script through `/bin/sh` so execute permission bits do not matter.
    pub fn sh_command(name: &str) -> Vec<String> {
        vec![
            "/bin/sh".to_string(),
            script(name).to_string_lossy().into_owned(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::test_targets::sh_command;
    use super::*;

    fn executor_for(script: &str, timeout: Duration) -> CommandExecutor {
        CommandExecutor::new(CommandExecutorConfig {
            command: sh_command(script),
            input_delivery: InputDelivery::StdIn,
            timeout,
            envs: BTreeMap::new(),
            working_dir: None,
        })
    }

    #[test]
    fn cmd_exec_successful_run_captures_streams() {
        let mut executor = executor_for("test_target_ok.sh", Duration::from_secs(5));
        let result = executor.execute(&b"hello".to_vec());
        assert_eq!(result.return_code, 0);
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "ok\n");
        assert!(!result.timed_out);
    }

    #[test]
    fn cmd_exec_reports_exit_code_and_stderr() {
        let mut executor = executor_for("test_target_exit_code.sh", Duration::from_secs(5));
        let result = executor.execute(&Vec::new());
        assert_eq!(result.return_code, 3);
        assert!(result.stderr.contains("Segmentation fault"));
    }

    #[cfg(unix)]
    #[test]
    fn cmd_exec_reports_signal_as_negative_code() {
        let mut executor = executor_for("test_target_crash.sh", Duration::from_secs(5));
        let result = executor.execute(&Vec::new());
        assert_eq!(result.return_code, -11, "SIGSEGV should map to -11");
    }

    #[test]
    fn cmd_exec_timeout_returns_synthetic_result_promptly() {
        let mut executor = executor_for("test_target_timeout.sh", Duration::from_millis(200));
        let started = Instant::now();
        let result = executor.execute(&Vec::new());
        let elapsed = started.elapsed();

        assert_eq!(result, ExecutionResult::timeout());
        assert_eq!(result.return_code, -1);
        assert_eq!(result.stderr, TIMEOUT_MARKER);
        assert!(result.timed_out);
        assert!(
            elapsed < Duration::from_secs(3),
            "timeout overshoot too large: {elapsed:?}"
        );
    }

    #[test]
    fn cmd_exec_background_child_holding_pipes_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let config = CommandExecutorConfig {
            command: sh_command("test_target_background.sh"),
            input_delivery: InputDelivery::StdIn,
            timeout: Duration::from_millis(300),
            envs: BTreeMap::new(),
            working_dir: None,
        }
        .with_env("MARKER", marker.to_string_lossy());
        let mut executor = CommandExecutor::new(config);

        let started = Instant::now();
        let result = executor.execute(&b"AAAA".to_vec());
        let elapsed = started.elapsed();

        assert_eq!(result, ExecutionResult::timeout());
        assert!(
            elapsed < Duration::from_secs(3),
            "execute blocked {elapsed:?} with a 300ms timeout"
        );

        #[cfg(unix)]
        {
            thread::sleep(Duration::from_millis(1500));
            assert!(!marker.exists(), "background job outlived the timeout kill");
        }
    }

    #[test]
    fn cmd_exec_missing_binary_is_not_an_error() {
        let mut executor = CommandExecutor::new(CommandExecutorConfig::for_binary(
            "./this_binary_does_not_exist_ever_12345",
            Duration::from_secs(1),
        ));
        let result = executor.execute(&b"AAAA".to_vec());
        assert_eq!(result.return_code, -1);
        assert_eq!(result.stderr, BINARY_NOT_FOUND_MARKER);
        assert!(result.is_binary_not_found());
        assert!(!result.timed_out);
    }

    #[test]
    fn cmd_exec_empty_command_is_a_harness_error() {
        let mut executor = CommandExecutor::new(CommandExecutorConfig {
            command: Vec::new(),
            input_delivery: InputDelivery::StdIn,
            timeout: Duration::from_secs(1),
            envs: BTreeMap::new(),
            working_dir: None,
        });
        let result = executor.execute(&Vec::new());
        assert_eq!(result.return_code, -1);
        assert!(result.stderr.starts_with(HARNESS_ERROR_MARKER));
    }

    #[test]
    fn cmd_exec_passes_environment_to_target_only() {
        let config = CommandExecutorConfig {
            command: sh_command("test_target_env.sh"),
            input_delivery: InputDelivery::StdIn,
            timeout: Duration::from_secs(5),
            envs: BTreeMap::new(),
            working_dir: None,
        }
        .with_env("ASAN_OPTIONS", "detect_leaks=1:abort_on_error=1");
        let mut executor = CommandExecutor::new(config);
        let result = executor.execute(&Vec::new());
        assert_eq!(result.return_code, 0);
        assert_eq!(result.stdout.trim(), "detect_leaks=1:abort_on_error=1");
    }

    #[test]
    fn cmd_exec_input_via_file() {
        let mut executor = CommandExecutor::new(CommandExecutorConfig {
            command: sh_command("test_target_file_check.sh"),
            input_delivery: InputDelivery::File("{}".to_string()),
            timeout: Duration::from_secs(5),
            envs: BTreeMap::new(),
            working_dir: None,
        });

        let ok = executor.execute(&b"OK_FILE".to_vec());
        assert_eq!(ok.return_code, 0, "stderr: {}", ok.stderr);

        let crash = executor.execute(&b"CRASHFILE".to_vec());
        assert_eq!(crash.return_code, 1);
    }

    #[test]
    fn cmd_exec_decodes_invalid_utf8_lossily() {
        let mut executor = executor_for("test_target_ok.sh", Duration::from_secs(5));
        let result = executor.execute(&vec![0x66, 0xFF, 0x6F]);
        assert_eq!(result.return_code, 0);
        assert_eq!(result.stdout, "f\u{FFFD}o");
    }

    #[test]
    fn cmd_exec_tolerates_target_ignoring_large_input() {
        let mut executor = executor_for("test_target_exit_code.sh", Duration::from_secs(5));
        let big_input = vec![b'A'; 1 << 20];
        let result = executor.execute(&big_input);
        assert_eq!(result.return_code, 3);
    }
}
