use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};
use wait_timeout::ChildExt;

use crate::errors::{CiError, Result};

/// How output of a captured command is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// stderr is folded into stdout, in emission order.
    #[default]
    Combined,
    /// stdout and stderr are kept apart.
    Separate,
}

/// A shell command plus the policy for running it.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    command: String,
    return_output: bool,
    ignore_error: bool,
    mode: OutputMode,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            return_output: true,
            ignore_error: false,
            mode: OutputMode::Combined,
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn return_output(mut self, capture: bool) -> Self {
        self.return_output = capture;
        self
    }

    pub fn ignore_error(mut self, ignore: bool) -> Self {
        self.ignore_error = ignore;
        self
    }

    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn captures_output(&self) -> bool {
        self.return_output
    }

    pub fn ignores_error(&self) -> bool {
        self.ignore_error
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub code: i32,
    pub duration: Duration,
    /// stdout (plus stderr in `OutputMode::Combined`); empty when output is not captured.
    pub output: String,
    /// stderr in `OutputMode::Separate`.
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs shell commands. Wrappers hold an `Arc<dyn CommandRunner>` so tests can swap in a scripted one.
pub trait CommandRunner: fmt::Debug + Send + Sync {
    /// Execute the command and report its exit code; never fails on a non-zero exit.
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutput>;

    /// Execute and apply the request's error policy.
    fn run(&self, request: ExecRequest) -> Result<ExecOutput> {
        debug!("command: {}", request.command());
        let out = self.execute(&request)?;
        if out.success() || request.ignores_error() {
            return Ok(out);
        }
        error!(
            "failed with code {} and output:\n{}",
            out.code,
            out.output.trim_end()
        );
        Err(CiError::Process {
            command: request.command,
            code: out.code,
            output: out.output,
        })
    }

    /// Captured output; errors on non-zero exit.
    fn output(&self, command: &str) -> Result<String> {
        self.run(ExecRequest::new(command)).map(|o| o.output)
    }

    /// Captured output regardless of the exit code; spawn failures yield an empty string.
    fn output_ignore_error(&self, command: &str) -> String {
        self.run(ExecRequest::new(command).ignore_error(true))
            .map(|o| o.output)
            .unwrap_or_default()
    }

    /// Run with inherited stdio; errors on non-zero exit.
    fn check(&self, command: &str) -> Result<()> {
        self.run(ExecRequest::new(command).return_output(false))
            .map(|_| ())
    }

    /// Run with inherited stdio and return the exit code instead of failing.
    fn status(&self, command: &str) -> i32 {
        self.run(
            ExecRequest::new(command)
                .return_output(false)
                .ignore_error(true),
        )
        .map(|o| o.code)
        .unwrap_or(127)
    }

    fn succeeds(&self, command: &str) -> bool {
        self.status(command) == 0
    }
}

/// `sh -c` based runner with an optional default timeout.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: PathBuf,
    default_timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            default_timeout: None,
        }
    }

    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self {
            default_timeout: Some(default_timeout),
            ..Self::new()
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for ShellRunner {
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let script = if request.return_output && request.mode == OutputMode::Combined {
            format!("exec 2>&1\n{}", request.command)
        } else {
            request.command.clone()
        };
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&script);
        if let Some(ref cwd) = request.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        if request.return_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let timeout = request.timeout.or(self.default_timeout);
        #[cfg(unix)]
        if timeout.is_some() {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let started = Instant::now();
        let mut child = cmd.spawn()?;

        // Drain pipes on their own threads; a full pipe would block the child.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = match timeout {
            None => child.wait()?,
            Some(limit) => match child.wait_timeout(limit)? {
                Some(status) => status,
                None => {
                    kill_process_group(&mut child);
                    let _ = child.wait();
                    // The whole group is gone, so the pipes are closed and the readers finish.
                    let _ = join_reader(stdout_reader);
                    let _ = join_reader(stderr_reader);
                    return Err(CiError::Timeout {
                        command: request.command.clone(),
                        after: limit,
                    });
                }
            },
        };

        let output = join_reader(stdout_reader)?;
        let stderr = join_reader(stderr_reader)?;
        Ok(ExecOutput {
            code: exit_code(&status),
            duration: started.elapsed(),
            output,
            stderr,
        })
    }
}

/// SIGKILL the child's process group so grandchildren of `sh` holding the pipes die too.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    let pgid = child.id() as i32;
    if signal::kill(Pid::from_raw(-pgid), Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn join_reader(handle: Option<thread::JoinHandle<io::Result<String>>>) -> Result<String> {
    match handle {
        None => Ok(String::new()),
        Some(h) => h
            .join()
            .map_err(|_| CiError::message("output reader thread panicked"))?
            .map_err(CiError::from),
    }
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_combines_stderr() {
        let runner = ShellRunner::new();
        let out = runner.output("echo out; echo err 1>&2").expect("echo runs");
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[test]
    fn test_separate_mode_keeps_streams_apart() {
        let runner = ShellRunner::new();
        let out = runner
            .run(ExecRequest::new("echo out; echo err 1>&2").mode(OutputMode::Separate))
            .expect("echo runs");
        assert_eq!(out.output.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn test_nonzero_exit_is_process_error() {
        let runner = ShellRunner::new();
        let err = runner.output("echo nope; exit 3").unwrap_err();
        match err {
            CiError::Process { code, output, .. } => {
                assert_eq!(code, 3);
                assert!(output.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ignore_error_returns_output_and_code() {
        let runner = ShellRunner::new();
        assert_eq!(runner.output_ignore_error("echo partial; exit 1").trim(), "partial");
        assert_eq!(runner.status("exit 4"), 4);
        assert!(runner.succeeds("true"));
        assert!(!runner.succeeds("false"));
    }

    #[test]
    fn test_timeout_kills_child() {
        let runner = ShellRunner::new();
        let err = runner
            .run(ExecRequest::new("sleep 5").timeout(Duration::from_millis(100)))
            .unwrap_err();
        assert!(matches!(err, CiError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_background_grandchild() {
        let runner = ShellRunner::new();
        let started = Instant::now();
        let err = runner
            .run(ExecRequest::new("sleep 30 & sleep 30").timeout(Duration::from_millis(200)))
            .unwrap_err();
        assert!(matches!(err, CiError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
