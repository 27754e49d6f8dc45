//! One-shot commands: `docker`, `git clone`, the migrate step and the
//! schema tool. Output is buffered whole and a failure carries the tail of
//! stderr, which is where those tools explain themselves.
//!
//! The long-lived service goes through [`crate::supervisor`] instead.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

/// Default timeout for one-shot commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Lines of stderr kept in [`ShellError::ExecutionFailed`].
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandInput {
    /// Added to the inherited environment.
    pub env_vars: Vec<(String, String)>,
    pub working_directory: Option<PathBuf>,
    /// The process is killed once this has passed.
    pub timeout: Duration,
}

impl Default for CommandInput {
    fn default() -> Self {
        Self {
            env_vars: Vec::new(),
            working_directory: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Program name, or the script text for [`run_shell`].
    pub program: String,
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process died by signal.
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The last non-blank lines of stderr.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .collect();
        lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n")
    }

    /// Turn a non-zero exit into [`ShellError::ExecutionFailed`].
    pub fn into_success(self) -> Result<Self, ShellError> {
        if self.success() {
            return Ok(self);
        }
        Err(ShellError::ExecutionFailed {
            stderr_tail: self.stderr_tail(),
            program: self.program,
            exit_code: self.exit_code,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("`{0}` not found; is it installed and on PATH?")]
    NotFound(String),

    #[error("`{program}` killed after running for {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("`{program}` exited with status {exit_code}: {stderr_tail}")]
    ExecutionFailed {
        program: String,
        exit_code: i32,
        stderr_tail: String,
    },

    #[error("Could not run `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run `program` with `args`.
pub async fn run_program(
    program: &str,
    args: &[&str],
    input: &CommandInput,
) -> Result<CommandOutput, ShellError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    execute(cmd, program, input).await
}

/// Run `script` through `sh -c`.
pub async fn run_shell(script: &str, input: &CommandInput) -> Result<CommandOutput, ShellError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    execute(cmd, script, input).await
}

async fn execute(
    mut cmd: Command,
    label: &str,
    input: &CommandInput,
) -> Result<CommandOutput, ShellError> {
    cmd.envs(input.env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &input.working_directory {
        cmd.current_dir(dir);
    }

    let started = Instant::now();
    let child = cmd.spawn().map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ShellError::NotFound(label.to_string()),
        _ => ShellError::Io {
            program: label.to_string(),
            source,
        },
    })?;

    // On timeout the future, and with it the child, is dropped and killed.
    let output = tokio::time::timeout(input.timeout, child.wait_with_output())
        .await
        .map_err(|_| ShellError::Timeout {
            program: label.to_string(),
            timeout: input.timeout,
        })?
        .map_err(|source| ShellError::Io {
            program: label.to_string(),
            source,
        })?;

    let output = CommandOutput {
        program: label.to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    tracing::debug!(
        program = label,
        exit_code = output.exit_code,
        duration_ms = output.duration_ms,
        "Command finished",
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            program: "git".to_string(),
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: 128,
            duration_ms: 1,
        }
    }

    #[tokio::test]
    async fn failure_keeps_stderr_tail() {
        let output = run_shell("echo hello; echo oops >&2; exit 3", &CommandInput::default())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 3);
        assert_matches!(
            output.into_success(),
            Err(ShellError::ExecutionFailed { exit_code: 3, ref stderr_tail, .. }) if stderr_tail == "oops"
        );
    }

    #[test]
    fn stderr_tail_drops_early_and_blank_lines() {
        let noisy: String = (1..=30).map(|i| format!("line {i}\n\n")).collect();
        let tail = failed(&noisy).stderr_tail();
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.starts_with("line 11"));
        assert!(tail.ends_with("line 30"));
    }

    #[test]
    fn execution_failure_names_program() {
        let err = failed("fatal: repository 'x' does not exist\n")
            .into_success()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "`git` exited with status 128: fatal: repository 'x' does not exist"
        );
    }

    #[tokio::test]
    async fn env_and_working_directory_apply() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let input = CommandInput {
            env_vars: vec![("DETEST_MARK".to_string(), "value_42".to_string())],
            working_directory: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let output = run_shell("echo $DETEST_MARK; ls", &input).await.unwrap();
        assert!(output.stdout.starts_with("value_42"));
        assert!(output.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn slow_command_is_killed() {
        let input = CommandInput {
            timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let result = run_shell("sleep 30", &input).await;
        assert_matches!(result, Err(ShellError::Timeout { ref program, .. }) if program == "sleep 30");
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let result = run_program("detest-no-such-program", &[], &CommandInput::default()).await;
        assert_matches!(result, Err(ShellError::NotFound(p)) if p == "detest-no-such-program");
    }
}
