//! External command execution behind a trait.
//!
//! `systemctl`, `fail2ban-client` and `ufw` are all driven through
//! [`CommandExecutor`] so probes and backends can be unit tested with
//! `MockCommandExecutor` instead of touching the host.

use anyhow::{Context, Result};
use std::process::{Command, Stdio};

#[cfg(test)]
use mockall::automock;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Trimmed first line of stdout (e.g. the unit state from `systemctl is-active`).
    pub fn first_line(&self) -> &str {
        self.stdout.lines().next().unwrap_or("").trim()
    }

    /// Best available failure description for logs and apply errors.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        let detail = if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        };
        match self.code {
            Some(code) => format!("exit code {}: {}", code, detail),
            None => format!("terminated by signal: {}", detail),
        }
    }
}

/// Runs external programs. Implemented by [`RealCommandExecutor`] in production.
///
/// Arguments are owned strings because mockall cannot express `&[&str]`
/// lifetimes in expectations.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args` and capture its output.
    ///
    /// Returns `Err` only when the program could not be started at all;
    /// a non-zero exit is reported through [`CommandOutput::code`].
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealCommandExecutor;

impl RealCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Failed to execute {}", program))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }
}

/// Run a command and return stdout, failing on a non-zero exit.
pub fn run_checked(executor: &dyn CommandExecutor, program: &str, args: &[&str]) -> Result<String> {
    let output = executor.run(program, &args_to_strings(args))?;
    if output.success() {
        Ok(output.stdout)
    } else {
        anyhow::bail!("{} {} failed ({})", program, args.join(" "), output.failure_message())
    }
}

pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
pub(crate) fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        code: Some(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_strings() {
        let args = args_to_strings(&["is-active", "nginx"]);
        assert_eq!(args, vec!["is-active", "nginx"]);
        assert!(args_to_strings(&[]).is_empty());
    }

    #[test]
    fn test_command_output_default_is_failure() {
        let out = CommandOutput::default();
        assert!(!out.success());
        assert_eq!(out.first_line(), "");
    }

    #[test]
    fn test_first_line() {
        let out = output(0, "active\nextra\n", "");
        assert_eq!(out.first_line(), "active");
    }

    #[test]
    fn test_failure_message_prefers_stderr() {
        let out = output(1, "ignored", "ERROR: bad rule\n");
        assert_eq!(out.failure_message(), "exit code 1: ERROR: bad rule");

        let out = output(3, "inactive\n", "");
        assert_eq!(out.failure_message(), "exit code 3: inactive");

        let out = CommandOutput {
            code: None,
            ..Default::default()
        };
        assert!(out.failure_message().starts_with("terminated by signal"));
    }

    #[test]
    fn test_real_executor_echo() {
        let out = RealCommandExecutor::new()
            .run("echo", &args_to_strings(&["-n", "pong"]))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "pong");
    }

    #[test]
    fn test_real_executor_missing_program() {
        let result = RealCommandExecutor::new().run("/nonexistent/jailsync-test-binary", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_checked_with_mock() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .withf(|program, args| program == "ufw" && args == ["show".to_string(), "added".to_string()])
            .times(1)
            .returning(|_, _| Ok(output(0, "Added user rules\n", "")));

        let stdout = run_checked(&mock, "ufw", &["show", "added"]).unwrap();
        assert_eq!(stdout, "Added user rules\n");
    }

    #[test]
    fn test_run_checked_failure() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .returning(|_, _| Ok(output(1, "", "ERROR: Could not find rule")));

        let err = run_checked(&mock, "ufw", &["delete", "allow"]).unwrap_err();
        assert!(err.to_string().contains("Could not find rule"));
    }
}
