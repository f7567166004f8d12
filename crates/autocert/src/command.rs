//! External process invocation
//!
//! Web-server and scheduler control shells out to host tools (`nginx`,
//! `systemctl`, `crontab`, `schtasks`, ...). Every such call goes through
//! [`CommandRunner`] so the callers can be exercised against a fake.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, trace};

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exited with status 0
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful result with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given stderr
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

/// Runs host programs
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, optionally feeding `stdin`, and wait for it
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`], not
    /// as an error. `Err` means the process could not be started at all.
    fn run(&self, program: &str, args: &[&str], stdin: Option<&str>) -> io::Result<CommandOutput>;

    /// Whether `program` can be found on the search path
    fn exists(&self, program: &str) -> bool;
}

/// [`CommandRunner`] backed by `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str], stdin: Option<&str>) -> io::Result<CommandOutput> {
        debug!(program = %program, args = ?args, "Running command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn()?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes())?;
            }
        }

        let output = child.wait_with_output()?;
        let result = CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        trace!(
            program = %program,
            success = result.success,
            status = ?output.status.code(),
            "Command finished"
        );

        Ok(result)
    }

    fn exists(&self, program: &str) -> bool {
        find_in_path(program).is_some()
    }
}

/// Locate `program` on `PATH`
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        executable_names(program)
            .into_iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    })
}

#[cfg(windows)]
fn executable_names(program: &str) -> Vec<String> {
    if Path::new(program).extension().is_some() {
        return vec![program.to_string()];
    }
    ["exe", "cmd", "bat", "com"]
        .iter()
        .map(|ext| format!("{}.{}", program, ext))
        .collect()
}

#[cfg(not(windows))]
fn executable_names(program: &str) -> Vec<String> {
    vec![program.to_string()]
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            success: false,
            stdout: "line one\n".to_string(),
            stderr: "nginx: [emerg] unexpected \"}\"\n".to_string(),
        };
        assert_eq!(
            output.combined(),
            "line one\nnginx: [emerg] unexpected \"}\""
        );
        assert_eq!(CommandOutput::failed("boom").combined(), "boom");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemCommandRunner;
        let output = runner.run("sh", &["-c", "echo out; echo err >&2"], None).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_feeds_stdin() {
        let runner = SystemCommandRunner;
        let output = runner.run("cat", &[], Some("hello\n")).unwrap();
        assert_eq!(output.stdout, "hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_reports_failure() {
        let runner = SystemCommandRunner;
        let output = runner.run("sh", &["-c", "exit 3"], None).unwrap();
        assert!(!output.success);
    }

    #[test]
    fn test_missing_program() {
        let runner = SystemCommandRunner;
        assert!(!runner.exists("definitely-not-a-real-program-autocert"));
        assert!(runner
            .run("definitely-not-a-real-program-autocert", &[], None)
            .is_err());
    }
}
