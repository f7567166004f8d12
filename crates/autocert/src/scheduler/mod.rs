//! Periodic renewal task scheduling
//!
//! A [`TaskScheduler`] is a stateless facade over the host's native job
//! mechanism. Task records live in the host (systemd, crontab, Task
//! Scheduler); nothing is cached here.
//!
//! The backend is picked once by [`native_scheduler`]:
//!
//! - Windows: [`WindowsScheduler`] registers Task Scheduler XML via `schtasks`
//! - Linux with `systemctl`: [`SystemdScheduler`] writes a service/timer pair
//! - otherwise: [`CronScheduler`] maintains a tagged crontab line

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::command::CommandRunner;

mod linux;
mod windows;

pub use linux::{CronScheduler, SystemdScheduler, DEFAULT_UNIT_DIR};
pub use windows::WindowsScheduler;

/// Arguments every scheduled invocation runs with
pub const RENEW_ARGS: &str = "renew --all";

/// Hour and minute used when a schedule is not a simple daily expression
pub const DEFAULT_DAILY_TIME: (u32, u32) = (2, 0);

/// Errors from installing, removing or querying scheduled tasks
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Writing or removing a unit/definition file failed
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The control program could not be started
    #[error("failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The control program ran and reported failure
    #[error("{action} failed: {message}")]
    Failed {
        action: &'static str,
        message: String,
    },
}

impl SchedulerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One scheduled job as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Task {
    pub name: String,
    pub command: String,
    pub schedule: String,
    pub status: String,
    pub last_run: String,
    pub next_run: String,
}

/// The renewal job this tool installs: `<command> renew --all` on `schedule`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalTask {
    pub name: String,
    /// Path of the autocert executable
    pub command: String,
    /// Cron expression
    pub schedule: String,
}

impl RenewalTask {
    pub fn from_config(config: &autocert_config::Config, command: impl Into<String>) -> Self {
        Self {
            name: config.renewal.task_name.clone(),
            command: command.into(),
            schedule: config.renewal.schedule.clone(),
        }
    }

    /// Install or replace this task through `scheduler`
    pub fn install(&self, scheduler: &dyn TaskScheduler) -> Result<(), SchedulerError> {
        scheduler.install(&self.name, &self.command, &self.schedule)
    }
}

/// Capability set shared by every scheduler backend
pub trait TaskScheduler: Send + Sync {
    /// Short backend name for logs and `schedule status`
    fn backend(&self) -> &'static str;

    /// Create or replace the task `name` running `command renew --all`
    fn install(&self, name: &str, command: &str, schedule: &str) -> Result<(), SchedulerError>;

    fn remove(&self, name: &str) -> Result<(), SchedulerError>;

    /// Renewal tasks known to the host
    fn list(&self) -> Result<Vec<Task>, SchedulerError>;

    fn is_installed(&self, name: &str) -> bool;
}

/// Pick the scheduler backend for this host
pub fn native_scheduler(runner: Arc<dyn CommandRunner>) -> Box<dyn TaskScheduler> {
    if cfg!(windows) {
        return Box::new(WindowsScheduler::new(runner));
    }

    if runner.exists("systemctl") {
        Box::new(SystemdScheduler::new(runner))
    } else {
        Box::new(CronScheduler::new(runner))
    }
}

/// Hour and minute of a `M H * * *` cron expression
///
/// Anything more elaborate (ranges, steps, weekday filters) yields `None`.
pub fn daily_time(schedule: &str) -> Option<(u32, u32)> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    if fields.len() != 5 || fields[2..].iter().any(|f| *f != "*") {
        return None;
    }

    let minute: u32 = fields[0].parse().ok()?;
    let hour: u32 = fields[1].parse().ok()?;
    (minute < 60 && hour < 24).then_some((hour, minute))
}

/// Run a control command, turning a non-zero exit into [`SchedulerError::Failed`]
pub(crate) fn run_checked(
    runner: &dyn CommandRunner,
    action: &'static str,
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
) -> Result<String, SchedulerError> {
    let output = runner
        .run(program, args, stdin)
        .map_err(|source| SchedulerError::Command {
            program: program.to_string(),
            source,
        })?;

    if output.success {
        Ok(output.stdout)
    } else {
        Err(SchedulerError::Failed {
            action,
            message: output.combined(),
        })
    }
}
