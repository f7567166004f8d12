//! systemd timer and crontab backends

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{daily_time, run_checked, SchedulerError, Task, TaskScheduler, RENEW_ARGS};
use crate::command::CommandRunner;

/// Directory for system-wide unit files
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Substring identifying our timers in `systemctl list-timers`
const TIMER_FILTER: &str = "autocert";

/// Name reported for crontab lines without a tag
const UNTAGGED_CRON_NAME: &str = "cron-task";

/// `crontab -l` stderr for a user with no table yet
const NO_CRONTAB: &str = "no crontab for";

// ============================================================================
// systemd
// ============================================================================

/// Renewal task as a `<name>.service` + `<name>.timer` pair
pub struct SystemdScheduler {
    runner: Arc<dyn CommandRunner>,
    unit_dir: PathBuf,
}

impl SystemdScheduler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            unit_dir: PathBuf::from(DEFAULT_UNIT_DIR),
        }
    }

    /// Write units somewhere other than `/etc/systemd/system`
    pub fn with_unit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.unit_dir = dir.into();
        self
    }

    fn service_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.service", name))
    }

    fn timer_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.timer", name))
    }

    fn systemctl(&self, action: &'static str, args: &[&str]) -> Result<String, SchedulerError> {
        run_checked(self.runner.as_ref(), action, "systemctl", args, None)
    }
}

/// Render the oneshot service that runs one renewal pass
pub fn render_service(name: &str, command: &str) -> String {
    format!(
        r#"[Unit]
Description={} - AutoCert Certificate Renewal
After=network.target

[Service]
Type=oneshot
ExecStart={} {}
User=root
"#,
        name, command, RENEW_ARGS
    )
}

/// Render the timer that triggers `<name>.service`
pub fn render_timer(name: &str, schedule: &str) -> String {
    format!(
        r#"[Unit]
Description={} Timer - AutoCert Certificate Renewal
Requires={}.service

[Timer]
OnCalendar={}
RandomizedDelaySec=3600
Persistent=true

[Install]
WantedBy=timers.target
"#,
        name,
        name,
        on_calendar(schedule)
    )
}

/// Translate a cron expression into a systemd `OnCalendar` expression
pub fn on_calendar(schedule: &str) -> String {
    match daily_time(schedule) {
        Some((hour, minute)) => format!("*-*-* {:02}:{:02}:00", hour, minute),
        None => "daily".to_string(),
    }
}

fn write_unit(path: &Path, content: &str) -> Result<(), SchedulerError> {
    fs::write(path, content).map_err(|e| SchedulerError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))
            .map_err(|e| SchedulerError::io(path, e))?;
    }

    debug!(path = %path.display(), "Wrote systemd unit");
    Ok(())
}

/// Parse `systemctl list-timers --all --no-pager` rows that mention our timers
///
/// Columns are separated by runs of two or more spaces; the unit name is the
/// token ending in `.timer`.
fn parse_list_timers(output: &str) -> Vec<Task> {
    output
        .lines()
        .filter(|line| line.contains(TIMER_FILTER))
        .filter_map(|line| {
            let unit = line
                .split_whitespace()
                .find(|token| token.ends_with(".timer"))?;

            let columns: Vec<&str> = line
                .split("  ")
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect();

            let column = |i: usize| -> String {
                if columns.len() >= 5 {
                    columns[i].to_string()
                } else {
                    String::new()
                }
            };

            Some(Task {
                name: unit.trim_end_matches(".timer").to_string(),
                command: String::new(),
                schedule: String::new(),
                status: "enabled".to_string(),
                last_run: column(2),
                next_run: column(0),
            })
        })
        .collect()
}

impl TaskScheduler for SystemdScheduler {
    fn backend(&self) -> &'static str {
        "systemd"
    }

    fn install(&self, name: &str, command: &str, schedule: &str) -> Result<(), SchedulerError> {
        info!(task = %name, schedule = %schedule, "Installing systemd timer");

        write_unit(&self.service_path(name), &render_service(name, command))?;
        write_unit(&self.timer_path(name), &render_timer(name, schedule))?;

        let timer = format!("{}.timer", name);
        self.systemctl("systemd daemon-reload", &["daemon-reload"])?;
        self.systemctl("enabling timer", &["enable", &timer])?;
        self.systemctl("starting timer", &["start", &timer])?;

        info!(task = %name, "systemd timer installed");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        info!(task = %name, "Removing systemd timer");

        let timer = format!("{}.timer", name);
        for action in ["stop", "disable"] {
            if let Err(e) = self.systemctl("timer shutdown", &[action, &timer]) {
                debug!(task = %name, action = action, error = %e, "Ignoring systemctl failure");
            }
        }

        for path in [self.service_path(name), self.timer_path(name)] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed systemd unit"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SchedulerError::io(path, e)),
            }
        }

        if let Err(e) = self.systemctl("systemd daemon-reload", &["daemon-reload"]) {
            warn!(error = %e, "daemon-reload after removal failed");
        }

        info!(task = %name, "systemd timer removed");
        Ok(())
    }

    fn list(&self) -> Result<Vec<Task>, SchedulerError> {
        let output = self.systemctl(
            "listing systemd timers",
            &["list-timers", "--all", "--no-pager"],
        )?;
        Ok(parse_list_timers(&output))
    }

    fn is_installed(&self, name: &str) -> bool {
        let timer = format!("{}.timer", name);
        self.systemctl("timer query", &["is-enabled", &timer]).is_ok()
    }
}

// ============================================================================
// crontab
// ============================================================================

/// Renewal task as a crontab line tagged `# <name>`
pub struct CronScheduler {
    runner: Arc<dyn CommandRunner>,
}

impl CronScheduler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Current crontab; only a user without one has an empty table
    ///
    /// Any other `crontab -l` failure is an error, since writing back an
    /// empty table would drop every existing entry.
    fn current(&self) -> Result<String, SchedulerError> {
        let output = self
            .runner
            .run("crontab", &["-l"], None)
            .map_err(|source| SchedulerError::Command {
                program: "crontab".to_string(),
                source,
            })?;

        if output.success {
            return Ok(output.stdout);
        }

        let detail = output.combined();
        if detail.contains(NO_CRONTAB) {
            debug!("No existing crontab");
            return Ok(String::new());
        }

        Err(SchedulerError::Failed {
            action: "crontab read",
            message: detail.trim().to_string(),
        })
    }

    fn write(&self, table: &str) -> Result<(), SchedulerError> {
        run_checked(
            self.runner.as_ref(),
            "crontab update",
            "crontab",
            &["-"],
            Some(table),
        )
        .map(|_| ())
    }
}

/// Trailing `# name` tag of a crontab line
fn cron_tag(line: &str) -> Option<&str> {
    line.rsplit_once(" # ").map(|(_, tag)| tag.trim())
}

/// Table with every line tagged `name` removed
fn without_task(table: &str, name: &str) -> Vec<String> {
    table
        .lines()
        .filter(|line| cron_tag(line) != Some(name))
        .map(str::to_string)
        .collect()
}

fn join_table(lines: &[String]) -> String {
    let mut table = lines.join("\n");
    if !table.is_empty() {
        table.push('\n');
    }
    table
}

/// Crontab entry for the renewal task
pub fn cron_line(name: &str, command: &str, schedule: &str) -> String {
    format!("{} {} {} # {}", schedule, command, RENEW_ARGS, name)
}

fn parse_crontab(table: &str) -> Vec<Task> {
    table
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (body, name) = match line.rsplit_once(" # ") {
                Some((body, tag)) => (body, tag.trim().to_string()),
                None => (line, UNTAGGED_CRON_NAME.to_string()),
            };

            let fields: Vec<&str> = body.split_whitespace().collect();
            if fields.len() < 6 {
                return None;
            }

            Some(Task {
                name,
                command: fields[5..].join(" "),
                schedule: fields[..5].join(" "),
                status: "enabled".to_string(),
                last_run: String::new(),
                next_run: String::new(),
            })
        })
        .collect()
}

impl TaskScheduler for CronScheduler {
    fn backend(&self) -> &'static str {
        "cron"
    }

    fn install(&self, name: &str, command: &str, schedule: &str) -> Result<(), SchedulerError> {
        info!(task = %name, schedule = %schedule, "Installing cron job");

        let mut lines = without_task(&self.current()?, name);
        lines.push(cron_line(name, command, schedule));
        self.write(&join_table(&lines))?;

        info!(task = %name, "cron job installed");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        info!(task = %name, "Removing cron job");

        let lines = without_task(&self.current()?, name);
        self.write(&join_table(&lines))?;

        info!(task = %name, "cron job removed");
        Ok(())
    }

    fn list(&self) -> Result<Vec<Task>, SchedulerError> {
        Ok(parse_crontab(&self.current()?))
    }

    fn is_installed(&self, name: &str) -> bool {
        self.current()
            .map(|table| table.lines().any(|line| cron_tag(line) == Some(name)))
            .unwrap_or(false)
    }
}
