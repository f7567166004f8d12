//! Windows Task Scheduler backend

use std::io::Write;
use std::sync::Arc;

use quick_xml::escape::escape;
use tracing::{debug, info};

use super::{daily_time, run_checked, SchedulerError, Task, TaskScheduler, DEFAULT_DAILY_TIME, RENEW_ARGS};
use crate::command::CommandRunner;

/// Well-known SID of the LocalSystem account
const LOCAL_SYSTEM_SID: &str = "S-1-5-18";

/// Renewal task registered through `schtasks`
pub struct WindowsScheduler {
    runner: Arc<dyn CommandRunner>,
}

impl WindowsScheduler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn schtasks(&self, action: &'static str, args: &[&str]) -> Result<String, SchedulerError> {
        run_checked(self.runner.as_ref(), action, "schtasks", args, None)
    }
}

/// Task Scheduler definition for a daily renewal run
///
/// The trigger fires once a day at the schedule's hour and minute, or at
/// 02:00 when the schedule is not a simple daily cron expression.
pub fn render_task_xml(name: &str, command: &str, schedule: &str) -> String {
    let (hour, minute) = daily_time(schedule).unwrap_or(DEFAULT_DAILY_TIME);
    let today = chrono::Local::now().format("%Y-%m-%d");

    format!(
        r#"<?xml version="1.0" encoding="UTF-16"?>
<Task version="1.2" xmlns="http://schemas.microsoft.com/windows/2004/02/mit/task">
  <RegistrationInfo>
    <Date>{today}T00:00:00</Date>
    <Author>AutoCert</Author>
    <Description>{name} - AutoCert certificate renewal</Description>
  </RegistrationInfo>
  <Triggers>
    <CalendarTrigger>
      <StartBoundary>{today}T{hour:02}:{minute:02}:00</StartBoundary>
      <Enabled>true</Enabled>
      <ScheduleByDay>
        <DaysInterval>1</DaysInterval>
      </ScheduleByDay>
    </CalendarTrigger>
  </Triggers>
  <Principals>
    <Principal id="Author">
      <UserId>{sid}</UserId>
      <RunLevel>HighestAvailable</RunLevel>
    </Principal>
  </Principals>
  <Settings>
    <MultipleInstancesPolicy>IgnoreNew</MultipleInstancesPolicy>
    <DisallowStartIfOnBatteries>false</DisallowStartIfOnBatteries>
    <StopIfGoingOnBatteries>false</StopIfGoingOnBatteries>
    <AllowHardTerminate>true</AllowHardTerminate>
    <StartWhenAvailable>true</StartWhenAvailable>
    <RunOnlyIfNetworkAvailable>true</RunOnlyIfNetworkAvailable>
    <AllowStartOnDemand>true</AllowStartOnDemand>
    <Enabled>true</Enabled>
    <Hidden>false</Hidden>
    <ExecutionTimeLimit>PT1H</ExecutionTimeLimit>
    <Priority>7</Priority>
  </Settings>
  <Actions Context="Author">
    <Exec>
      <Command>{command}</Command>
      <Arguments>{args}</Arguments>
    </Exec>
  </Actions>
</Task>
"#,
        today = today,
        name = escape(name),
        hour = hour,
        minute = minute,
        sid = LOCAL_SYSTEM_SID,
        command = escape(command),
        args = RENEW_ARGS,
    )
}

/// UTF-16LE with byte order mark, matching the XML declaration
fn encode_utf16(xml: &str) -> Vec<u8> {
    std::iter::once(0xFEFF_u16)
        .chain(xml.encode_utf16())
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Split one `schtasks /fo csv` row into its quoted fields
fn csv_fields(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    inner.split("\",\"").map(str::to_string).collect()
}

/// Parse `schtasks /query /fo csv /nh`: `"TaskName","Next Run Time","Status"`
fn parse_query(output: &str) -> Vec<Task> {
    output
        .lines()
        .filter(|line| line.to_ascii_lowercase().contains("autocert"))
        .filter_map(|line| {
            let fields = csv_fields(line);
            if fields.len() < 3 {
                return None;
            }

            Some(Task {
                name: fields[0].trim_start_matches('\\').to_string(),
                command: String::new(),
                schedule: String::new(),
                status: fields[2].clone(),
                last_run: String::new(),
                next_run: fields[1].clone(),
            })
        })
        .collect()
}

impl TaskScheduler for WindowsScheduler {
    fn backend(&self) -> &'static str {
        "task-scheduler"
    }

    fn install(&self, name: &str, command: &str, schedule: &str) -> Result<(), SchedulerError> {
        info!(task = %name, "Installing Windows scheduled task");

        let xml = render_task_xml(name, command, schedule);
        let mut file = tempfile::Builder::new()
            .prefix(name)
            .suffix(".xml")
            .tempfile()
            .map_err(|e| SchedulerError::io(std::env::temp_dir(), e))?;
        let path = file.path().to_path_buf();
        file.write_all(&encode_utf16(&xml))
            .and_then(|_| file.flush())
            .map_err(|e| SchedulerError::io(&path, e))?;

        let xml_path = path.to_string_lossy().into_owned();
        debug!(path = %xml_path, "Wrote task definition");

        self.schtasks(
            "registering scheduled task",
            &["/create", "/tn", name, "/xml", &xml_path, "/f"],
        )?;

        info!(task = %name, "Windows scheduled task installed");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        info!(task = %name, "Removing Windows scheduled task");
        self.schtasks("deleting scheduled task", &["/delete", "/tn", name, "/f"])?;
        info!(task = %name, "Windows scheduled task removed");
        Ok(())
    }

    fn list(&self) -> Result<Vec<Task>, SchedulerError> {
        let output = self.schtasks("querying scheduled tasks", &["/query", "/fo", "csv", "/nh"])?;
        Ok(parse_query(&output))
    }

    fn is_installed(&self, name: &str) -> bool {
        self.schtasks("querying scheduled task", &["/query", "/tn", name])
            .is_ok()
    }
}
