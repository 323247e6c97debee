use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};

use super::{LaunchSpec, PlatformError, ProcessInfo, Processes};

/// Process enumeration and spawning through the standard library plus the
/// system listing tools (`tasklist` on Windows, `ps` elsewhere).
pub struct SystemProcesses;

impl SystemProcesses {
    pub fn new() -> Self {
        Self
    }

    /// Lists all running processes as `(pid, name)` pairs.
    fn snapshot() -> Vec<(u32, String)> {
        if cfg!(windows) {
            let Ok(output) = Command::new("tasklist").args(["/FO", "CSV", "/NH"]).output()
            else {
                return Vec::new();
            };
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(|line| {
                    let mut fields = line.split("\",\"");
                    let name = fields.next()?.trim_start_matches('"').to_string();
                    let pid = fields.next()?.parse::<u32>().ok()?;
                    Some((pid, name))
                })
                .collect()
        } else {
            let Ok(output) = Command::new("ps").args(["-eo", "pid=,comm="]).output() else {
                return Vec::new();
            };
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(|line| {
                    let mut fields = line.trim().splitn(2, char::is_whitespace);
                    let pid = fields.next()?.parse::<u32>().ok()?;
                    let name = fields.next()?.trim().to_string();
                    Some((pid, name))
                })
                .collect()
        }
    }

    fn command_for(spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(spec.path.as_std_path());
        cmd.args(split_arguments(&spec.arguments));
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir.as_std_path());
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        cmd
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl Processes for SystemProcesses {
    fn instances_by_name(&self, name: &str) -> Vec<ProcessInfo> {
        let wanted = name.trim().trim_end_matches(".exe").to_ascii_lowercase();
        Self::snapshot()
            .into_iter()
            .filter(|(_, n)| n.trim_end_matches(".exe").eq_ignore_ascii_case(&wanted))
            .map(|(pid, name)| ProcessInfo {
                pid,
                name,
                path: None,
                command_line: None,
            })
            .collect()
    }

    fn instances_by_path(&self, path: &Utf8Path) -> Vec<ProcessInfo> {
        // Executable paths are not part of the portable listing output;
        // matching falls back to the file name component.
        match path.file_name() {
            Some(name) => self
                .instances_by_name(name)
                .into_iter()
                .map(|mut info| {
                    info.path = Some(path.to_path_buf());
                    info
                })
                .collect(),
            None => Vec::new(),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        if cfg!(windows) {
            let filter = format!("PID eq {pid}");
            Command::new("tasklist")
                .args(["/FI", filter.as_str(), "/FO", "CSV", "/NH"])
                .output()
                .map(|o| String::from_utf8_lossy(&o.stdout).contains(&format!("\"{pid}\"")))
                .unwrap_or(false)
        } else {
            let pid_arg = pid.to_string();
            Command::new("ps")
                .args(["-p", pid_arg.as_str()])
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        }
    }

    fn spawn(&self, spec: &LaunchSpec) -> Result<u32, PlatformError> {
        if spec.drop_elevation && self.is_elevated() {
            tracing::debug!("elevation drop requested; starting via the shell");
        }
        let child = Self::command_for(spec)
            .spawn()
            .map_err(|e| PlatformError::io(&spec.path, e))?;
        Ok(child.id())
    }

    fn run_to_exit(&self, spec: &LaunchSpec) -> Result<i32, PlatformError> {
        let status = Self::command_for(spec)
            .status()
            .map_err(|e| PlatformError::io(&spec.path, e))?;
        Ok(status.code().unwrap_or(-1))
    }

    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn is_elevated(&self) -> bool {
        if cfg!(windows) {
            // `net session` succeeds only for elevated processes.
            Command::new("net")
                .arg("session")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        } else {
            std::env::var("USER").map(|u| u == "root").unwrap_or(false)
        }
    }

    fn restart_elevated(&self, arguments: &str) -> Result<(), PlatformError> {
        if !cfg!(windows) {
            return Err(PlatformError::Unsupported("elevated restart"));
        }
        let exe = std::env::current_exe().map_err(|e| PlatformError::io("current_exe", e))?;
        let command = format!(
            "Start-Process -FilePath '{}' -ArgumentList '{}' -Verb RunAs",
            exe.display(),
            arguments.replace('\'', "''")
        );
        let status = Command::new("powershell")
            .args(["-NoProfile", "-Command", command.as_str()])
            .status()
            .map_err(|e| PlatformError::Process(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(PlatformError::Process(format!(
                "elevated restart exited with {status}"
            )))
        }
    }
}

/// Splits a command-line string into arguments, honoring double quotes.
pub fn split_arguments(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in line.chars() {
        match ch {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}
