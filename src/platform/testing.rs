//! In-memory capability doubles for tests.
//!
//! [`MemoryRegistry`] is a small registry emulation that round-trips its own
//! export format and understands the script documents the redirector
//! renders. [`FakeProcesses`] is a scriptable process table. [`StaticLock`]
//! pins the election outcome. These live in the library (not behind
//! `cfg(test)`) so integration tests and dry-run tooling can share them.

use std::collections::BTreeMap;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

use super::{
    ElevatedHelper, InstanceLock, LaunchSpec, Links, PlatformError, ProcessInfo, Processes,
    RegValue, Registry, WindowControl, WindowHandle,
};
use crate::models::WindowState;

/// In-memory registry keyed by full key path. The empty value name stands
/// for a key's default value.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: Mutex<BTreeMap<String, IndexMap<String, RegValue>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one key's values, for assertions.
    pub fn values_of(&self, key: &str) -> Option<IndexMap<String, RegValue>> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    /// All key paths currently present, for assertions.
    pub fn key_paths(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    fn render_value(name: &str, value: &RegValue) -> String {
        let label = if name.is_empty() {
            "@".to_string()
        } else {
            format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
        };
        let data = match value {
            RegValue::Sz(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            RegValue::ExpandSz(s) => {
                format!("expand:\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            RegValue::Dword(n) => format!("dword:{n:08x}"),
            RegValue::MultiSz(v) => format!(
                "multi:{}",
                v.iter()
                    .map(|s| format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        };
        format!("{label}={data}")
    }

    fn parse_data(data: &str) -> Option<RegValue> {
        fn unquote(s: &str) -> String {
            s.trim_matches('"').replace("\\\"", "\"").replace("\\\\", "\\")
        }
        let data = data.trim();
        if let Some(hex) = data.strip_prefix("dword:") {
            return Some(RegValue::Dword(u32::from_str_radix(hex, 16).ok()?));
        }
        if let Some(rest) = data.strip_prefix("expand:") {
            return Some(RegValue::ExpandSz(unquote(rest)));
        }
        if let Some(rest) = data.strip_prefix("multi:") {
            let items = rest
                .split("\",\"")
                .map(unquote)
                .filter(|s| !s.is_empty())
                .collect();
            return Some(RegValue::MultiSz(items));
        }
        if data.starts_with('"') && data.ends_with('"') && data.len() >= 2 {
            return Some(RegValue::Sz(unquote(data)));
        }
        // Verbatim data from rendered override scripts.
        Some(RegValue::Sz(data.to_string()))
    }

    fn import_lines(&self, lines: &[String]) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock().unwrap();
        let mut current: Option<String> = None;
        for raw in lines {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("Windows Registry Editor") {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                let section = &line[1..line.len() - 1];
                if let Some(key) = section.strip_prefix('-') {
                    let prefix = format!("{key}\\");
                    inner.retain(|k, _| k != key && !k.starts_with(&prefix));
                    current = None;
                } else {
                    inner.entry(section.to_string()).or_default();
                    current = Some(section.to_string());
                }
                continue;
            }
            let Some(key) = &current else { continue };
            let Some((name_part, data_part)) = line.split_once('=') else {
                continue;
            };
            let name = if name_part.trim() == "@" {
                String::new()
            } else {
                name_part.trim().trim_matches('"').to_string()
            };
            if data_part.trim() == "-" {
                if let Some(values) = inner.get_mut(key) {
                    values.shift_remove(&name);
                }
                continue;
            }
            if let Some(value) = Self::parse_data(data_part) {
                inner.entry(key.clone()).or_default().insert(name, value);
            }
        }
        Ok(())
    }
}

impl Registry for MemoryRegistry {
    fn key_exists(&self, key: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        let prefix = format!("{key}\\");
        inner.contains_key(key) || inner.keys().any(|k| k.starts_with(&prefix))
    }

    fn value_exists(&self, key: &str, name: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|values| values.contains_key(name))
    }

    fn read_value(&self, key: &str, name: Option<&str>) -> Option<RegValue> {
        self.inner
            .lock()
            .unwrap()
            .get(key)?
            .get(name.unwrap_or(""))
            .cloned()
    }

    fn write_value(
        &self,
        key: &str,
        name: Option<&str>,
        value: RegValue,
    ) -> Result<(), PlatformError> {
        self.inner
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(name.unwrap_or("").to_string(), value);
        Ok(())
    }

    fn create_key(&self, key: &str) -> Result<(), PlatformError> {
        self.inner.lock().unwrap().entry(key.to_string()).or_default();
        Ok(())
    }

    fn delete_key(&self, key: &str) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock().unwrap();
        let prefix = format!("{key}\\");
        inner.retain(|k, _| k != key && !k.starts_with(&prefix));
        Ok(())
    }

    fn delete_value(&self, key: &str, name: &str) -> Result<(), PlatformError> {
        if let Some(values) = self.inner.lock().unwrap().get_mut(key) {
            values.shift_remove(name);
        }
        Ok(())
    }

    fn list_subkeys(&self, key: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let prefix = format!("{key}\\");
        let mut names: Vec<String> = inner
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('\\').next())
            .map(str::to_string)
            .collect();
        names.dedup();
        names
    }

    fn export_keys(&self, file: &Utf8Path, keys: &[String]) -> Result<(), PlatformError> {
        let inner = self.inner.lock().unwrap();
        let mut lines = vec!["Windows Registry Editor Version 5.00".to_string(), String::new()];
        for wanted in keys {
            let prefix = format!("{wanted}\\");
            for (key, values) in inner.iter() {
                if key != wanted && !key.starts_with(&prefix) {
                    continue;
                }
                lines.push(format!("[{key}]"));
                for (name, value) in values {
                    lines.push(Self::render_value(name, value));
                }
                lines.push(String::new());
            }
        }
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|e| PlatformError::io(parent, e))?;
        }
        std::fs::write(file.as_std_path(), lines.join("\n")).map_err(|e| PlatformError::io(file, e))
    }

    fn import_file(&self, file: &Utf8Path) -> Result<(), PlatformError> {
        let content =
            std::fs::read_to_string(file.as_std_path()).map_err(|e| PlatformError::io(file, e))?;
        self.import_lines(&content.lines().map(str::to_string).collect::<Vec<_>>())
    }

    fn import_script(&self, lines: &[String]) -> Result<(), PlatformError> {
        self.import_lines(lines)
    }
}

/// Scriptable process table.
#[derive(Default)]
pub struct FakeProcesses {
    inner: Mutex<FakeProcessState>,
}

#[derive(Default)]
struct FakeProcessState {
    running: Vec<ProcessInfo>,
    spawned: Vec<LaunchSpec>,
    elevated: bool,
    spawn_keeps_running: bool,
    next_pid: u32,
}

impl FakeProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a running process and returns its pid.
    pub fn add_running(&self, name: &str, path: Option<Utf8PathBuf>) -> u32 {
        let mut state = self.inner.lock().unwrap();
        state.next_pid += 1;
        let pid = 10_000 + state.next_pid;
        state.running.push(ProcessInfo {
            pid,
            name: name.to_string(),
            path,
            command_line: None,
        });
        pid
    }

    /// Simulates a process exit.
    pub fn remove(&self, pid: u32) {
        self.inner.lock().unwrap().running.retain(|p| p.pid != pid);
    }

    /// Simulates every running process exiting at once.
    pub fn clear_running(&self) {
        self.inner.lock().unwrap().running.clear();
    }

    /// Everything spawned through the capability so far.
    pub fn spawned(&self) -> Vec<LaunchSpec> {
        self.inner.lock().unwrap().spawned.clone()
    }

    pub fn set_elevated(&self, elevated: bool) {
        self.inner.lock().unwrap().elevated = elevated;
    }

    /// When set, spawned processes stay in the running table until
    /// [`Self::remove`] is called for them.
    pub fn set_spawn_keeps_running(&self, keep: bool) {
        self.inner.lock().unwrap().spawn_keeps_running = keep;
    }
}

impl Processes for FakeProcesses {
    fn instances_by_name(&self, name: &str) -> Vec<ProcessInfo> {
        let wanted = name.trim_end_matches(".exe").to_ascii_lowercase();
        self.inner
            .lock()
            .unwrap()
            .running
            .iter()
            .filter(|p| p.name.trim_end_matches(".exe").eq_ignore_ascii_case(&wanted))
            .cloned()
            .collect()
    }

    fn instances_by_path(&self, path: &Utf8Path) -> Vec<ProcessInfo> {
        self.inner
            .lock()
            .unwrap()
            .running
            .iter()
            .filter(|p| p.path.as_deref() == Some(path))
            .cloned()
            .collect()
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.inner.lock().unwrap().running.iter().any(|p| p.pid == pid)
    }

    fn spawn(&self, spec: &LaunchSpec) -> Result<u32, PlatformError> {
        let mut state = self.inner.lock().unwrap();
        state.spawned.push(spec.clone());
        state.next_pid += 1;
        let pid = 10_000 + state.next_pid;
        if state.spawn_keeps_running {
            let name = spec.path.file_name().unwrap_or("unknown").to_string();
            state.running.push(ProcessInfo {
                pid,
                name,
                path: Some(spec.path.clone()),
                command_line: Some(spec.arguments.clone()),
            });
        }
        Ok(pid)
    }

    fn run_to_exit(&self, spec: &LaunchSpec) -> Result<i32, PlatformError> {
        self.inner.lock().unwrap().spawned.push(spec.clone());
        Ok(0)
    }

    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn is_elevated(&self) -> bool {
        self.inner.lock().unwrap().elevated
    }

    fn restart_elevated(&self, _arguments: &str) -> Result<(), PlatformError> {
        Ok(())
    }
}

/// Window control with a fixed handle that records applied operations.
#[derive(Default)]
pub struct RecordingWindowControl {
    handle: Option<WindowHandle>,
    ops: Mutex<Vec<String>>,
}

impl RecordingWindowControl {
    pub fn with_handle(handle: WindowHandle) -> Self {
        Self {
            handle: Some(handle),
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn operations(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

impl WindowControl for RecordingWindowControl {
    fn find_main_window(&self, _process_name: &str, _title: Option<&str>) -> Option<WindowHandle> {
        self.handle
    }

    fn set_state(&self, handle: WindowHandle, state: WindowState) -> Result<(), PlatformError> {
        self.ops.lock().unwrap().push(format!("set_state({handle}, {state:?})"));
        Ok(())
    }

    fn remove_taskbar_tab(&self, handle: WindowHandle) -> Result<(), PlatformError> {
        self.ops.lock().unwrap().push(format!("remove_taskbar_tab({handle})"));
        Ok(())
    }
}

/// Instance lock with a predetermined election outcome.
pub struct StaticLock {
    primary: bool,
}

impl StaticLock {
    pub fn primary() -> Self {
        Self { primary: true }
    }

    pub fn secondary() -> Self {
        Self { primary: false }
    }
}

impl InstanceLock for StaticLock {
    fn acquire(&mut self, _name: &str) -> Result<bool, PlatformError> {
        Ok(self.primary)
    }

    fn release(&mut self) {}
}

/// Links double that always refuses, forcing the copy tier.
pub struct DeniedLinks;

impl Links for DeniedLinks {
    fn create_dir_link(&self, link: &Utf8Path, _target: &Utf8Path) -> Result<(), PlatformError> {
        Err(PlatformError::LinkDenied(link.to_string()))
    }

    fn create_file_link(&self, link: &Utf8Path, _target: &Utf8Path) -> Result<(), PlatformError> {
        Err(PlatformError::LinkDenied(link.to_string()))
    }

    fn destroy_link(&self, _path: &Utf8Path) -> Result<bool, PlatformError> {
        Ok(false)
    }

    fn is_link(&self, _path: &Utf8Path) -> bool {
        false
    }
}

/// Helper double that records forwarded requests and performs them directly.
#[derive(Default)]
pub struct RecordingHelper {
    requests: Mutex<Vec<String>>,
}

impl RecordingHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl ElevatedHelper for RecordingHelper {
    fn copy(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), PlatformError> {
        self.requests.lock().unwrap().push(format!("copy {source} -> {destination}"));
        super::DirectHelper.copy(source, destination)
    }

    fn delete(&self, path: &Utf8Path) -> Result<(), PlatformError> {
        self.requests.lock().unwrap().push(format!("delete {path}"));
        super::DirectHelper.delete(path)
    }

    fn wait_then_delete(&self, path: &Utf8Path, _delay_secs: u64) -> Result<(), PlatformError> {
        self.requests.lock().unwrap().push(format!("wait_then_delete {path}"));
        // No delay in tests; remove immediately.
        super::DirectHelper.delete(path)
    }
}
