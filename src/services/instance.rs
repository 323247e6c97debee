use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::time::{sleep, Instant};

use crate::models::{WatchGranularity, WindowState};
use crate::platform::{LaunchSpec, ProcessInfo, Processes, Registry, WindowControl};
use crate::session::SessionContext;

/// How long a secondary instance polls for the session marker before giving
/// up without side effects.
pub const SECONDARY_POLL_BUDGET: Duration = Duration::from_secs(8);

/// Coarse polling period used before the 1-second mark; balances wake
/// frequency against responsiveness once setup is likely done.
const COARSE_POLL: Duration = Duration::from_millis(600);
const FINE_POLL: Duration = Duration::from_millis(100);
const RESCAN_DELAY: Duration = Duration::from_millis(200);

/// How a secondary instance run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryOutcome {
    /// A launch request was forwarded to the already-redirected target.
    Forwarded,
    /// The registered last-launched path equals the resolved target: the
    /// primary's session already tore down, nothing to forward to.
    SessionOver,
    /// The session marker never appeared within the poll budget.
    TimedOut,
    /// The target directory or binary is gone.
    TargetMissing,
    LaunchFailed,
}

/// Elects nothing itself — the caller owns the instance lock — but carries
/// everything both election outcomes need: secondary forwarding, the
/// dependent-process watch and the quiescence wait.
pub struct InstanceCoordinator<'a> {
    ctx: &'a SessionContext,
    processes: &'a dyn Processes,
    registry: &'a dyn Registry,
    windows: &'a dyn WindowControl,
}

impl<'a> InstanceCoordinator<'a> {
    pub fn new(
        ctx: &'a SessionContext,
        processes: &'a dyn Processes,
        registry: &'a dyn Registry,
        windows: &'a dyn WindowControl,
    ) -> Self {
        Self {
            ctx,
            processes,
            registry,
            windows,
        }
    }

    /// Runs the secondary path: wait for the primary's session marker, then
    /// forward a launch request to the redirected target. Secondaries never
    /// perform redirection themselves.
    pub async fn run_secondary(&self) -> SecondaryOutcome {
        let marker = self.ctx.session_marker();
        let started = Instant::now();
        while !marker.exists() {
            if started.elapsed() >= SECONDARY_POLL_BUDGET {
                return SecondaryOutcome::TimedOut;
            }
            let interval = if started.elapsed() < Duration::from_secs(1) {
                COARSE_POLL
            } else {
                FINE_POLL
            };
            sleep(interval).await;
        }

        let Some(app_path) = self.ctx.app_path.as_deref() else {
            return SecondaryOutcome::TargetMissing;
        };
        if !self.ctx.app_dir.is_dir() || !app_path.is_file() {
            return SecondaryOutcome::TargetMissing;
        }
        // The last-launched value is written only after a completed run and
        // removed before redirection starts; seeing the current target there
        // means the session this secondary raced against is already over.
        let last_launched = self.registry.read_string(&self.ctx.reg_path, None);
        if last_launched.as_deref() == Some(app_path.as_str()) {
            return SecondaryOutcome::SessionOver;
        }

        let spec = LaunchSpec {
            path: app_path.to_path_buf(),
            working_dir: Some(self.ctx.app_dir.clone()),
            arguments: self.ctx.start_arguments.clone(),
            drop_elevation: self.ctx.settings.force_non_admin && self.processes.is_elevated(),
            window_state: self.ctx.settings.window_state,
        };
        match self.processes.spawn(&spec) {
            Ok(pid) => {
                tracing::info!("forwarded launch request to {app_path} (pid {pid})");
                SecondaryOutcome::Forwarded
            }
            Err(e) => {
                tracing::error!("secondary launch failed: {e}");
                SecondaryOutcome::LaunchFailed
            }
        }
    }

    /// Directories whose executables count as dependents at the configured
    /// watch granularity.
    pub fn watch_directories(&self) -> Vec<Utf8PathBuf> {
        let mut dirs: Vec<Utf8PathBuf> = match self.ctx.profile.watch {
            WatchGranularity::ExactProcess => return Vec::new(),
            WatchGranularity::AppDirectories | WatchGranularity::AppDirectoriesByPath => {
                vec![self.ctx.app_dir.clone(), self.ctx.data_dir.clone()]
            }
            WatchGranularity::Extended => {
                let root = &self.ctx.exe_dir;
                let mut dirs = vec![root.clone()];
                for mapping in &self.ctx.dir_mappings {
                    for dir in [&mapping.source, &mapping.destination] {
                        if !dir.starts_with(root) {
                            dirs.push(dir.clone());
                        }
                    }
                }
                dirs
            }
        };
        dirs.extend(self.ctx.app_wait_dirs.iter().cloned());
        dirs.dedup();
        dirs
    }

    /// All executables below the watch directories, minus the launcher
    /// itself and the ignore list.
    pub fn watch_executables(&self) -> Vec<Utf8PathBuf> {
        let ignored = &self.ctx.profile.ignored_processes;
        let mut executables = Vec::new();
        for dir in self.watch_directories() {
            collect_executables(&dir, &mut executables);
        }
        executables.sort();
        executables.dedup();
        executables.retain(|exe| {
            if exe == &self.ctx.exe_path {
                return false;
            }
            let name = exe.file_name().unwrap_or_default();
            let stem = exe.file_stem().unwrap_or_default();
            !ignored
                .iter()
                .any(|i| i.eq_ignore_ascii_case(name) || i.eq_ignore_ascii_case(stem))
        });
        executables
    }

    /// Snapshot of the currently running dependents.
    pub fn running_dependents(&self) -> Vec<ProcessInfo> {
        let by_path = self.ctx.profile.watch != WatchGranularity::AppDirectories;
        let mut dependents: Vec<ProcessInfo> = Vec::new();
        for exe in self.watch_executables() {
            let found = if by_path {
                self.processes.instances_by_path(&exe)
            } else {
                match exe.file_name() {
                    Some(name) => self.processes.instances_by_name(name),
                    None => continue,
                }
            };
            for info in found {
                if info.pid != self.processes.current_pid()
                    && !dependents.iter().any(|d| d.pid == info.pid)
                {
                    dependents.push(info);
                }
            }
        }
        dependents
    }

    /// Blocks until every dependent has exited.
    ///
    /// With [`WatchGranularity::ExactProcess`] only the launched process is
    /// waited on. Otherwise: scan; if dependents run, wait for each of them
    /// (order immaterial) and re-apply the window tweaks; if the scan comes
    /// up empty, wait briefly and re-scan exactly once more — a dependent
    /// may be mid-restart between two scans.
    pub async fn wait_for_quiescence(&self, launched: Option<u32>) {
        if self.ctx.profile.watch == WatchGranularity::ExactProcess {
            if let Some(pid) = launched {
                while self.processes.is_alive(pid) {
                    sleep(RESCAN_DELAY).await;
                }
            }
            return;
        }

        loop {
            let dependents = self.running_dependents();
            if dependents.is_empty() {
                sleep(RESCAN_DELAY).await;
                if self.running_dependents().is_empty() {
                    return;
                }
                continue;
            }
            tracing::debug!(
                "waiting on {} dependent(s): {}",
                dependents.len(),
                dependents
                    .iter()
                    .map(|d| d.name.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            self.apply_window_tweaks();
            for dependent in &dependents {
                while self.processes.is_alive(dependent.pid) {
                    sleep(RESCAN_DELAY).await;
                }
            }
        }
    }

    /// One window-tweak pass: find the target's main window and apply the
    /// configured state and taskbar visibility.
    ///
    /// # Returns
    /// `true` when the tweaks were applied or nothing is configured.
    pub fn apply_window_tweaks(&self) -> bool {
        let settings = &self.ctx.settings;
        if !settings.hide_in_taskbar && settings.window_state == WindowState::Normal {
            return true;
        }
        let Some(name) = self.ctx.app_path.as_deref().and_then(Utf8Path::file_stem) else {
            return true;
        };
        let title = (!settings.window_title.is_empty()).then_some(settings.window_title.as_str());
        let Some(handle) = self.windows.find_main_window(name, title) else {
            return false;
        };
        if settings.hide_in_taskbar {
            if let Err(e) = self.windows.remove_taskbar_tab(handle) {
                tracing::warn!("failed to remove taskbar tab: {e}");
            }
        }
        if settings.window_state != WindowState::Normal {
            if let Err(e) = self.windows.set_state(handle, settings.window_state) {
                tracing::warn!("failed to apply window state: {e}");
            }
        }
        true
    }

    /// Polls for the target's main window and applies the tweaks once it
    /// appears; gives up quietly after the poll budget.
    pub async fn apply_window_tweaks_when_visible(&self) {
        for _ in 0..64 {
            if self.apply_window_tweaks() {
                return;
            }
            sleep(Duration::from_millis(250)).await;
        }
    }
}

fn collect_executables(dir: &Utf8Path, out: &mut Vec<Utf8PathBuf>) {
    let Ok(entries) = dir.read_dir_utf8() else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            collect_executables(entry.path(), out);
        } else if entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
        {
            out.push(entry.into_path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LauncherConfig;
    use crate::models::SessionSettings;
    use crate::platform::testing::{FakeProcesses, MemoryRegistry, RecordingWindowControl};
    use crate::platform::NullWindowControl;
    use tempfile::TempDir;

    fn context(root: &Utf8Path, profile: LauncherConfig) -> SessionContext {
        SessionContext::new(
            root.join("Launcher.exe"),
            profile,
            SessionSettings::default(),
            &[],
        )
    }

    #[test]
    fn test_watch_executables_respects_ignore_list() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let app = root.join("App");
        std::fs::create_dir_all(app.join("plugins")).unwrap();
        std::fs::write(app.join("target.exe"), "").unwrap();
        std::fs::write(app.join("plugins/helper.exe"), "").unwrap();
        std::fs::write(app.join("crashpad.exe"), "").unwrap();
        std::fs::write(app.join("readme.txt"), "").unwrap();

        let profile = LauncherConfig {
            ignored_processes: vec!["crashpad.exe".to_string()],
            ..LauncherConfig::default()
        };
        let ctx = context(&root, profile);
        let processes = FakeProcesses::new();
        let registry = MemoryRegistry::new();
        let coordinator =
            InstanceCoordinator::new(&ctx, &processes, &registry, &NullWindowControl);

        let names: Vec<String> = coordinator
            .watch_executables()
            .into_iter()
            .filter_map(|p| p.file_name().map(str::to_string))
            .collect();
        assert!(names.contains(&"target.exe".to_string()));
        assert!(names.contains(&"helper.exe".to_string()));
        assert!(!names.contains(&"crashpad.exe".to_string()));
        assert!(!names.contains(&"readme.txt".to_string()));
    }

    #[test]
    fn test_watch_directories_by_granularity() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();

        let exact = context(
            &root,
            LauncherConfig {
                app_wait_dirs: vec![],
                watch: crate::models::WatchGranularity::ExactProcess,
                ..LauncherConfig::default()
            },
        );
        let processes = FakeProcesses::new();
        let registry = MemoryRegistry::new();
        let coordinator =
            InstanceCoordinator::new(&exact, &processes, &registry, &NullWindowControl);
        assert!(coordinator.watch_directories().is_empty());

        let default = context(&root, LauncherConfig::default());
        let coordinator =
            InstanceCoordinator::new(&default, &processes, &registry, &NullWindowControl);
        let dirs = coordinator.watch_directories();
        assert!(dirs.contains(&default.app_dir));
        assert!(dirs.contains(&default.data_dir));
    }

    #[test]
    fn test_quiescence_waits_for_dependent_exit() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let app = root.join("App");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("target.exe"), "").unwrap();

        let ctx = context(&root, LauncherConfig::default());
        let processes = FakeProcesses::new();
        let registry = MemoryRegistry::new();
        let pid = processes.add_running("target.exe", Some(app.join("target.exe")));

        // Simulate the dependent exiting shortly after the wait starts.
        let exit = async {
            sleep(Duration::from_millis(350)).await;
            processes.remove(pid);
        };
        let coordinator =
            InstanceCoordinator::new(&ctx, &processes, &registry, &NullWindowControl);
        tokio_test::block_on(async {
            tokio::join!(coordinator.wait_for_quiescence(None), exit);
        });

        assert!(coordinator.running_dependents().is_empty());
    }

    #[tokio::test]
    async fn test_secondary_times_out_without_marker() {
        // Shortened indirectly: the marker never appears, so the secondary
        // must give up after the budget. Run with a paused clock.
        tokio::time::pause();
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let ctx = context(&root, LauncherConfig::default());
        let processes = FakeProcesses::new();
        let registry = MemoryRegistry::new();
        let coordinator =
            InstanceCoordinator::new(&ctx, &processes, &registry, &NullWindowControl);

        let outcome = coordinator.run_secondary().await;
        assert_eq!(outcome, SecondaryOutcome::TimedOut);
        assert!(processes.spawned().is_empty());
    }

    #[test]
    fn test_window_tweaks_apply_when_configured() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let mut settings = SessionSettings::default();
        settings.hide_in_taskbar = true;
        settings.window_state = crate::models::WindowState::Minimized;
        let profile = LauncherConfig {
            app_path: "%CurDir%\\App\\target.exe".to_string(),
            ..LauncherConfig::default()
        };
        let ctx = SessionContext::new(root.join("Launcher.exe"), profile, settings, &[]);

        let processes = FakeProcesses::new();
        let registry = MemoryRegistry::new();
        let windows = RecordingWindowControl::with_handle(42);
        let coordinator = InstanceCoordinator::new(&ctx, &processes, &registry, &windows);

        assert!(coordinator.apply_window_tweaks());
        let ops = windows.operations();
        assert!(ops.iter().any(|op| op.contains("remove_taskbar_tab(42)")));
        assert!(ops.iter().any(|op| op.contains("set_state(42")));
    }
}
