//! Lifecycle orchestration: one linear pass per primary instance, from lock
//! acquisition through redirection, launch, quiescence and teardown.
//!
//! Failure policy: errors in non-critical steps are logged and the step is
//! skipped; the machine always proceeds toward best-effort teardown. Only
//! two conditions abort without teardown, both before any redirection
//! exists: failure to write the first default configuration, and a missing
//! required runtime dependency.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::{self, LauncherConfig};
use crate::platform::{Capabilities, InstanceLock, LaunchSpec};
use crate::services::instance::{InstanceCoordinator, SecondaryOutcome};
use crate::services::java::{JavaLocator, JAVA_START_PARAMETER};
use crate::services::redirect::{self, ResourceRedirector};
use crate::services::redist::RedistHandler;
use crate::services::registry::{DeferredRemoval, RegistryRedirector};
use crate::session::SessionContext;

/// How one launcher run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Full primary cycle: enable, launch, wait, disable, cleanup.
    Completed,
    /// This instance was a secondary and forwarded a launch request.
    Forwarded,
    /// The run cycle was abandoned silently (pre-flight or secondary
    /// timeout); nothing was redirected.
    AbortedQuietly,
    /// A required runtime dependency is missing; the process must exit
    /// non-zero.
    MissingRuntime,
    /// An elevated copy of the launcher was started in our place.
    ElevationRequested,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::MissingRuntime => 1,
            _ => 0,
        }
    }
}

pub struct Orchestrator {
    exe_path: Utf8PathBuf,
    profile: LauncherConfig,
    caps: Capabilities,
    forwarded_args: Vec<String>,
}

impl Orchestrator {
    pub fn new(
        exe_path: Utf8PathBuf,
        profile: LauncherConfig,
        caps: Capabilities,
        forwarded_args: Vec<String>,
    ) -> Self {
        Self {
            exe_path,
            profile,
            caps,
            forwarded_args,
        }
    }

    /// Runs the full lifecycle.
    ///
    /// # Errors
    /// Only the first-run configuration bootstrap propagates errors; every
    /// later step degrades to a logged skip.
    pub async fn run(&self, lock: &mut dyn InstanceLock) -> Result<RunOutcome> {
        let exe_dir = self
            .exe_path
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        let app_name = self.exe_path.file_stem().unwrap_or("portalizer").to_string();
        let config_path = exe_dir.join(format!("{app_name}.ini"));

        let primary = lock
            .acquire(&app_name)
            .context("failed to acquire the instance lock")?;
        tracing::info!("instance role: {}", if primary { "primary" } else { "secondary" });

        if let Some(outcome) = self.bootstrap_config(&config_path)? {
            return Ok(outcome);
        }

        let settings = config::load_session_settings(&config_path);
        if settings.force_admin && !self.caps.processes.is_elevated() {
            tracing::info!("ForceAdmin set; restarting elevated");
            self.caps
                .processes
                .restart_elevated(&self.forwarded_line())
                .context("elevated restart failed")?;
            return Ok(RunOutcome::ElevationRequested);
        }

        let ctx = SessionContext::new(
            self.exe_path.clone(),
            self.profile.clone(),
            settings,
            &self.forwarded_args,
        );
        let coordinator = InstanceCoordinator::new(
            &ctx,
            self.caps.processes.as_ref(),
            self.caps.registry.as_ref(),
            self.caps.windows.as_ref(),
        );

        if !primary {
            let outcome = coordinator.run_secondary().await;
            tracing::info!("secondary outcome: {outcome:?}");
            return Ok(match outcome {
                SecondaryOutcome::Forwarded => RunOutcome::Forwarded,
                _ => RunOutcome::AbortedQuietly,
            });
        }

        if self.profile.elevate_first && !self.caps.processes.is_elevated() {
            tracing::info!("profile demands an elevated first instance");
            self.caps
                .processes
                .restart_elevated(&self.forwarded_line())
                .context("elevated restart failed")?;
            return Ok(RunOutcome::ElevationRequested);
        }

        // Pre-flight: everything here aborts silently, no redirection has
        // happened yet so no teardown is owed.
        if let Some(updater) = &ctx.updater_path {
            if !updater.is_file() {
                tracing::warn!("updater configured but missing at {updater}; aborting");
                return Ok(RunOutcome::AbortedQuietly);
            }
        }
        if self.target_already_running(&ctx) {
            tracing::info!("target already running; aborting");
            return Ok(RunOutcome::AbortedQuietly);
        }

        if let Some(outcome) = self.run_updater(&ctx) {
            return Ok(outcome);
        }

        // Runtime prep: bundled redistributables, then the Java runtime for
        // archive targets. Both are hard requirements.
        let redist = RedistHandler::new(&ctx, self.caps.processes.as_ref());
        if !redist.ensure_present() {
            tracing::error!("a required redistributable could not be installed");
            return Ok(RunOutcome::MissingRuntime);
        }
        let launch = match self.resolve_launch(&ctx) {
            Ok(Some(launch)) => launch,
            Ok(None) => return Ok(RunOutcome::AbortedQuietly),
            Err(outcome) => return Ok(outcome),
        };

        // A marker from a completed previous session is stale by now.
        if let Err(e) = self.caps.registry.delete_key(&ctx.reg_path) {
            tracing::debug!("could not clear {}: {e}", ctx.reg_path);
        }

        self.seed_settings(&ctx);

        let redirector = ResourceRedirector::new(
            &ctx,
            self.caps.links.as_ref(),
            self.caps.helper.as_ref(),
        );
        let registry_redirector = RegistryRedirector::new(
            &ctx,
            self.caps.registry.as_ref(),
            self.caps.helper.as_ref(),
        );

        redirector.enable_directories();
        redirector.enable_secure_files();
        redirector.enable_files();
        registry_redirector.enable_keys(&ctx.profile.reg_keys);

        let mut deferred: Vec<DeferredRemoval> = Vec::new();
        if !ctx.reg_file_path.is_file() {
            deferred.extend(registry_redirector.apply_config(&ctx.profile.def_reg));
        }
        deferred.extend(registry_redirector.apply_config(&ctx.profile.force_reg));

        self.mark_active(&ctx);

        let launched = match self.caps.processes.spawn(&launch) {
            Ok(pid) => {
                tracing::info!("launched {} (pid {pid})", launch.path);
                Some(pid)
            }
            Err(e) => {
                tracing::error!("failed to launch {}: {e}", launch.path);
                None
            }
        };
        if launched.is_some() {
            coordinator.apply_window_tweaks_when_visible().await;
        }
        if let Some(pid) = launched {
            while self.caps.processes.is_alive(pid) {
                sleep(Duration::from_millis(200)).await;
            }
        }
        coordinator.wait_for_quiescence(launched).await;

        // Teardown from here on; every step is best-effort.
        if let Some(app_path) = &ctx.app_path {
            if let Err(e) = self.caps.registry.write_value(
                &ctx.reg_path,
                None,
                crate::platform::RegValue::Sz(app_path.to_string()),
            ) {
                tracing::warn!("failed to register last-launched path: {e}");
            }
        }

        registry_redirector.disable_keys(&ctx.profile.reg_keys);
        redirector.disable_files();
        redirector.disable_secure_files();
        redirector.disable_directories();

        redirector.remove_scratch_dirs();
        registry_redirector.apply_config(&ctx.profile.rm_reg);
        registry_redirector.remove_keys(&ctx.profile.rm_reg_keys);
        registry_redirector.run_deferred(&deferred);
        redist.restore_absent();

        if let Err(e) = self.caps.registry.delete_key(&ctx.reg_path) {
            tracing::debug!("could not clear {}: {e}", ctx.reg_path);
        }
        self.clear_session_marker(&ctx);

        tracing::info!("run cycle complete");
        Ok(RunOutcome::Completed)
    }

    /// Writes the default session config on first run. A denied write hands
    /// over to an elevated restart; any other failure is fatal and
    /// surfaced — this is one of the two conditions that abort the run
    /// before redirection exists.
    fn bootstrap_config(&self, config_path: &Utf8Path) -> Result<Option<RunOutcome>> {
        if self.profile.def_ini.trim().is_empty() || config_path.exists() {
            return Ok(None);
        }
        match std::fs::write(config_path.as_std_path(), &self.profile.def_ini) {
            Ok(()) => {
                tracing::info!("wrote default session config to {config_path}");
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!("config write denied; restarting elevated");
                self.caps
                    .processes
                    .restart_elevated(&self.forwarded_line())
                    .context("elevated restart after denied config write failed")?;
                Ok(Some(RunOutcome::ElevationRequested))
            }
            Err(e) => {
                Err(e).with_context(|| format!("failed to write default config to {config_path}"))
            }
        }
    }

    fn target_already_running(&self, ctx: &SessionContext) -> bool {
        let Some(app_path) = ctx.app_path.as_deref() else {
            return false;
        };
        let instances = self.caps.processes.instances_by_path(app_path);
        if app_path
            .file_stem()
            .is_some_and(|stem| stem.eq_ignore_ascii_case("javaw"))
        {
            // A shared Java runtime hosts many apps; only an instance
            // carrying our arguments counts as "already running".
            return !ctx.start_arguments.is_empty()
                && instances.iter().any(|p| {
                    p.command_line
                        .as_deref()
                        .is_some_and(|cmd| cmd.contains(&ctx.start_arguments))
                });
        }
        !instances.is_empty()
    }

    /// Runs the updater synchronously when present.
    ///
    /// # Returns
    /// `Some(outcome)` when the run cycle must stop here.
    fn run_updater(&self, ctx: &SessionContext) -> Option<RunOutcome> {
        let updater = ctx.updater_path.as_deref()?;
        if !updater.is_file() {
            return None;
        }
        if !self.caps.processes.instances_by_path(updater).is_empty() {
            tracing::info!("updater already running; aborting");
            return Some(RunOutcome::AbortedQuietly);
        }
        let spec = LaunchSpec {
            arguments: "/quiet".to_string(),
            ..LaunchSpec::new(updater.to_path_buf())
        };
        match self.caps.processes.run_to_exit(&spec) {
            Ok(code) => tracing::info!("updater finished with exit code {code}"),
            Err(e) => tracing::warn!("updater failed: {e}"),
        }
        None
    }

    /// Resolves what to launch: the target itself, or the Java runtime for
    /// archive targets.
    ///
    /// # Returns
    /// `Ok(None)` when there is no valid target (abort quietly);
    /// `Err(outcome)` when a required runtime is missing.
    fn resolve_launch(&self, ctx: &SessionContext) -> Result<Option<LaunchSpec>, RunOutcome> {
        let Some(app_path) = ctx.app_path.as_deref() else {
            tracing::info!("no target configured; nothing to do");
            return Ok(None);
        };
        if !ctx.app_dir.is_dir() || !app_path.is_file() {
            tracing::warn!("target missing at {app_path}; aborting");
            return Ok(None);
        }

        let drop_elevation =
            ctx.settings.force_non_admin && self.caps.processes.is_elevated();
        if ctx.is_jar_target() {
            let Some(java) = JavaLocator::new(ctx).find() else {
                return Err(RunOutcome::MissingRuntime);
            };
            let arguments =
                format!("{JAVA_START_PARAMETER} \"{app_path}\" {}", ctx.start_arguments)
                    .trim()
                    .to_string();
            return Ok(Some(LaunchSpec {
                path: java,
                working_dir: Some(ctx.app_dir.clone()),
                arguments,
                drop_elevation,
                window_state: ctx.settings.window_state,
            }));
        }
        Ok(Some(LaunchSpec {
            path: app_path.to_path_buf(),
            working_dir: Some(ctx.app_dir.clone()),
            arguments: ctx.start_arguments.clone(),
            drop_elevation,
            window_state: ctx.settings.window_state,
        }))
    }

    /// First-run settings seed from the bundled defaults.
    fn seed_settings(&self, ctx: &SessionContext) {
        if ctx.settings_dir.exists() {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(ctx.settings_dir.as_std_path()) {
            tracing::warn!("failed to create {}: {e}", ctx.settings_dir);
            return;
        }
        if let Some(defaults) = &ctx.def_settings_dir {
            if defaults.is_dir() {
                if let Err(e) = redirect::copy_dir_recursive(defaults, &ctx.settings_dir) {
                    tracing::warn!("settings seed failed: {e}");
                }
            }
        }
    }

    fn mark_active(&self, ctx: &SessionContext) {
        let marker = ctx.session_marker();
        if let Err(e) = std::fs::create_dir_all(ctx.temp_dir.as_std_path())
            .and_then(|()| std::fs::write(marker.as_std_path(), b""))
        {
            tracing::warn!("failed to create session marker {marker}: {e}");
        }
    }

    fn clear_session_marker(&self, ctx: &SessionContext) {
        let marker = ctx.session_marker();
        if marker.exists() {
            if let Err(e) = std::fs::remove_file(marker.as_std_path()) {
                tracing::warn!("failed to remove session marker {marker}: {e}");
            }
        }
    }

    fn forwarded_line(&self) -> String {
        self.forwarded_args
            .iter()
            .map(|a| {
                if a.contains(char::is_whitespace) {
                    format!("\"{a}\"")
                } else {
                    a.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
