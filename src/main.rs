//! Portalizer - reversible file and registry redirection for one app run.
//!
//! Main entry point for the launcher binary. It initializes:
//! - Logging infrastructure (file rotation + console output)
//! - Tokio async runtime (timed waits and subprocess supervision)
//! - The launcher profile (`<exe-stem>.yaml` beside the binary)
//! - The OS-backed capability set ([`Capabilities::system`])
//! - The lifecycle orchestrator, which performs the whole run
//!
//! # Execution Flow
//!
//! 1. Initialize logging → logs/portalizer_<date>.log
//! 2. Load and translate the launcher profile
//! 3. Acquire the instance lock (first holder becomes primary)
//! 4. Primary: enable redirection, launch the target, wait for quiescence,
//!    disable redirection, clean up
//! 5. Secondary: wait for the session marker and forward a launch request
//!
//! # Platform
//!
//! Primary platform: Windows 10/11 (x86_64). The capability traits isolate
//! the OS surface; everything above them is portable.
//!
//! # Exit Codes
//!
//! `0` for a normal cycle (including silent aborts), `1` when a required
//! runtime dependency is missing or startup fails outright.

use std::process::ExitCode;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use portalizer::orchestrator::{Orchestrator, RunOutcome};
use portalizer::platform::{Capabilities, FileInstanceLock};
use portalizer::{LauncherConfig, APP_NAME, VERSION};

fn main() -> ExitCode {
    match run() {
        Ok(outcome) => ExitCode::from(outcome.exit_code() as u8),
        Err(e) => {
            eprintln!("{APP_NAME}: {e:#}");
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<RunOutcome> {
    let _guard = portalizer::logging::setup_logging("logs", "portalizer", false, true)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let exe_path = Utf8PathBuf::try_from(
        std::env::current_exe().context("failed to resolve the launcher path")?,
    )
    .context("launcher path is not valid UTF-8")?;
    let profile_path = exe_path.with_extension("yaml");
    let profile = LauncherConfig::load(&profile_path)?;

    let forwarded_args: Vec<String> = std::env::args().skip(1).collect();

    let caps = Capabilities::system();
    let mut lock = FileInstanceLock::new(caps.processes.clone());

    // Two worker threads: the main pass plus the window watcher.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("portalizer-worker")
        .build()
        .context("failed to build the async runtime")?;

    let orchestrator = Orchestrator::new(exe_path, profile, caps, forwarded_args);
    let outcome = runtime.block_on(orchestrator.run(&mut lock))?;

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    tracing::info!("exit outcome: {outcome:?}");
    Ok(outcome)
}
