//! Capability interfaces over the OS primitives the core depends on.
//!
//! The redirection and coordination engine never calls symbolic-link,
//! registry, process or mutex APIs directly; it goes through the narrow
//! traits defined here. Default implementations live in the submodules;
//! tests substitute the in-memory doubles from [`testing`].

pub mod helper;
pub mod links;
pub mod lock;
pub mod process;
pub mod registry;
pub mod testing;
pub mod window;

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::models::WindowState;

pub use helper::DirectHelper;
pub use links::StdLinks;
pub use lock::FileInstanceLock;
pub use process::SystemProcesses;
pub use registry::{RegExeRegistry, RegValue};
pub use window::NullWindowControl;

/// Errors surfaced by capability implementations.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("symbolic link not supported or denied: {0}")]
    LinkDenied(String),

    #[error("registry operation failed: {0}")]
    Registry(String),

    #[error("process operation failed: {0}")]
    Process(String),

    #[error("operation not supported on this platform: {0}")]
    Unsupported(&'static str),
}

impl PlatformError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Symbolic-link primitives.
#[cfg_attr(test, mockall::automock)]
pub trait Links: Send + Sync {
    /// Creates a directory symbolic link at `link` pointing to `target`.
    fn create_dir_link(&self, link: &Utf8Path, target: &Utf8Path) -> Result<(), PlatformError>;

    /// Creates a file symbolic link at `link` pointing to `target`.
    fn create_file_link(&self, link: &Utf8Path, target: &Utf8Path) -> Result<(), PlatformError>;

    /// Removes `path` if and only if it is a symbolic link.
    ///
    /// # Returns
    /// `true` when a link existed and was removed. The link target is never
    /// touched.
    fn destroy_link(&self, path: &Utf8Path) -> Result<bool, PlatformError>;

    /// Whether `path` currently is a symbolic link.
    fn is_link(&self, path: &Utf8Path) -> bool;
}

/// Registry primitives. Key paths use `HIVE\sub\key` notation with either
/// full hive names or the short aliases (`HKCU`, `HKLM`, ...).
pub trait Registry: Send + Sync {
    fn key_exists(&self, key: &str) -> bool;

    fn value_exists(&self, key: &str, name: &str) -> bool;

    /// Reads a value; `name` of `None` addresses the key's default value.
    fn read_value(&self, key: &str, name: Option<&str>) -> Option<RegValue>;

    fn write_value(
        &self,
        key: &str,
        name: Option<&str>,
        value: RegValue,
    ) -> Result<(), PlatformError>;

    fn create_key(&self, key: &str) -> Result<(), PlatformError>;

    /// Deletes a key and everything below it.
    fn delete_key(&self, key: &str) -> Result<(), PlatformError>;

    fn delete_value(&self, key: &str, name: &str) -> Result<(), PlatformError>;

    /// Names of the direct subkeys of `key`.
    fn list_subkeys(&self, key: &str) -> Vec<String>;

    /// Exports the listed keys (those that exist) into a registry script
    /// file at `file`.
    fn export_keys(&self, file: &Utf8Path, keys: &[String]) -> Result<(), PlatformError>;

    /// Imports a registry script file.
    fn import_file(&self, file: &Utf8Path) -> Result<(), PlatformError>;

    /// Imports registry script text given as lines.
    fn import_script(&self, lines: &[String]) -> Result<(), PlatformError>;
}

impl<'r> dyn Registry + 'r {
    /// Convenience string read over [`Registry::read_value`].
    pub fn read_string(&self, key: &str, name: Option<&str>) -> Option<String> {
        match self.read_value(key, name)? {
            RegValue::Sz(s) | RegValue::ExpandSz(s) => Some(s),
            RegValue::Dword(n) => Some(n.to_string()),
            RegValue::MultiSz(v) => Some(v.join("\n")),
        }
    }
}

/// A snapshot of one running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub path: Option<Utf8PathBuf>,
    pub command_line: Option<String>,
}

/// What to start and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub path: Utf8PathBuf,
    pub working_dir: Option<Utf8PathBuf>,
    pub arguments: String,
    /// Start without elevation even when the launcher itself is elevated.
    pub drop_elevation: bool,
    pub window_state: WindowState,
}

impl LaunchSpec {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            working_dir: None,
            arguments: String::new(),
            drop_elevation: false,
            window_state: WindowState::Normal,
        }
    }
}

/// Process enumeration, liveness and spawning.
#[cfg_attr(test, mockall::automock)]
pub trait Processes: Send + Sync {
    /// Running processes whose executable file name matches `name`
    /// (case-insensitive, with or without the `.exe` suffix).
    fn instances_by_name(&self, name: &str) -> Vec<ProcessInfo>;

    /// Running processes whose executable path matches `path`.
    fn instances_by_path(&self, path: &Utf8Path) -> Vec<ProcessInfo>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Starts a detached process.
    ///
    /// # Returns
    /// The new process id.
    fn spawn(&self, spec: &LaunchSpec) -> Result<u32, PlatformError>;

    /// Starts a process and blocks until it exits.
    ///
    /// # Returns
    /// The exit code, `-1` when unavailable.
    fn run_to_exit(&self, spec: &LaunchSpec) -> Result<i32, PlatformError>;

    fn current_pid(&self) -> u32;

    /// Whether the current process runs elevated.
    fn is_elevated(&self) -> bool;

    /// Re-launches the current executable elevated, forwarding `arguments`.
    /// The caller is expected to exit afterwards.
    fn restart_elevated(&self, arguments: &str) -> Result<(), PlatformError>;
}

/// Opaque window handle as understood by the [`WindowControl`] capability.
pub type WindowHandle = isize;

/// Main-window lookup and manipulation for the launched target.
pub trait WindowControl: Send + Sync {
    /// Finds the main window of a process with the given executable name,
    /// optionally filtered by an exact window title.
    fn find_main_window(&self, process_name: &str, title: Option<&str>) -> Option<WindowHandle>;

    fn set_state(&self, handle: WindowHandle, state: WindowState) -> Result<(), PlatformError>;

    fn remove_taskbar_tab(&self, handle: WindowHandle) -> Result<(), PlatformError>;
}

/// The already-elevated helper process the secure tiers forward to.
#[cfg_attr(test, mockall::automock)]
pub trait ElevatedHelper: Send + Sync {
    fn copy(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), PlatformError>;

    fn delete(&self, path: &Utf8Path) -> Result<(), PlatformError>;

    /// Deletes `path` after `delay_secs`, without blocking the caller.
    fn wait_then_delete(&self, path: &Utf8Path, delay_secs: u64) -> Result<(), PlatformError>;
}

/// Named, process-name-scoped mutual exclusion. The first acquirer per
/// machine is the primary instance; the lock is held until process exit.
pub trait InstanceLock: Send {
    /// Acquires the named lock.
    ///
    /// # Returns
    /// `true` when this process is the first holder (primary).
    fn acquire(&mut self, name: &str) -> Result<bool, PlatformError>;

    /// Releases the lock; also happens implicitly on drop.
    fn release(&mut self);
}

/// Bundle of the shared capability implementations handed to the
/// orchestrator.
#[derive(Clone)]
pub struct Capabilities {
    pub links: Arc<dyn Links>,
    pub registry: Arc<dyn Registry>,
    pub processes: Arc<dyn Processes>,
    pub windows: Arc<dyn WindowControl>,
    pub helper: Arc<dyn ElevatedHelper>,
}

impl Capabilities {
    /// The default, OS-backed capability set.
    pub fn system() -> Self {
        Self {
            links: Arc::new(StdLinks),
            registry: Arc::new(RegExeRegistry::new()),
            processes: Arc::new(SystemProcesses::new()),
            windows: Arc::new(NullWindowControl),
            helper: Arc::new(DirectHelper),
        }
    }
}
