use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;

use super::{InstanceLock, PlatformError, Processes};

/// File-based instance lock in the shared temp area, scoped to the launcher
/// process name.
///
/// The lock file records the holder's pid. A file left behind by a crashed
/// holder is taken over once a liveness probe for that pid fails; a live
/// holder makes every later acquirer a secondary. The named-mutex semantics
/// of the contract (exactly one primary per logical application per machine)
/// hold as long as all launchers share the same temp area, which is the
/// deployment model for a portable suite.
pub struct FileInstanceLock {
    processes: Arc<dyn Processes>,
    path: Option<Utf8PathBuf>,
    primary: bool,
}

impl FileInstanceLock {
    pub fn new(processes: Arc<dyn Processes>) -> Self {
        Self {
            processes,
            path: None,
            primary: false,
        }
    }

    fn lock_path(name: &str) -> Result<Utf8PathBuf, PlatformError> {
        let dir = Utf8PathBuf::try_from(std::env::temp_dir())
            .map_err(|e| PlatformError::Process(e.to_string()))?;
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Ok(dir.join(format!("portalizer-{sanitized}.lock")))
    }

    fn holder_alive(&self, path: &Utf8PathBuf) -> bool {
        let Ok(content) = std::fs::read_to_string(path.as_std_path()) else {
            return false;
        };
        let Ok(pid) = content.trim().parse::<u32>() else {
            return false;
        };
        pid == self.processes.current_pid() || self.processes.is_alive(pid)
    }
}

impl InstanceLock for FileInstanceLock {
    fn acquire(&mut self, name: &str) -> Result<bool, PlatformError> {
        let path = Self::lock_path(name)?;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path.as_std_path())
            {
                Ok(mut file) => {
                    let _ = write!(file, "{}", self.processes.current_pid());
                    self.path = Some(path);
                    self.primary = true;
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.holder_alive(&path) {
                        self.primary = false;
                        return Ok(false);
                    }
                    // Stale lock from a crashed holder; remove and retry.
                    tracing::warn!("removing stale instance lock at {path}");
                    std::fs::remove_file(path.as_std_path())
                        .map_err(|e| PlatformError::io(&path, e))?;
                }
                Err(e) => return Err(PlatformError::io(&path, e)),
            }
        }
    }

    fn release(&mut self) {
        if self.primary {
            if let Some(path) = self.path.take() {
                let _ = std::fs::remove_file(path.as_std_path());
            }
            self.primary = false;
        }
    }
}

impl Drop for FileInstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::FakeProcesses;

    #[test]
    fn test_first_acquirer_is_primary() {
        let procs = Arc::new(FakeProcesses::new());
        let name = format!("lock-test-{}", std::process::id());
        let mut lock = FileInstanceLock::new(procs.clone());
        assert!(lock.acquire(&name).unwrap());

        let mut second = FileInstanceLock::new(procs);
        // The first holder's pid is this process, which is alive.
        assert!(!second.acquire(&name).unwrap());

        lock.release();
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let procs = Arc::new(FakeProcesses::new());
        let name = format!("lock-stale-{}", std::process::id());
        let path = FileInstanceLock::lock_path(&name).unwrap();
        // A crashed holder left a pid that is no longer running.
        std::fs::write(path.as_std_path(), "999999999").unwrap();

        let mut lock = FileInstanceLock::new(procs);
        assert!(lock.acquire(&name).unwrap());
        lock.release();
    }
}
