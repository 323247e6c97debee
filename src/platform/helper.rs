use camino::Utf8Path;

use super::{ElevatedHelper, PlatformError};

/// Helper that performs the requested file operations directly.
///
/// Valid when the launcher itself already runs with the access the secure
/// tiers need; deployments with a separate elevated helper process replace
/// this with an IPC-forwarding implementation.
pub struct DirectHelper;

impl ElevatedHelper for DirectHelper {
    fn copy(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), PlatformError> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|e| PlatformError::io(parent, e))?;
        }
        std::fs::copy(source.as_std_path(), destination.as_std_path())
            .map_err(|e| PlatformError::io(destination, e))?;
        Ok(())
    }

    fn delete(&self, path: &Utf8Path) -> Result<(), PlatformError> {
        match std::fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PlatformError::io(path, e)),
        }
    }

    fn wait_then_delete(&self, path: &Utf8Path, delay_secs: u64) -> Result<(), PlatformError> {
        let path = path.to_path_buf();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(delay_secs));
            let _ = std::fs::remove_file(path.as_std_path());
        });
        Ok(())
    }
}
