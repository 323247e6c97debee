use camino::Utf8Path;

use super::{Links, PlatformError};

/// Symbolic links through the standard library.
///
/// On Windows, unprivileged link creation fails unless developer mode is on;
/// the redirector treats that as the signal to fall back to its copy tier.
pub struct StdLinks;

impl Links for StdLinks {
    fn create_dir_link(&self, link: &Utf8Path, target: &Utf8Path) -> Result<(), PlatformError> {
        #[cfg(windows)]
        let result = std::os::windows::fs::symlink_dir(target.as_std_path(), link.as_std_path());
        #[cfg(not(windows))]
        let result = std::os::unix::fs::symlink(target.as_std_path(), link.as_std_path());
        result.map_err(|e| PlatformError::LinkDenied(format!("{link} -> {target}: {e}")))
    }

    fn create_file_link(&self, link: &Utf8Path, target: &Utf8Path) -> Result<(), PlatformError> {
        #[cfg(windows)]
        let result = std::os::windows::fs::symlink_file(target.as_std_path(), link.as_std_path());
        #[cfg(not(windows))]
        let result = std::os::unix::fs::symlink(target.as_std_path(), link.as_std_path());
        result.map_err(|e| PlatformError::LinkDenied(format!("{link} -> {target}: {e}")))
    }

    fn destroy_link(&self, path: &Utf8Path) -> Result<bool, PlatformError> {
        if !self.is_link(path) {
            return Ok(false);
        }
        // Directory links need remove_dir on Windows; try the file form
        // first, which covers everything else.
        match std::fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(true),
            Err(_) => std::fs::remove_dir(path.as_std_path())
                .map(|()| true)
                .map_err(|e| PlatformError::io(path, e)),
        }
    }

    fn is_link(&self, path: &Utf8Path) -> bool {
        path.symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::try_from(path.to_path_buf()).unwrap()
    }

    #[test]
    fn test_dir_link_round_trip() {
        let temp = TempDir::new().unwrap();
        let root = utf8(temp.path());
        let target = root.join("target");
        let link = root.join("link");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("inside.txt"), "x").unwrap();

        let links = StdLinks;
        links.create_dir_link(&link, &target).unwrap();
        assert!(links.is_link(&link));
        assert!(link.join("inside.txt").exists());

        assert!(links.destroy_link(&link).unwrap());
        assert!(!link.exists());
        // Destroying the link must not touch the target.
        assert!(target.join("inside.txt").exists());
    }

    #[test]
    fn test_destroy_link_refuses_plain_paths() {
        let temp = TempDir::new().unwrap();
        let root = utf8(temp.path());
        let dir = root.join("plain");
        std::fs::create_dir(&dir).unwrap();

        let links = StdLinks;
        assert!(!links.destroy_link(&dir).unwrap());
        assert!(dir.exists());
    }

    #[test]
    fn test_create_link_fails_when_path_occupied() {
        let temp = TempDir::new().unwrap();
        let root = utf8(temp.path());
        let target = root.join("target");
        let link = root.join("link");
        std::fs::create_dir(&target).unwrap();
        std::fs::create_dir(&link).unwrap();

        let links = StdLinks;
        assert!(links.create_dir_link(&link, &target).is_err());
    }
}
