use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::models::{Mapping, WildcardRetention};
use crate::platform::{ElevatedHelper, Links, PlatformError};
use crate::session::SessionContext;

/// Operation-marker names, one per redirection kind. A marker that survives
/// into the next Enable means the previous session never cleanly disabled.
const DIR_OP: &str = "dir-redirect";
const FILE_OP: &str = "file-redirect";
const SECURE_OP: &str = "file-secure-redirect";

/// Errors raised by individual mapping operations. They never leave the
/// redirector: each mapping is isolated, failures are logged and the batch
/// continues.
#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid wildcard pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

fn io_err(path: &Utf8Path, source: std::io::Error) -> RedirectError {
    RedirectError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Relocates files and directories between their expected locations and the
/// portable backing store, reversibly.
///
/// The preferred tier is a symbolic link; when that is denied the content is
/// copied and the original moved into a backup slot. Wildcard mappings are
/// copy-only sets. The secure variant forwards everything to the elevated
/// helper.
///
/// `enable_*`/`disable_*` are idempotent and infallible at the batch level.
pub struct ResourceRedirector<'a> {
    ctx: &'a SessionContext,
    links: &'a dyn Links,
    helper: &'a dyn ElevatedHelper,
}

impl<'a> ResourceRedirector<'a> {
    pub fn new(
        ctx: &'a SessionContext,
        links: &'a dyn Links,
        helper: &'a dyn ElevatedHelper,
    ) -> Self {
        Self { ctx, links, helper }
    }

    /// Enables every directory mapping.
    pub fn enable_directories(&self) {
        if self.ctx.dir_mappings.is_empty() {
            return;
        }
        self.begin_enable(DIR_OP, Self::disable_directories);
        for mapping in &self.ctx.dir_mappings {
            if let Err(e) = self.enable_directory(mapping) {
                tracing::error!("directory redirect failed for {}: {e}", mapping.source);
            }
        }
    }

    /// Disables every directory mapping, restoring the originals.
    pub fn disable_directories(&self) {
        if self.ctx.dir_mappings.is_empty() {
            return;
        }
        self.clear_marker(DIR_OP);
        for mapping in &self.ctx.dir_mappings {
            if let Err(e) = self.disable_directory(mapping) {
                tracing::error!("directory restore failed for {}: {e}", mapping.source);
            }
        }
    }

    /// Enables every file mapping. Wildcard mappings and, when the profile
    /// forces it, all mappings use the copy tier.
    pub fn enable_files(&self) {
        if self.ctx.file_mappings.is_empty() {
            return;
        }
        self.begin_enable(FILE_OP, Self::disable_files);
        for mapping in &self.ctx.file_mappings {
            let result = if mapping.is_wildcard() {
                self.enable_wildcard(mapping)
            } else if self.ctx.profile.file_map_simple {
                self.enable_file_simple(mapping)
            } else {
                self.enable_file(mapping)
            };
            if let Err(e) = result {
                tracing::error!("file redirect failed for {}: {e}", mapping.source);
            }
        }
    }

    /// Disables every file mapping.
    pub fn disable_files(&self) {
        if self.ctx.file_mappings.is_empty() {
            return;
        }
        self.clear_marker(FILE_OP);
        for mapping in &self.ctx.file_mappings {
            let result = if mapping.is_wildcard() {
                self.disable_wildcard(mapping)
            } else if self.ctx.profile.file_map_simple {
                self.disable_file_simple(mapping)
            } else {
                self.disable_file(mapping)
            };
            if let Err(e) = result {
                tracing::error!("file restore failed for {}: {e}", mapping.source);
            }
        }
    }

    /// Forwards every secure mapping to the elevated helper as a copy
    /// request. Nothing is linked or mutated in-process.
    pub fn enable_secure_files(&self) {
        if self.ctx.secure_mappings.is_empty() {
            return;
        }
        self.begin_enable(SECURE_OP, Self::disable_secure_files);
        for mapping in &self.ctx.secure_mappings {
            if !mapping.source.is_file() {
                continue;
            }
            if let Err(e) = self.helper.copy(&mapping.source, &mapping.destination) {
                tracing::error!("secure copy failed for {}: {e}", mapping.source);
            }
        }
    }

    /// Forwards every secure mapping to the elevated helper as a delete
    /// request.
    pub fn disable_secure_files(&self) {
        if self.ctx.secure_mappings.is_empty() {
            return;
        }
        self.clear_marker(SECURE_OP);
        for mapping in &self.ctx.secure_mappings {
            if let Err(e) = self.helper.delete(&mapping.destination) {
                tracing::error!("secure delete failed for {}: {e}", mapping.destination);
            }
        }
    }

    /// Removes scratch directories at cleanup. Specs with a wildcard
    /// component resolve to the matching subdirectories; the retention
    /// policy decides which survive.
    pub fn remove_scratch_dirs(&self) {
        let retention = self.ctx.profile.wildcard_retention;
        for spec in &self.ctx.profile.rm_dirs {
            let path = self.ctx.expand(spec);
            let result = if path.as_str().contains('*') || path.as_str().contains('?') {
                self.remove_wildcard_dirs(&path, retention)
            } else {
                remove_dir_if_present(&path)
            };
            if let Err(e) = result {
                tracing::warn!("scratch removal failed for {path}: {e}");
            }
        }
    }

    // --- markers ---------------------------------------------------------

    fn begin_enable(&self, operation: &str, repair: fn(&Self)) {
        let marker = self.ctx.operation_marker(operation);
        if marker.exists() {
            tracing::warn!("stale marker {marker}; disabling previous redirection first");
            repair(self);
        }
        if let Err(e) = std::fs::create_dir_all(self.ctx.temp_dir.as_std_path())
            .and_then(|()| std::fs::write(marker.as_std_path(), b""))
        {
            tracing::warn!("failed to create operation marker {marker}: {e}");
        }
    }

    fn clear_marker(&self, operation: &str) {
        let marker = self.ctx.operation_marker(operation);
        if marker.exists() {
            if let Err(e) = std::fs::remove_file(marker.as_std_path()) {
                tracing::warn!("failed to remove operation marker {marker}: {e}");
            }
        }
    }

    // --- directories -----------------------------------------------------

    fn enable_directory(&self, mapping: &Mapping) -> Result<(), RedirectError> {
        let source = &mapping.source;
        let destination = &mapping.destination;
        let backup = mapping.backup_slot(self.ctx.machine_id);

        // First-run population: an empty backing store takes over the
        // current source content.
        if source.is_dir() && !self.links.is_link(source) && dir_missing_or_empty(destination) {
            copy_dir_recursive(source, destination)?;
        }
        if self.links.is_link(source) {
            return Ok(());
        }

        if source.exists() {
            if backup.exists() {
                // A backup from an interrupted run wins; the current source
                // is a stale copy.
                remove_dir_all_checked(source)?;
            } else {
                move_path(source, &backup)?;
            }
        }

        std::fs::create_dir_all(destination.as_std_path()).map_err(|e| io_err(destination, e))?;
        if let Some(parent) = source.parent() {
            std::fs::create_dir_all(parent.as_std_path()).map_err(|e| io_err(parent, e))?;
        }

        match self.links.create_dir_link(source, destination) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!("link denied for {source}, using copy tier: {e}");
                copy_dir_recursive(destination, source)?;
                if !source.exists() {
                    std::fs::create_dir_all(source.as_std_path()).map_err(|e| io_err(source, e))?;
                }
                Ok(())
            }
        }
    }

    fn disable_directory(&self, mapping: &Mapping) -> Result<(), RedirectError> {
        let source = &mapping.source;
        let destination = &mapping.destination;
        let backup = mapping.backup_slot(self.ctx.machine_id);

        if !self.links.destroy_link(source)? && source.is_dir() {
            // Copy tier was active: persist in-session changes back to the
            // store before vacating the source.
            copy_dir_recursive(source, destination)?;
            remove_dir_all_checked(source)?;
        }
        if backup.exists() {
            move_path(&backup, source)?;
        }
        Ok(())
    }

    // --- files, link tier ------------------------------------------------

    fn enable_file(&self, mapping: &Mapping) -> Result<(), RedirectError> {
        let source = &mapping.source;
        let destination = &mapping.destination;
        let backup = mapping.backup_slot(self.ctx.machine_id);

        if !destination.exists() {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent.as_std_path()).map_err(|e| io_err(parent, e))?;
            }
            if source.is_file() && !self.links.is_link(source) {
                std::fs::copy(source.as_std_path(), destination.as_std_path())
                    .map_err(|e| io_err(destination, e))?;
            } else {
                std::fs::write(destination.as_std_path(), b"").map_err(|e| io_err(destination, e))?;
            }
        }
        if self.links.is_link(source) {
            return Ok(());
        }

        if source.is_file() {
            if !backup.exists() {
                std::fs::copy(source.as_std_path(), backup.as_std_path())
                    .map_err(|e| io_err(&backup, e))?;
            }
            std::fs::remove_file(source.as_std_path()).map_err(|e| io_err(source, e))?;
        }
        if let Some(parent) = source.parent() {
            std::fs::create_dir_all(parent.as_std_path()).map_err(|e| io_err(parent, e))?;
        }

        match self.links.create_file_link(source, destination) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!("link denied for {source}, using copy tier: {e}");
                std::fs::copy(destination.as_std_path(), source.as_std_path())
                    .map_err(|e| io_err(source, e))?;
                Ok(())
            }
        }
    }

    fn disable_file(&self, mapping: &Mapping) -> Result<(), RedirectError> {
        let source = &mapping.source;
        let destination = &mapping.destination;
        let backup = mapping.backup_slot(self.ctx.machine_id);

        if !self.links.destroy_link(source)? && source.is_file() {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent.as_std_path()).map_err(|e| io_err(parent, e))?;
            }
            std::fs::copy(source.as_std_path(), destination.as_std_path())
                .map_err(|e| io_err(destination, e))?;
            std::fs::remove_file(source.as_std_path()).map_err(|e| io_err(source, e))?;
        }
        if backup.is_file() {
            std::fs::copy(backup.as_std_path(), source.as_std_path())
                .map_err(|e| io_err(source, e))?;
            std::fs::remove_file(backup.as_std_path()).map_err(|e| io_err(&backup, e))?;
        }
        Ok(())
    }

    // --- files, copy tier ------------------------------------------------

    fn enable_file_simple(&self, mapping: &Mapping) -> Result<(), RedirectError> {
        let source = &mapping.source;
        let destination = &mapping.destination;

        if !destination.exists() {
            if source.is_file() {
                if let Some(parent) = destination.parent() {
                    std::fs::create_dir_all(parent.as_std_path()).map_err(|e| io_err(parent, e))?;
                }
                std::fs::copy(source.as_std_path(), destination.as_std_path())
                    .map_err(|e| io_err(destination, e))?;
            }
            return Ok(());
        }
        // The newer side wins; stored content only replaces a source that is
        // missing or older.
        if !source.is_file() || modified(destination) > modified(source) {
            if let Some(parent) = source.parent() {
                std::fs::create_dir_all(parent.as_std_path()).map_err(|e| io_err(parent, e))?;
            }
            std::fs::copy(destination.as_std_path(), source.as_std_path())
                .map_err(|e| io_err(source, e))?;
        }
        Ok(())
    }

    fn disable_file_simple(&self, mapping: &Mapping) -> Result<(), RedirectError> {
        let source = &mapping.source;
        let destination = &mapping.destination;
        if source.is_file() {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent.as_std_path()).map_err(|e| io_err(parent, e))?;
            }
            std::fs::copy(source.as_std_path(), destination.as_std_path())
                .map_err(|e| io_err(destination, e))?;
            if destination.is_file() {
                std::fs::remove_file(source.as_std_path()).map_err(|e| io_err(source, e))?;
            }
        }
        Ok(())
    }

    // --- files, wildcard sets --------------------------------------------

    fn enable_wildcard(&self, mapping: &Mapping) -> Result<(), RedirectError> {
        let Some((source_dir, pattern)) = mapping.wildcard_parts() else {
            return Ok(());
        };
        let dest_dir = mapping.destination.parent().unwrap_or(&mapping.destination);
        for file in matching_files(dest_dir, pattern)? {
            let Some(name) = file.file_name() else { continue };
            std::fs::create_dir_all(source_dir.as_std_path())
                .map_err(|e| io_err(source_dir, e))?;
            let target = source_dir.join(name);
            std::fs::copy(file.as_std_path(), target.as_std_path())
                .map_err(|e| io_err(&target, e))?;
        }
        Ok(())
    }

    fn disable_wildcard(&self, mapping: &Mapping) -> Result<(), RedirectError> {
        let Some((source_dir, pattern)) = mapping.wildcard_parts() else {
            return Ok(());
        };
        let dest_dir = mapping.destination.parent().unwrap_or(&mapping.destination);
        for file in matching_files(source_dir, pattern)? {
            let Some(name) = file.file_name() else { continue };
            std::fs::create_dir_all(dest_dir.as_std_path()).map_err(|e| io_err(dest_dir, e))?;
            let target = dest_dir.join(name);
            if target.is_file() {
                std::fs::remove_file(target.as_std_path()).map_err(|e| io_err(&target, e))?;
            }
            move_path(&file, &target)?;
        }
        Ok(())
    }

    // --- scratch cleanup -------------------------------------------------

    fn remove_wildcard_dirs(
        &self,
        spec: &Utf8Path,
        retention: WildcardRetention,
    ) -> Result<(), RedirectError> {
        let components: Vec<&str> = spec.components().map(|c| c.as_str()).collect();
        let Some(wild_idx) = components
            .iter()
            .position(|c| c.contains('*') || c.contains('?'))
        else {
            return remove_dir_if_present(spec);
        };

        let mut base = Utf8PathBuf::new();
        for component in &components[..wild_idx] {
            base.push(component);
        }
        if !base.is_dir() {
            return Ok(());
        }
        let pattern = components[wild_idx];
        let suffix: Utf8PathBuf = components[wild_idx + 1..].iter().copied().collect();

        let matcher = glob::Pattern::new(pattern).map_err(|e| RedirectError::Pattern {
            pattern: pattern.to_string(),
            source: e,
        })?;
        let mut matches: Vec<Utf8PathBuf> = base
            .read_dir_utf8()
            .map_err(|e| io_err(&base, e))?
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|e| matcher.matches(e.file_name()))
            .map(|e| e.into_path())
            .collect();
        matches.sort();

        let doomed: Vec<Utf8PathBuf> = match retention {
            WildcardRetention::KeepNewestByName => {
                if matches.len() < 2 {
                    return Ok(());
                }
                let newest = matches.pop().expect("len checked above");
                if suffix.as_str().is_empty() {
                    matches
                } else {
                    // The newest match survives except for the trailing
                    // suffix path below it.
                    matches.push(newest.join(&suffix));
                    matches
                }
            }
            WildcardRetention::KeepNone => matches,
        };

        for dir in doomed {
            remove_dir_if_present(&dir)?;
        }
        Ok(())
    }
}

// --- filesystem helpers --------------------------------------------------

fn modified(path: &Utf8Path) -> std::time::SystemTime {
    path.metadata()
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
}

fn dir_missing_or_empty(path: &Utf8Path) -> bool {
    match path.read_dir_utf8() {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

fn remove_dir_if_present(path: &Utf8Path) -> Result<(), RedirectError> {
    if path.is_dir() {
        std::fs::remove_dir_all(path.as_std_path()).map_err(|e| io_err(path, e))?;
    }
    Ok(())
}

fn remove_dir_all_checked(path: &Utf8Path) -> Result<(), RedirectError> {
    std::fs::remove_dir_all(path.as_std_path()).map_err(|e| io_err(path, e))
}

/// Recursive merge-copy; existing files are overwritten.
pub(crate) fn copy_dir_recursive(
    source: &Utf8Path,
    destination: &Utf8Path,
) -> Result<(), RedirectError> {
    std::fs::create_dir_all(destination.as_std_path()).map_err(|e| io_err(destination, e))?;
    for entry in source.read_dir_utf8().map_err(|e| io_err(source, e))? {
        let entry = entry.map_err(|e| io_err(source, e))?;
        let target = destination.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
        if file_type.is_dir() {
            copy_dir_recursive(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path().as_std_path(), target.as_std_path())
                .map_err(|e| io_err(&target, e))?;
        }
    }
    Ok(())
}

/// Rename with a copy-and-delete fallback for cross-device moves.
fn move_path(source: &Utf8Path, destination: &Utf8Path) -> Result<(), RedirectError> {
    if std::fs::rename(source.as_std_path(), destination.as_std_path()).is_ok() {
        return Ok(());
    }
    if source.is_dir() {
        copy_dir_recursive(source, destination)?;
        remove_dir_all_checked(source)
    } else {
        std::fs::copy(source.as_std_path(), destination.as_std_path())
            .map_err(|e| io_err(destination, e))?;
        std::fs::remove_file(source.as_std_path()).map_err(|e| io_err(source, e))
    }
}

fn matching_files(dir: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, RedirectError> {
    let matcher = glob::Pattern::new(pattern).map_err(|e| RedirectError::Pattern {
        pattern: pattern.to_string(),
        source: e,
    })?;
    let Ok(entries) = dir.read_dir_utf8() else {
        return Ok(Vec::new());
    };
    Ok(entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| matcher.matches(e.file_name()))
        .map(|e| e.into_path())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LauncherConfig;
    use crate::models::SessionSettings;
    use crate::platform::testing::DeniedLinks;
    use crate::platform::MockElevatedHelper;

    #[test]
    fn test_secure_enable_forwards_copy_to_helper() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        std::env::set_var("PORTA_SEC_UNIT", root.as_str());
        let profile = LauncherConfig {
            file_secure_map: vec![
                "%PORTA_SEC_UNIT%\\store\\hosts > %PORTA_SEC_UNIT%\\etc\\hosts".to_string(),
            ],
            ..LauncherConfig::default()
        };
        let ctx = crate::session::SessionContext::new(
            root.join("Launcher.exe"),
            profile,
            SessionSettings::default(),
            &[],
        );
        std::fs::create_dir_all(root.join("store")).unwrap();
        std::fs::write(root.join("store/hosts"), "x").unwrap();

        let mut helper = MockElevatedHelper::new();
        let expected_src = root.join("store/hosts");
        let expected_dest = root.join("etc/hosts");
        helper
            .expect_copy()
            .withf(move |src, dest| src == expected_src.as_path() && dest == expected_dest.as_path())
            .times(1)
            .returning(|_, _| Ok(()));

        let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);
        redirector.enable_secure_files();
    }

    #[test]
    fn test_secure_disable_forwards_delete_to_helper() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        std::env::set_var("PORTA_SEC_UNIT2", root.as_str());
        let profile = LauncherConfig {
            file_secure_map: vec![
                "%PORTA_SEC_UNIT2%\\store\\hosts > %PORTA_SEC_UNIT2%\\etc\\hosts".to_string(),
            ],
            ..LauncherConfig::default()
        };
        let ctx = crate::session::SessionContext::new(
            root.join("Launcher.exe"),
            profile,
            SessionSettings::default(),
            &[],
        );

        let mut helper = MockElevatedHelper::new();
        let expected = root.join("etc/hosts");
        helper
            .expect_delete()
            .withf(move |path| path == expected.as_path())
            .times(1)
            .returning(|_| Ok(()));

        let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);
        redirector.disable_secure_files();
    }

    #[test]
    fn test_dir_missing_or_empty() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        assert!(dir_missing_or_empty(&root.join("absent")));

        let empty = root.join("empty");
        std::fs::create_dir(&empty).unwrap();
        assert!(dir_missing_or_empty(&empty));

        std::fs::write(empty.join("f"), "x").unwrap();
        assert!(!dir_missing_or_empty(&empty));
    }

    #[test]
    fn test_copy_dir_recursive_merges() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let src = root.join("src");
        let dst = root.join("dst");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.txt"), "new").unwrap();
        std::fs::write(src.join("nested/b.txt"), "b").unwrap();
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::write(dst.join("a.txt"), "old").unwrap();
        std::fs::write(dst.join("keep.txt"), "kept").unwrap();

        copy_dir_recursive(&src, &dst).unwrap();
        assert_eq!(std::fs::read_to_string(dst.join("a.txt")).unwrap(), "new");
        assert_eq!(std::fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "b");
        assert_eq!(std::fs::read_to_string(dst.join("keep.txt")).unwrap(), "kept");
    }

    #[test]
    fn test_matching_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        std::fs::write(root.join("a.log"), "").unwrap();
        std::fs::write(root.join("b.log"), "").unwrap();
        std::fs::write(root.join("c.txt"), "").unwrap();

        let mut names: Vec<String> = matching_files(&root, "*.log")
            .unwrap()
            .into_iter()
            .filter_map(|p| p.file_name().map(str::to_string))
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.log", "b.log"]);

        assert!(matching_files(&root.join("absent"), "*.log").unwrap().is_empty());
    }
}
