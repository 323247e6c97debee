//! Java runtime discovery for `.jar` targets.
//!
//! Candidates are evaluated in a fixed priority order, first hit wins:
//! the path saved in the session config, the suite-wide installation, an
//! upward scan of the portable media, and finally the host's own Java
//! directories. A hit is persisted back into the session config so the next
//! run starts at tier one.

use camino::{Utf8Path, Utf8PathBuf};

use crate::config;
use crate::session::SessionContext;

/// Launch parameter that turns a Java runtime invocation into an archive
/// launch.
pub const JAVA_START_PARAMETER: &str = "-jar";

/// Subdirectories probed at each level of the upward media scan.
const MEDIA_SUBDIRS: &[&str] = &[
    "_CommonFiles/Java64",
    "CommonFiles/Java64",
    "_CommonFiles/Java",
    "CommonFiles/Java",
];

pub struct JavaLocator<'a> {
    ctx: &'a SessionContext,
}

impl<'a> JavaLocator<'a> {
    pub fn new(ctx: &'a SessionContext) -> Self {
        Self { ctx }
    }

    /// Finds the Java runtime binary, persisting a hit into the session
    /// config.
    ///
    /// # Returns
    /// The `javaw` path, or `None` when no tier produced one.
    pub fn find(&self) -> Option<Utf8PathBuf> {
        let found = self
            .from_config()
            .or_else(|| self.from_suite())
            .or_else(|| self.from_media_scan())
            .or_else(|| self.from_system());

        match &found {
            Some(path) => {
                tracing::info!("Java runtime at {path}");
                if let Err(e) =
                    config::write_ini_value(&self.ctx.config_path, "Java", "Path", path.as_str())
                {
                    tracing::warn!("failed to persist Java path: {e}");
                }
            }
            None => tracing::error!("no Java runtime found"),
        }
        found
    }

    fn from_config(&self) -> Option<Utf8PathBuf> {
        let raw = self.ctx.settings.java_path.as_deref()?;
        let path = self.ctx.expand(raw.as_str());
        path.is_file().then_some(path)
    }

    fn from_suite(&self) -> Option<Utf8PathBuf> {
        let suite_dir = Utf8PathBuf::from(std::env::var("AppsSuiteDir").ok()?);
        if !suite_dir.is_dir() {
            return None;
        }
        let common = suite_dir.join("Apps").join("CommonFiles");
        find_javaw(&common.join("Java64")).or_else(|| find_javaw(&common.join("Java")))
    }

    /// Walks upward from the launcher directory towards the media root,
    /// probing the common-files layouts at every level.
    fn from_media_scan(&self) -> Option<Utf8PathBuf> {
        let mut dir = self.ctx.exe_dir.clone();
        loop {
            for sub in MEDIA_SUBDIRS {
                if let Some(path) = find_javaw(&dir.join(sub)) {
                    return Some(path);
                }
            }
            match dir.parent() {
                Some(parent) if parent != dir => dir = parent.to_path_buf(),
                _ => return None,
            }
        }
    }

    fn from_system(&self) -> Option<Utf8PathBuf> {
        let candidates = [
            "%ProgramFiles%\\Java",
            "%ProgramFiles(x86)%\\Java",
            "%ProgramData%\\Oracle\\Java\\javapath",
        ];
        candidates
            .iter()
            .map(|raw| self.ctx.expand(raw))
            .find_map(|dir| find_javaw(&dir))
    }
}

/// Recursive search for the `javaw` binary below `dir`.
fn find_javaw(dir: &Utf8Path) -> Option<Utf8PathBuf> {
    let entries = dir.read_dir_utf8().ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            subdirs.push(entry.into_path());
        } else {
            let name = entry.file_name();
            if name.eq_ignore_ascii_case("javaw.exe") || name == "javaw" {
                return Some(entry.into_path());
            }
        }
    }
    subdirs.iter().find_map(|sub| find_javaw(sub))
}
