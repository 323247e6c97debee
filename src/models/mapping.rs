use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// The kind of resource a [`Mapping`] redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingKind {
    /// A whole directory tree.
    Directory,
    /// A single file (or a wildcard set of files).
    File,
    /// A file whose source requires elevation; handled by the elevated
    /// helper, never linked or touched in-process.
    FileSecure,
    /// A registry key path.
    RegistryKey,
}

/// How a mapping is (attempted to be) applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectMode {
    /// Symbolic link from source to destination; preferred when permitted.
    Link,
    /// Copy content both ways; the fallback tier, and the only tier for
    /// wildcard mappings and the secure variant.
    Copy,
}

/// One redirection unit: the path the app expects (`source`) and the durable
/// backing location inside the portable data store (`destination`).
///
/// A source whose file name contains `*` or `?` is a *wildcard mapping*: it
/// stands for the set of files matching the pattern, is always copy-only, and
/// never owns a backup slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub source: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    pub kind: MappingKind,
}

impl Mapping {
    pub fn new(
        source: impl Into<Utf8PathBuf>,
        destination: impl Into<Utf8PathBuf>,
        kind: MappingKind,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            kind,
        }
    }

    /// Whether this mapping's source is a pattern over a set of files.
    pub fn is_wildcard(&self) -> bool {
        self.source
            .file_name()
            .is_some_and(|name| name.contains('*') || name.contains('?'))
    }

    /// The backup slot path for this mapping's source.
    ///
    /// Exactly one backup slot may exist per non-wildcard mapping at any
    /// time; the machine id keeps slots from different hosts apart when the
    /// data store travels on removable media.
    pub fn backup_slot(&self, machine_id: u32) -> Utf8PathBuf {
        backup_slot_for(&self.source, machine_id)
    }

    /// Splits a wildcard source into its parent directory and file pattern.
    ///
    /// # Returns
    /// `None` when the source is not a wildcard mapping or has no parent.
    pub fn wildcard_parts(&self) -> Option<(&Utf8Path, &str)> {
        if !self.is_wildcard() {
            return None;
        }
        Some((self.source.parent()?, self.source.file_name()?))
    }
}

/// Backup slot naming shared with the redirector: `<path>-{<machine-id>}.backup`.
pub fn backup_slot_for(path: &Utf8Path, machine_id: u32) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}-{{{machine_id}}}.backup"))
}
