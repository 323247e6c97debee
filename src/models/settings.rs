use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Window state applied to the target's main window once it appears.
///
/// Parses the session config's `WindowState` value; the accepted names match
/// the classic show-window vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WindowState {
    #[default]
    Normal,
    Minimized,
    Maximized,
    Hidden,
}

impl WindowState {
    /// Parses a `WindowState` config value, defaulting to [`Self::Normal`]
    /// for unknown names.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "showminimized" | "minimized" | "minimize" => Self::Minimized,
            "showmaximized" | "maximized" | "maximize" => Self::Maximized,
            "hide" | "hidden" => Self::Hidden,
            _ => Self::Normal,
        }
    }
}

/// How the coordinator scans for dependent processes while waiting for
/// quiescence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WatchGranularity {
    /// Wait only on the exact launched process; no directory scanning.
    ExactProcess,
    /// Watch the app's install and data directories, matching by file name.
    #[default]
    AppDirectories,
    /// Watch the app's install and data directories, matching by full path.
    AppDirectoriesByPath,
    /// Watch the entire portable-media root plus every directory referenced
    /// by any mapping.
    Extended,
}

impl WatchGranularity {
    /// Parses the profile's `AppWaitFull` value.
    ///
    /// The historical vocabulary is kept: `null` disables scanning entirely,
    /// `true` switches to full-path matching, `extended` widens the watch
    /// set; anything else is the default name-matched watch.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "null" => Self::ExactProcess,
            "true" => Self::AppDirectoriesByPath,
            "extended" => Self::Extended,
            _ => Self::AppDirectories,
        }
    }
}

/// Retention policy for wildcard scratch-directory cleanup.
///
/// When a removal path contains a wildcard component, the matches are sorted
/// by file name. `KeepNewestByName` retains the lexicographically-last match
/// on the assumption that name order tracks recency — a heuristic, not a
/// guarantee; profiles relying on timestamped names get the intended result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WildcardRetention {
    #[default]
    KeepNewestByName,
    /// Delete every match.
    KeepNone,
}

impl WildcardRetention {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "keepnone" => Self::KeepNone,
            _ => Self::KeepNewestByName,
        }
    }
}

/// Typed view of the session config file's `Settings`, `Java` and `Redist`
/// sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Re-launch elevated before doing anything else.
    pub force_admin: bool,
    /// Drop elevation when starting the target.
    pub force_non_admin: bool,
    /// Remove the target's taskbar tab once its main window appears.
    pub hide_in_taskbar: bool,
    /// Argument template for the target; `{0}` receives the forwarded
    /// launcher command line.
    pub start_arguments: String,
    /// Sort forwarded command-line arguments before substitution.
    pub sorted_start_arguments: bool,
    pub window_state: WindowState,
    /// Optional window title used to find the handle the window tweaks
    /// apply to.
    pub window_title: String,
    /// Saved Java runtime path (`[Java] Path`).
    pub java_path: Option<Utf8PathBuf>,
    /// Per-redistributable consent record (`[Redist]`): `true` means the
    /// package stays installed after the run.
    pub redist: IndexMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_state_parse() {
        assert_eq!(WindowState::parse("ShowNormal"), WindowState::Normal);
        assert_eq!(WindowState::parse("ShowMinimized"), WindowState::Minimized);
        assert_eq!(WindowState::parse("ShowMaximized"), WindowState::Maximized);
        assert_eq!(WindowState::parse("Hide"), WindowState::Hidden);
        assert_eq!(WindowState::parse("garbage"), WindowState::Normal);
    }

    #[test]
    fn test_watch_granularity_parse() {
        assert_eq!(WatchGranularity::parse("null"), WatchGranularity::ExactProcess);
        assert_eq!(WatchGranularity::parse("True"), WatchGranularity::AppDirectoriesByPath);
        assert_eq!(WatchGranularity::parse("Extended"), WatchGranularity::Extended);
        assert_eq!(WatchGranularity::parse(""), WatchGranularity::AppDirectories);
        assert_eq!(WatchGranularity::parse("false"), WatchGranularity::AppDirectories);
    }

    #[test]
    fn test_wildcard_retention_parse() {
        assert_eq!(WildcardRetention::parse("none"), WildcardRetention::KeepNone);
        assert_eq!(WildcardRetention::parse(""), WildcardRetention::KeepNewestByName);
    }
}
