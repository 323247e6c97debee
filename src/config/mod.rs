use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, File, FileFormat};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::models::{SessionSettings, WatchGranularity, WildcardRetention, WindowState};

/// Typed launcher configuration, populated once from the profile's opaque
/// key→string map. The engine reads these fields; it never looks up raw
/// keys.
///
/// Paths may still contain `%VAR%` environment references; the session
/// context expands them when it resolves the mapping tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub app_dir: String,
    /// The target binary; the file name may contain a wildcard, resolved at
    /// session start to the lexicographically-last match.
    pub app_path: String,
    /// Extra directories whose executables join the dependent-process watch.
    pub app_wait_dirs: Vec<String>,
    pub watch: WatchGranularity,
    pub data_dir: String,
    /// Default session config written on first run.
    pub def_ini: String,
    /// Default registry settings applied when no durable snapshot exists.
    pub def_reg: String,
    /// Directory holding first-run default settings.
    pub def_settings_dir: String,
    /// Directory redirections, one `%VAR%`-style path per line.
    pub dir_map: Vec<String>,
    pub elevate_first: bool,
    /// File redirections, one `%VAR%`-style file path per line.
    pub file_map: Vec<String>,
    /// Force the copy tier for every file mapping.
    pub file_map_simple: bool,
    /// Elevation-bound copies, one `source > destination` pair per line.
    pub file_secure_map: Vec<String>,
    /// Registry overrides applied after key redirection.
    pub force_reg: String,
    pub ignored_processes: Vec<String>,
    /// Registry keys to redirect.
    pub reg_keys: Vec<String>,
    /// Scratch directories removed at cleanup; may contain wildcards.
    pub rm_dirs: Vec<String>,
    /// Registry config applied at cleanup.
    pub rm_reg: String,
    /// Registry keys removed at cleanup.
    pub rm_reg_keys: Vec<String>,
    pub settings_dir: String,
    pub updater_path: String,
    pub wildcard_retention: WildcardRetention,
}

impl LauncherConfig {
    /// Builds the typed configuration from the raw profile map. Unknown keys
    /// are ignored; missing keys yield empty values, which downstream code
    /// treats as "feature not configured".
    pub fn from_map(raw: &IndexMap<String, String>) -> Self {
        let get = |key: &str| raw.get(key).map(String::as_str).unwrap_or("").to_string();
        let list = |key: &str| split_lines(&get(key));

        Self {
            app_dir: get("AppDir"),
            app_path: get("AppPath"),
            app_wait_dirs: list("AppWaitDirs"),
            watch: WatchGranularity::parse(&get("AppWaitFull")),
            data_dir: get("DataDir"),
            def_ini: get("DefIni"),
            def_reg: get("DefReg"),
            def_settings_dir: get("DefSettingsDir"),
            dir_map: list("DirMap"),
            elevate_first: get("ElevateFirst").eq_ignore_ascii_case("true"),
            file_map: list("FileMap"),
            file_map_simple: get("FileMapSimple").eq_ignore_ascii_case("true"),
            file_secure_map: list("FileSecureMap"),
            force_reg: get("ForceReg"),
            ignored_processes: get("IgnoredProcesses")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            reg_keys: list("RegKeys"),
            rm_dirs: list("RmDirs"),
            rm_reg: get("RmReg"),
            rm_reg_keys: list("RmRegKeys"),
            settings_dir: get("SettingsDir"),
            updater_path: get("UpdaterPath"),
            wildcard_retention: WildcardRetention::parse(&get("WildcardRetention")),
        }
    }

    /// Loads the profile file (a YAML key→string map) next to the launcher.
    ///
    /// # Returns
    /// The typed configuration; an absent profile yields the empty default.
    pub fn load(profile_path: &Utf8Path) -> Result<Self> {
        if !profile_path.exists() {
            tracing::warn!("profile not found at {profile_path}, using empty configuration");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(profile_path)
            .with_context(|| format!("Failed to read profile: {profile_path}"))?;
        let raw: IndexMap<String, String> = serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("Failed to parse profile: {profile_path}"))?;
        tracing::info!("Loaded profile from {} ({} keys)", profile_path, raw.len());
        Ok(Self::from_map(&raw))
    }
}

fn split_lines(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Loads the session config file (INI) into typed settings.
///
/// Missing file or missing keys yield defaults; a malformed file degrades to
/// defaults with a warning, never an abort. Section and key lookups are
/// case-insensitive.
pub fn load_session_settings(path: &Utf8Path) -> SessionSettings {
    let table: IndexMap<String, IndexMap<String, String>> = match Config::builder()
        .add_source(File::new(path.as_str(), FileFormat::Ini).required(false))
        .build()
        .and_then(|cfg| cfg.try_deserialize())
    {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!("Failed to parse session config {path}: {e}");
            return SessionSettings::default();
        }
    };

    let section = |name: &str| {
        table
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    };
    let value = |sec: &str, key: &str| {
        section(sec)
            .and_then(|values| values.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)))
            .map(|(_, v)| v.trim().to_string())
    };
    let flag = |sec: &str, key: &str| {
        value(sec, key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    };

    let mut redist = IndexMap::new();
    if let Some(values) = section("Redist") {
        for (name, raw) in values {
            match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => redist.insert(name.clone(), true),
                "false" | "0" => redist.insert(name.clone(), false),
                _ => None,
            };
        }
    }

    let java_path = value("Java", "Path")
        .filter(|raw| !raw.is_empty())
        .map(Utf8PathBuf::from);

    let start_arguments = value("Settings", "StartArguments")
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| "{0}".to_string());

    SessionSettings {
        force_admin: flag("Settings", "ForceAdmin"),
        force_non_admin: flag("Settings", "ForceNonAdmin"),
        hide_in_taskbar: flag("Settings", "HideInTaskbar"),
        start_arguments,
        sorted_start_arguments: flag("Settings", "SortedStartArguments"),
        window_state: WindowState::parse(
            &value("Settings", "WindowState").unwrap_or_default(),
        ),
        window_title: value("Settings", "WindowTitle").unwrap_or_default(),
        java_path,
        redist,
    }
}

/// Writes one `key=value` entry into an INI file, creating the file and the
/// section as needed and replacing an existing entry in place.
pub fn write_ini_value(path: &Utf8Path, section: &str, key: &str, value: &str) -> Result<()> {
    let content = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?
    } else {
        String::new()
    };

    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let header = format!("[{section}]");
    let section_start = lines
        .iter()
        .position(|line| line.trim().eq_ignore_ascii_case(&header));

    match section_start {
        None => {
            if !lines.is_empty() && !lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push(header);
            lines.push(format!("{key}={value}"));
        }
        Some(start) => {
            let end = lines[start + 1..]
                .iter()
                .position(|line| line.trim().starts_with('['))
                .map(|offset| start + 1 + offset)
                .unwrap_or(lines.len());
            let existing = lines[start + 1..end].iter().position(|line| {
                line.split('=')
                    .next()
                    .is_some_and(|k| k.trim().eq_ignore_ascii_case(key))
            });
            match existing {
                Some(offset) => lines[start + 1 + offset] = format!("{key}={value}"),
                None => lines.insert(end, format!("{key}={value}")),
            }
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {parent}"))?;
    }
    fs::write(path, lines.join("\n") + "\n").with_context(|| format!("Failed to write {path}"))
}

/// Expands the start-argument template: `{0}` receives the launcher's
/// forwarded command line, optionally sorted.
pub fn format_start_arguments(template: &str, forwarded: &[String], sorted: bool) -> String {
    let mut args = forwarded.to_vec();
    if sorted {
        args.sort();
    }
    let quoted: Vec<String> = args
        .iter()
        .map(|a| {
            if a.contains(char::is_whitespace) {
                format!("\"{a}\"")
            } else {
                a.clone()
            }
        })
        .collect();
    template.replace("{0}", quoted.join(" ").trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_root(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_from_map_lists_and_flags() {
        let mut raw = IndexMap::new();
        raw.insert("AppPath".to_string(), "%CurDir%\\App\\tool.exe".to_string());
        raw.insert(
            "DirMap".to_string(),
            "%AppData%\\Vendor\n\n%LocalAppData%\\Vendor\n".to_string(),
        );
        raw.insert("IgnoredProcesses".to_string(), "crash.exe, updater.exe".to_string());
        raw.insert("AppWaitFull".to_string(), "extended".to_string());
        raw.insert("ElevateFirst".to_string(), "True".to_string());

        let cfg = LauncherConfig::from_map(&raw);
        assert_eq!(cfg.dir_map.len(), 2);
        assert_eq!(cfg.ignored_processes, vec!["crash.exe", "updater.exe"]);
        assert_eq!(cfg.watch, WatchGranularity::Extended);
        assert!(cfg.elevate_first);
        assert!(cfg.reg_keys.is_empty());
    }

    #[test]
    fn test_load_missing_profile_is_empty() {
        let temp = TempDir::new().unwrap();
        let path = utf8_root(&temp).join("absent.yaml");
        let cfg = LauncherConfig::load(&path).unwrap();
        assert!(cfg.app_path.is_empty());
    }

    #[test]
    fn test_load_profile_yaml() {
        let temp = TempDir::new().unwrap();
        let path = utf8_root(&temp).join("launcher.yaml");
        fs::write(
            &path,
            "AppPath: \"%CurDir%/App/tool.exe\"\nRegKeys: |\n  HKCU\\Software\\Vendor\n  HKCU\\Software\\Tool\n",
        )
        .unwrap();

        let cfg = LauncherConfig::load(&path).unwrap();
        assert_eq!(cfg.app_path, "%CurDir%/App/tool.exe");
        assert_eq!(cfg.reg_keys.len(), 2);
    }

    #[test]
    fn test_session_settings_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = load_session_settings(&utf8_root(&temp).join("absent.ini"));
        assert!(!settings.force_admin);
        assert_eq!(settings.start_arguments, "{0}");
        assert_eq!(settings.window_state, WindowState::Normal);
    }

    #[test]
    fn test_session_settings_parse() {
        let temp = TempDir::new().unwrap();
        let path = utf8_root(&temp).join("launcher.ini");
        fs::write(
            &path,
            "[Settings]\nForceAdmin=true\nHideInTaskbar=true\nWindowState=ShowMinimized\nWindowTitle=My App\n\n[Java]\nPath=%CurDir%/Java/javaw.exe\n\n[Redist]\nVC2017X64=true\n",
        )
        .unwrap();

        let settings = load_session_settings(&path);
        assert!(settings.force_admin);
        assert!(settings.hide_in_taskbar);
        assert_eq!(settings.window_state, WindowState::Minimized);
        assert_eq!(settings.window_title, "My App");
        assert_eq!(
            settings.java_path.as_deref().map(|p| p.as_str()),
            Some("%CurDir%/Java/javaw.exe")
        );
        assert_eq!(settings.redist.get("VC2017X64"), Some(&true));
    }

    #[test]
    fn test_write_ini_value_creates_and_replaces() {
        let temp = TempDir::new().unwrap();
        let path = utf8_root(&temp).join("launcher.ini");

        write_ini_value(&path, "Java", "Path", "/opt/java/javaw").unwrap();
        let settings = load_session_settings(&path);
        assert_eq!(
            settings.java_path.as_deref().map(|p| p.as_str()),
            Some("/opt/java/javaw")
        );

        write_ini_value(&path, "Java", "Path", "/new/javaw").unwrap();
        write_ini_value(&path, "Redist", "VC2017X64", "true").unwrap();
        let settings = load_session_settings(&path);
        assert_eq!(
            settings.java_path.as_deref().map(|p| p.as_str()),
            Some("/new/javaw")
        );
        assert_eq!(settings.redist.get("VC2017X64"), Some(&true));

        // The rewritten file still holds exactly one Java section.
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("[Java]").count(), 1);
    }

    #[test]
    fn test_format_start_arguments() {
        let forwarded = vec!["b".to_string(), "a file.txt".to_string()];
        assert_eq!(
            format_start_arguments("{0}", &forwarded, false),
            "b \"a file.txt\""
        );
        assert_eq!(
            format_start_arguments("--open {0}", &forwarded, true),
            "--open \"a file.txt\" b"
        );
        assert_eq!(format_start_arguments("{0}", &[], false), "");
    }
}
