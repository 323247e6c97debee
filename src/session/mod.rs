//! Session context: every path, id and mapping table the run needs,
//! resolved once at startup and passed by reference for the session's
//! lifetime. No component reads configuration lazily or through globals.

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::config::{self, LauncherConfig};
use crate::models::{Mapping, MappingKind, SessionSettings};

/// Registry namespace shared by all launchers of the suite; sibling
/// launchers discover each other's advertised entries below it.
pub const REG_BASE: &str = "HKCU\\Software\\Portable Apps Suite";

/// The resolved, immutable state of one launcher session.
#[derive(Debug)]
pub struct SessionContext {
    /// Launcher executable name without extension; scopes the instance lock
    /// and the coordination registry key.
    pub app_name: String,
    pub exe_path: Utf8PathBuf,
    pub exe_dir: Utf8PathBuf,
    /// Session config file beside the launcher (`<exe-stem>.ini`).
    pub config_path: Utf8PathBuf,
    pub profile: LauncherConfig,
    pub settings: SessionSettings,
    /// The target's install directory.
    pub app_dir: Utf8PathBuf,
    /// Wildcard-resolved target binary; `None` when unconfigured or no
    /// wildcard match exists.
    pub app_path: Option<Utf8PathBuf>,
    pub data_dir: Utf8PathBuf,
    pub settings_dir: Utf8PathBuf,
    pub temp_dir: Utf8PathBuf,
    /// Durable per-application registry snapshot.
    pub reg_file_path: Utf8PathBuf,
    /// The launcher's own coordination key below [`REG_BASE`].
    pub reg_path: String,
    pub machine_id: u32,
    /// Final argument string for the target, template already applied.
    pub start_arguments: String,
    pub updater_path: Option<Utf8PathBuf>,
    pub def_settings_dir: Option<Utf8PathBuf>,
    pub app_wait_dirs: Vec<Utf8PathBuf>,
    pub dir_mappings: Vec<Mapping>,
    pub file_mappings: Vec<Mapping>,
    pub secure_mappings: Vec<Mapping>,
    env_pattern: Regex,
}

impl SessionContext {
    /// Resolves the session from the launcher location, the translated
    /// profile and the session settings.
    ///
    /// # Arguments
    /// * `exe_path` - Full path of the launcher executable
    /// * `profile` - Translated launcher profile
    /// * `settings` - Session INI settings
    /// * `forwarded_args` - Command-line arguments to substitute into the
    ///   start-argument template
    pub fn new(
        exe_path: Utf8PathBuf,
        profile: LauncherConfig,
        settings: SessionSettings,
        forwarded_args: &[String],
    ) -> Self {
        let env_pattern = Regex::new(r"%([^%\\/]+)%").expect("invalid env pattern");
        let exe_dir = exe_path
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        let app_name = exe_path.file_stem().unwrap_or("portalizer").to_string();
        let config_path = exe_dir.join(format!("{app_name}.ini"));

        let expand = |raw: &str| expand_env(&env_pattern, &exe_dir, raw);

        let data_dir = {
            let raw = if profile.data_dir.trim().is_empty() {
                "%CurDir%\\Data"
            } else {
                profile.data_dir.as_str()
            };
            expand(raw)
        };
        let settings_dir = {
            let raw = if profile.settings_dir.trim().is_empty() {
                "%CurDir%\\Data"
            } else {
                profile.settings_dir.as_str()
            };
            expand(raw)
        };
        let app_dir = if profile.app_dir.trim().is_empty() {
            exe_dir.join("App")
        } else {
            expand(&profile.app_dir)
        };
        let temp_dir = data_dir.join("Temp");

        let app_path = resolve_app_path(&profile.app_path, &expand);
        let updater_path = non_empty(&profile.updater_path).map(|raw| expand(raw));
        let def_settings_dir = non_empty(&profile.def_settings_dir).map(|raw| expand(raw));
        let app_wait_dirs = profile.app_wait_dirs.iter().map(|raw| expand(raw)).collect();

        let dir_mappings = build_env_mappings(
            &profile.dir_map,
            MappingKind::Directory,
            &data_dir,
            &expand,
        );
        let file_mappings =
            build_env_mappings(&profile.file_map, MappingKind::File, &data_dir, &expand);
        let secure_mappings = build_secure_mappings(&profile.file_secure_map, &expand);

        let start_arguments = config::format_start_arguments(
            &settings.start_arguments,
            forwarded_args,
            settings.sorted_start_arguments,
        );
        let reg_file_path = data_dir.join("settings.reg");

        Self {
            reg_path: format!("{REG_BASE}\\{app_name}"),
            app_name,
            exe_path,
            exe_dir,
            config_path,
            profile,
            settings,
            app_dir,
            app_path,
            data_dir,
            settings_dir,
            temp_dir,
            reg_file_path,
            machine_id: machine_id(),
            start_arguments,
            updater_path,
            def_settings_dir,
            app_wait_dirs,
            dir_mappings,
            file_mappings,
            secure_mappings,
            env_pattern,
        }
    }

    /// Expands `%VAR%` references against the process environment;
    /// `%CurDir%` resolves to the launcher directory.
    pub fn expand(&self, raw: &str) -> Utf8PathBuf {
        expand_env(&self.env_pattern, &self.exe_dir, raw)
    }

    /// The session marker: present exactly while redirection is active and
    /// the target is (or was) running.
    pub fn session_marker(&self) -> Utf8PathBuf {
        self.temp_dir.join("instance.ready")
    }

    /// Per-operation-kind marker detecting an Enable that never cleanly
    /// disabled.
    pub fn operation_marker(&self, operation: &str) -> Utf8PathBuf {
        self.temp_dir.join(format!("{operation}.active"))
    }

    /// Pre-Enable registry backup script for this machine.
    pub fn registry_backup_script(&self) -> Utf8PathBuf {
        self.temp_dir
            .join(format!("registry-backup-{{{}}}.reg", self.machine_id))
    }

    /// Scratch script for rendered registry overrides.
    pub fn registry_override_script(&self) -> Utf8PathBuf {
        self.temp_dir
            .join(format!("registry-override-{{{}}}.reg", self.machine_id))
    }

    /// Whether the resolved target is a Java archive needing a runtime.
    pub fn is_jar_target(&self) -> bool {
        self.app_path
            .as_deref()
            .and_then(Utf8Path::extension)
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"))
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Stable per-host id (FNV-1a over the host name); keeps backup slots from
/// different machines apart when the data store travels.
pub fn machine_id() -> u32 {
    let host = std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    let mut hash: u32 = 0x811c_9dc5;
    for byte in host.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn expand_env(pattern: &Regex, cur_dir: &Utf8Path, raw: &str) -> Utf8PathBuf {
    let raw = if cfg!(windows) {
        raw.to_string()
    } else {
        raw.replace('\\', "/")
    };
    let expanded = pattern.replace_all(&raw, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        if name.eq_ignore_ascii_case("curdir") {
            return cur_dir.to_string();
        }
        std::env::var(name)
            .or_else(|_| std::env::var(name.to_uppercase()))
            .unwrap_or_else(|_| caps[0].to_string())
    });
    Utf8PathBuf::from(expanded.into_owned())
}

/// The backing-store slot for an env-var-shaped path: the path below
/// `<data-dir>/Environment` with the `%` markers stripped.
fn environment_slot(data_dir: &Utf8Path, raw: &str) -> Utf8PathBuf {
    let stripped: String = raw.chars().filter(|c| *c != '%' && *c != ':').collect();
    let relative = if cfg!(windows) {
        stripped
    } else {
        stripped.replace('\\', "/")
    };
    let relative = relative.trim_start_matches(['/', '\\']);
    data_dir.join("Environment").join(relative)
}

fn build_env_mappings(
    lines: &[String],
    kind: MappingKind,
    data_dir: &Utf8Path,
    expand: &impl Fn(&str) -> Utf8PathBuf,
) -> Vec<Mapping> {
    let mut mappings = Vec::new();
    for line in lines {
        if !line.contains('%') {
            tracing::warn!("skipping mapping without environment reference: {line}");
            continue;
        }
        let source = expand(line);
        let destination = environment_slot(data_dir, line);
        if mappings.iter().any(|m: &Mapping| m.source == source) {
            continue;
        }
        mappings.push(Mapping::new(source, destination, kind));
    }
    mappings
}

fn build_secure_mappings(
    lines: &[String],
    expand: &impl Fn(&str) -> Utf8PathBuf,
) -> Vec<Mapping> {
    let mut mappings = Vec::new();
    for line in lines {
        let mut parts = line.splitn(2, '>');
        let (Some(src), Some(dest)) = (parts.next(), parts.next()) else {
            tracing::warn!("skipping malformed secure mapping: {line}");
            continue;
        };
        let (src, dest) = (src.trim(), dest.trim());
        if src.is_empty() || dest.is_empty() || src.eq_ignore_ascii_case(dest) {
            tracing::warn!("skipping malformed secure mapping: {line}");
            continue;
        }
        mappings.push(Mapping::new(expand(src), expand(dest), MappingKind::FileSecure));
    }
    mappings
}

/// Resolves the configured app path; a wildcard file name picks the
/// lexicographically-last match in its directory.
fn resolve_app_path(raw: &str, expand: &impl Fn(&str) -> Utf8PathBuf) -> Option<Utf8PathBuf> {
    let raw = non_empty(raw)?;
    let expanded = expand(raw);
    let name = expanded.file_name()?;
    if !name.contains('*') && !name.contains('?') {
        return Some(expanded);
    }

    let dir = expanded.parent()?;
    let mut pattern = name.to_string();
    while pattern.contains("**") {
        pattern = pattern.replace("**", "*");
    }
    let matcher = glob::Pattern::new(&pattern).ok()?;
    let entries = dir.read_dir_utf8().ok()?;
    let mut matches: Vec<Utf8PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| matcher.matches(e.file_name()))
        .map(|e| e.into_path())
        .collect();
    if matches.is_empty() {
        tracing::warn!("no file matches app path pattern {expanded}");
        return None;
    }
    matches.sort();
    matches.pop()
}
