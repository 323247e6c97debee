use camino::Utf8PathBuf;
use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;

use crate::platform::{ElevatedHelper, PlatformError, RegValue, Registry};
use crate::session::SessionContext;

/// Name of the multi-string value recording the currently redirected key
/// paths under the launcher's own registry key.
pub const REG_KEYS_VALUE: &str = "RegKeys";

/// Override document: section → values. A `None` section body (or a section
/// whose name carries a leading `-`) deletes the whole key; a `None` value
/// deletes that entry.
pub type OverrideMap = IndexMap<String, Option<IndexMap<String, Option<String>>>>;

/// A registry removal deferred until the cleanup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredRemoval {
    Key(String),
    Entry { key: String, name: String },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Relocates registry subtrees and values, reversibly, and renders one-shot
/// override scripts.
pub struct RegistryRedirector<'a> {
    ctx: &'a SessionContext,
    registry: &'a dyn Registry,
    helper: &'a dyn ElevatedHelper,
}

impl<'a> RegistryRedirector<'a> {
    pub fn new(
        ctx: &'a SessionContext,
        registry: &'a dyn Registry,
        helper: &'a dyn ElevatedHelper,
    ) -> Self {
        Self { ctx, registry, helper }
    }

    /// Enables key redirection for the listed keys.
    ///
    /// When the redirection record is absent and any listed key currently
    /// exists on the host, the keys are exported to the pre-Enable backup
    /// script and deleted live. The record is then written, and a durable
    /// snapshot from a previous session is imported back into the now-empty
    /// keys.
    pub fn enable_keys(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        if !self.registry.key_exists(&self.ctx.reg_path) {
            if let Err(e) = self.registry.create_key(&self.ctx.reg_path) {
                tracing::error!("failed to create {}: {e}", self.ctx.reg_path);
                return;
            }
        }

        let already_active = self.registry.value_exists(&self.ctx.reg_path, REG_KEYS_VALUE);
        if !already_active && keys.iter().any(|key| self.registry.key_exists(key)) {
            let backup = self.ctx.registry_backup_script();
            if let Err(e) = std::fs::create_dir_all(self.ctx.temp_dir.as_std_path()) {
                tracing::error!("failed to create {}: {e}", self.ctx.temp_dir);
            }
            // Never clobber a backup script left by an interrupted run.
            if !backup.exists() {
                if let Err(e) = self.registry.export_keys(&backup, keys) {
                    tracing::error!("pre-enable registry export failed: {e}");
                }
            }
            for key in keys {
                if let Err(e) = self.registry.delete_key(key) {
                    tracing::warn!("failed to delete {key}: {e}");
                }
            }
        }

        if let Err(e) = self.registry.write_value(
            &self.ctx.reg_path,
            Some(REG_KEYS_VALUE),
            RegValue::MultiSz(keys.to_vec()),
        ) {
            tracing::error!("failed to write redirection record: {e}");
        }

        if self.ctx.reg_file_path.is_file() {
            if let Err(e) = self.registry.import_file(&self.ctx.reg_file_path) {
                tracing::error!("failed to import {}: {e}", self.ctx.reg_file_path);
            }
        }
    }

    /// Disables key redirection: snapshots the live keys durably, deletes
    /// them, clears the record, and restores the host's pre-Enable backup.
    pub fn disable_keys(&self, keys: &[String]) {
        if !keys.is_empty() {
            if let Err(e) = std::fs::create_dir_all(self.ctx.data_dir.as_std_path()) {
                tracing::error!("failed to create {}: {e}", self.ctx.data_dir);
            }
            if let Err(e) = self.registry.export_keys(&self.ctx.reg_file_path, keys) {
                tracing::error!("durable registry snapshot failed: {e}");
            }
            for key in keys {
                if let Err(e) = self.registry.delete_key(key) {
                    tracing::warn!("failed to delete {key}: {e}");
                }
            }
            if let Err(e) = self.registry.delete_value(&self.ctx.reg_path, REG_KEYS_VALUE) {
                tracing::warn!("failed to clear redirection record: {e}");
            }
        }

        let backup = self.ctx.registry_backup_script();
        if backup.is_file() {
            if let Err(e) = self.registry.import_file(&backup) {
                tracing::error!("failed to restore registry backup: {e}");
            }
            if let Err(e) = std::fs::remove_file(backup.as_std_path()) {
                tracing::warn!("failed to remove {backup}: {e}");
            }
        }
    }

    /// Renders the override map into a registry script and imports it
    /// through the privileged path. One-shot, not reversible.
    pub fn secure_overrides(&self, overrides: &OverrideMap) -> Result<(), RegistryError> {
        if overrides.is_empty() {
            return Ok(());
        }
        let file = self.ctx.registry_override_script();
        std::fs::create_dir_all(self.ctx.temp_dir.as_std_path()).map_err(|e| {
            RegistryError::Io {
                path: self.ctx.temp_dir.clone(),
                source: e,
            }
        })?;
        let lines = render_script(overrides);
        std::fs::write(file.as_std_path(), lines.join("\r\n")).map_err(|e| RegistryError::Io {
            path: file.clone(),
            source: e,
        })?;
        self.registry.import_file(&file)?;
        self.helper.wait_then_delete(&file, 10)?;
        Ok(())
    }

    /// Removes the given keys via a deletion-only override script. Bare hive
    /// roots are refused.
    pub fn remove_keys(&self, keys: &[String]) {
        let mut overrides = OverrideMap::new();
        for key in keys {
            if is_hive_root(key) {
                tracing::warn!("refusing to remove hive root {key}");
                continue;
            }
            overrides.insert(format!("-{key}"), None);
        }
        if let Err(e) = self.secure_overrides(&overrides) {
            tracing::error!("registry key removal failed: {e}");
        }
    }

    /// Applies a registry config document: script text is imported after
    /// `%VAR%` expansion; the INI flavor writes one value per section.
    ///
    /// # Returns
    /// Removals requested via `Temp` entries, for the caller to run at
    /// cleanup.
    pub fn apply_config(&self, text: &str) -> Vec<DeferredRemoval> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if looks_like_script(trimmed) {
            let expanded = self.expand_variables(trimmed);
            let lines: Vec<String> = expanded.lines().map(str::to_string).collect();
            if let Err(e) = self.registry.import_script(&lines) {
                tracing::error!("registry script import failed: {e}");
            }
            return Vec::new();
        }
        self.apply_ini_config(trimmed)
    }

    fn apply_ini_config(&self, text: &str) -> Vec<DeferredRemoval> {
        let mut deferred = Vec::new();
        for (section, values) in parse_ini_sections(text) {
            let field = |name: &str| values.get(name).filter(|v| !v.is_empty()).cloned();
            let Some(key) = field("key") else { continue };
            let Some(raw_value) = field("value") else { continue };
            let Some(kind) = field("kind") else { continue };
            let name = field("entry");
            let data = if raw_value.contains('%') {
                self.ctx.expand(&raw_value).to_string()
            } else {
                raw_value
            };
            let Some(value) = value_for_kind(&kind, data) else {
                tracing::warn!("unsupported value kind '{kind}' in section {section}");
                continue;
            };
            if let Err(e) = self.registry.write_value(&key, name.as_deref(), value) {
                tracing::error!("failed to write {key}: {e}");
                continue;
            }
            match field("temp").map(|t| t.to_ascii_lowercase()).as_deref() {
                Some("true") => deferred.push(DeferredRemoval::Key(key)),
                Some("entry") => {
                    if let Some(name) = name {
                        deferred.push(DeferredRemoval::Entry { key, name });
                    }
                }
                _ => {}
            }
        }
        deferred
    }

    /// Runs removals collected from `Temp` entries.
    pub fn run_deferred(&self, removals: &[DeferredRemoval]) {
        for removal in removals {
            let result = match removal {
                DeferredRemoval::Key(key) => self.registry.delete_key(key),
                DeferredRemoval::Entry { key, name } => self.registry.delete_value(key, name),
            };
            if let Err(e) = result {
                tracing::warn!("deferred registry removal failed: {e}");
            }
        }
    }

    fn expand_variables(&self, content: &str) -> String {
        let pattern = Regex::new(r"%(.+?)%").expect("invalid variable pattern");
        let mut expanded = content.to_string();
        let variables: Vec<String> = pattern
            .captures_iter(content)
            .map(|caps| caps[0].to_string())
            .collect();
        for variable in variables {
            let value = self.ctx.expand(&variable);
            if value.as_str() != variable {
                expanded = expanded.replace(&variable, value.as_str());
            }
        }
        expanded
    }
}

/// Minimal INI section reader for the registry-seeding flavor. Key names
/// are lowercased; values are kept verbatim (registry paths carry
/// backslashes that must not be treated as escapes).
fn parse_ini_sections(text: &str) -> Vec<(String, IndexMap<String, String>)> {
    let mut sections: Vec<(String, IndexMap<String, String>)> = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            sections.push((line[1..line.len() - 1].to_string(), IndexMap::new()));
            continue;
        }
        let Some((_, values)) = sections.last_mut() else {
            continue;
        };
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    sections
}

fn value_for_kind(kind: &str, data: String) -> Option<RegValue> {
    match kind.to_ascii_lowercase().as_str() {
        "string" | "sz" | "reg_sz" => Some(RegValue::Sz(data)),
        "expandstring" | "reg_expand_sz" => Some(RegValue::ExpandSz(data)),
        "dword" | "reg_dword" => data.trim().parse().ok().map(RegValue::Dword),
        "multistring" | "reg_multi_sz" => {
            Some(RegValue::MultiSz(data.lines().map(str::to_string).collect()))
        }
        _ => None,
    }
}

/// Renders an override map into registry-script lines.
///
/// Hive aliases normalize to full hive names, a leading `-` marks whole-key
/// deletion, the unnamed value renders as `@`, and a missing/empty value
/// renders as the deletion marker `-`. Sections that do not resolve to a
/// known hive are dropped.
pub fn render_script(overrides: &OverrideMap) -> Vec<String> {
    let mut lines = vec!["Windows Registry Editor Version 5.00".to_string(), String::new()];
    for (section, values) in overrides {
        let Some(header) = normalize_section(section) else {
            tracing::warn!("skipping override section with unknown hive: {section}");
            continue;
        };
        lines.push(header);
        if let Some(values) = values {
            for (name, value) in values {
                let label = if name.is_empty() || name == "@" {
                    "@".to_string()
                } else {
                    format!("\"{name}\"")
                };
                let data = match value {
                    Some(v) if !v.trim().is_empty() => v.clone(),
                    _ => "-".to_string(),
                };
                lines.push(format!("{label}={data}"));
            }
        }
        lines.push(String::new());
    }
    lines
}

/// Normalizes one section name to `[HIVE\path]` form, preserving a leading
/// deletion marker.
///
/// # Returns
/// `None` when the first path level is not a known hive name or alias.
pub fn normalize_section(raw: &str) -> Option<String> {
    let (head, rest) = raw.split_once('\\')?;
    let stripped = head.trim_start_matches(['[', '-']);
    let full = match stripped {
        "HKEY_CLASSES_ROOT" | "HKEY_CURRENT_CONFIG" | "HKEY_CURRENT_USER"
        | "HKEY_LOCAL_MACHINE" | "HKEY_PERFORMANCE_DATA" | "HKEY_USERS" => stripped,
        "HKCR" => "HKEY_CLASSES_ROOT",
        "HKCC" => "HKEY_CURRENT_CONFIG",
        "HKCU" => "HKEY_CURRENT_USER",
        "HKLM" => "HKEY_LOCAL_MACHINE",
        "HKPD" => "HKEY_PERFORMANCE_DATA",
        "HKU" => "HKEY_USERS",
        _ => return None,
    };
    let deletion = head.trim_start_matches('[').starts_with('-');
    let rest = rest.trim_end_matches(']');
    Some(format!(
        "[{}{full}\\{rest}]",
        if deletion { "-" } else { "" }
    ))
}

fn is_hive_root(key: &str) -> bool {
    matches!(
        key.trim(),
        "HKEY_CLASSES_ROOT"
            | "HKCR"
            | "HKEY_CURRENT_CONFIG"
            | "HKCC"
            | "HKEY_CURRENT_USER"
            | "HKCU"
            | "HKEY_LOCAL_MACHINE"
            | "HKLM"
            | "HKEY_PERFORMANCE_DATA"
            | "HKPD"
            | "HKEY_USERS"
            | "HKU"
    )
}

/// Whether a registry config document is script text (as opposed to the INI
/// flavor with `Key`/`Entry`/`Value`/`Kind` sections).
fn looks_like_script(text: &str) -> bool {
    let Some(first) = text.lines().map(str::trim).find(|line| !line.is_empty()) else {
        return false;
    };
    first.starts_with("Windows Registry Editor")
        || (first.starts_with('[') && normalize_section(first).is_some())
}
