use std::process::Command;

use camino::Utf8Path;

use super::{PlatformError, Registry};

/// A registry value with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    Sz(String),
    ExpandSz(String),
    Dword(u32),
    MultiSz(Vec<String>),
}

impl RegValue {
    fn reg_type(&self) -> &'static str {
        match self {
            Self::Sz(_) => "REG_SZ",
            Self::ExpandSz(_) => "REG_EXPAND_SZ",
            Self::Dword(_) => "REG_DWORD",
            Self::MultiSz(_) => "REG_MULTI_SZ",
        }
    }

    fn reg_data(&self) -> String {
        match self {
            Self::Sz(s) | Self::ExpandSz(s) => s.clone(),
            Self::Dword(n) => n.to_string(),
            Self::MultiSz(v) => v.join("\\0"),
        }
    }
}

/// Registry access through the system `reg.exe` tool.
///
/// Every operation the core needs (query, add, delete, export, import) maps
/// onto one `reg` subcommand, which keeps this implementation dependency-free
/// and inherits the elevation of the calling process. On non-Windows hosts
/// all operations fail with [`PlatformError::Unsupported`]; reads return
/// nothing.
pub struct RegExeRegistry;

impl RegExeRegistry {
    pub fn new() -> Self {
        Self
    }

    fn run(args: &[&str]) -> Result<String, PlatformError> {
        if !cfg!(windows) {
            return Err(PlatformError::Unsupported("reg.exe registry access"));
        }
        let output = Command::new("reg")
            .args(args)
            .output()
            .map_err(|e| PlatformError::Registry(format!("reg {}: {e}", args.join(" "))))?;
        if !output.status.success() {
            return Err(PlatformError::Registry(format!(
                "reg {} exited with {}",
                args.join(" "),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Parses one `reg query` output line of the form
    /// `    Name    REG_SZ    data`.
    fn parse_value_line(line: &str) -> Option<RegValue> {
        let known = ["REG_EXPAND_SZ", "REG_MULTI_SZ", "REG_DWORD", "REG_SZ"];
        for kind in known {
            if let Some(idx) = line.find(kind) {
                let data = line[idx + kind.len()..].trim().to_string();
                return Some(match kind {
                    "REG_EXPAND_SZ" => RegValue::ExpandSz(data),
                    "REG_MULTI_SZ" => {
                        RegValue::MultiSz(data.split("\\0").map(str::to_string).collect())
                    }
                    "REG_DWORD" => {
                        let parsed = data
                            .trim_start_matches("0x")
                            .parse::<u32>()
                            .or_else(|_| u32::from_str_radix(data.trim_start_matches("0x"), 16))
                            .unwrap_or(0);
                        RegValue::Dword(parsed)
                    }
                    _ => RegValue::Sz(data),
                });
            }
        }
        None
    }
}

impl Default for RegExeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for RegExeRegistry {
    fn key_exists(&self, key: &str) -> bool {
        Self::run(&["query", key]).is_ok()
    }

    fn value_exists(&self, key: &str, name: &str) -> bool {
        Self::run(&["query", key, "/v", name]).is_ok()
    }

    fn read_value(&self, key: &str, name: Option<&str>) -> Option<RegValue> {
        let output = match name {
            Some(n) => Self::run(&["query", key, "/v", n]).ok()?,
            None => Self::run(&["query", key, "/ve"]).ok()?,
        };
        output.lines().find_map(Self::parse_value_line)
    }

    fn write_value(
        &self,
        key: &str,
        name: Option<&str>,
        value: RegValue,
    ) -> Result<(), PlatformError> {
        let data = value.reg_data();
        let mut args = vec!["add", key];
        match name {
            Some(n) => args.extend(["/v", n]),
            None => args.push("/ve"),
        }
        args.extend(["/t", value.reg_type(), "/d", data.as_str(), "/f"]);
        Self::run(&args).map(|_| ())
    }

    fn create_key(&self, key: &str) -> Result<(), PlatformError> {
        Self::run(&["add", key, "/f"]).map(|_| ())
    }

    fn delete_key(&self, key: &str) -> Result<(), PlatformError> {
        Self::run(&["delete", key, "/f"]).map(|_| ())
    }

    fn delete_value(&self, key: &str, name: &str) -> Result<(), PlatformError> {
        Self::run(&["delete", key, "/v", name, "/f"]).map(|_| ())
    }

    fn list_subkeys(&self, key: &str) -> Vec<String> {
        let Ok(output) = Self::run(&["query", key]) else {
            return Vec::new();
        };
        output
            .lines()
            .filter(|line| line.len() > key.len() && line[..key.len()].eq_ignore_ascii_case(key))
            .filter_map(|line| {
                line[key.len()..]
                    .trim_start_matches('\\')
                    .split('\\')
                    .next()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .collect()
    }

    fn export_keys(&self, file: &Utf8Path, keys: &[String]) -> Result<(), PlatformError> {
        // `reg export` handles one key per invocation; the parts are
        // concatenated with a single header line.
        let mut script = vec!["Windows Registry Editor Version 5.00".to_string(), String::new()];
        for key in keys {
            if !self.key_exists(key) {
                continue;
            }
            let part = format!("{file}.part");
            Self::run(&["export", key.as_str(), part.as_str(), "/y"])?;
            let content = std::fs::read_to_string(&part).map_err(|e| PlatformError::io(&part, e))?;
            let _ = std::fs::remove_file(&part);
            script.extend(
                content
                    .lines()
                    .filter(|l| !l.starts_with("Windows Registry Editor"))
                    .map(str::to_string),
            );
        }
        std::fs::write(file.as_std_path(), script.join("\r\n"))
            .map_err(|e| PlatformError::io(file, e))
    }

    fn import_file(&self, file: &Utf8Path) -> Result<(), PlatformError> {
        Self::run(&["import", file.as_str()]).map(|_| ())
    }

    fn import_script(&self, lines: &[String]) -> Result<(), PlatformError> {
        let file = std::env::temp_dir().join(format!("portalizer-import-{}.reg", std::process::id()));
        std::fs::write(&file, lines.join("\r\n"))
            .map_err(|e| PlatformError::io(file.display(), e))?;
        let utf8 = camino::Utf8PathBuf::try_from(file.clone())
            .map_err(|e| PlatformError::Registry(e.to_string()))?;
        let result = self.import_file(&utf8);
        let _ = std::fs::remove_file(&file);
        result
    }
}
