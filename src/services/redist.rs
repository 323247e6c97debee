//! Redistributable package handling around one run.
//!
//! Packages are discovered under `_CommonRedist/vcredist/<year>/` beside the
//! launcher. The session config's `Redist` section records, per package id,
//! whether the package belongs to the host (`true`, never uninstalled) or
//! was installed by the launcher (`false`, uninstalled at teardown).

use camino::Utf8PathBuf;

use crate::config;
use crate::platform::{LaunchSpec, Processes};
use crate::session::SessionContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedistPackage {
    pub year: String,
    pub arch: String,
    pub path: Utf8PathBuf,
}

impl RedistPackage {
    /// Stable package id, e.g. `VC2017X64`.
    pub fn id(&self) -> String {
        format!("VC{}X{}", self.year, self.arch)
    }

    fn install_arguments(&self) -> &'static str {
        match self.year.as_str() {
            "2008" => "/q",
            "2010" | "2012" => "/q /norestart",
            _ => "/install /quiet /norestart",
        }
    }

    fn uninstall_arguments(&self) -> &'static str {
        match self.year.as_str() {
            "2008" => "/qu",
            "2010" | "2012" => "/uninstall /q /norestart",
            _ => "/uninstall /quiet /norestart",
        }
    }
}

pub struct RedistHandler<'a> {
    ctx: &'a SessionContext,
    processes: &'a dyn Processes,
}

impl<'a> RedistHandler<'a> {
    pub fn new(ctx: &'a SessionContext, processes: &'a dyn Processes) -> Self {
        Self { ctx, processes }
    }

    /// Discovers bundled redistributable installers.
    pub fn packages(&self) -> Vec<RedistPackage> {
        let base = self.ctx.exe_dir.join("_CommonRedist").join("vcredist");
        let Ok(years) = base.read_dir_utf8() else {
            return Vec::new();
        };
        let mut packages = Vec::new();
        for year_entry in years.flatten() {
            if !year_entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let year = year_entry.file_name().to_string();
            if year.parse::<u32>().map(|y| y < 2005).unwrap_or(true) {
                continue;
            }
            for arch in ["86", "64"] {
                let path = year_entry.path().join(format!("vcredist_x{arch}.exe"));
                if path.is_file() {
                    packages.push(RedistPackage {
                        year: year.clone(),
                        arch: arch.to_string(),
                        path,
                    });
                }
            }
        }
        packages
    }

    /// Makes sure every bundled package is installed.
    ///
    /// Packages the host already owns (`true` in the consent record) are
    /// skipped; everything else is installed quietly and recorded as
    /// launcher-installed.
    ///
    /// # Returns
    /// `false` when an installer failed — the runtime dependency is missing.
    pub fn ensure_present(&self) -> bool {
        for package in self.packages() {
            let id = package.id();
            if self.ctx.settings.redist.get(&id) == Some(&true) {
                continue;
            }
            tracing::info!("installing redistributable {id}");
            let spec = LaunchSpec {
                arguments: package.install_arguments().to_string(),
                ..LaunchSpec::new(package.path.clone())
            };
            match self.processes.run_to_exit(&spec) {
                Ok(0) => {
                    if !self.ctx.settings.redist.contains_key(&id) {
                        if let Err(e) = config::write_ini_value(
                            &self.ctx.config_path,
                            "Redist",
                            &id,
                            "False",
                        ) {
                            tracing::warn!("failed to record redistributable state: {e}");
                        }
                    }
                }
                Ok(code) => {
                    tracing::error!("installer for {id} exited with {code}");
                    return false;
                }
                Err(e) => {
                    tracing::error!("installer for {id} failed: {e}");
                    return false;
                }
            }
        }
        true
    }

    /// Uninstalls the packages this launcher installed, leaving host-owned
    /// ones alone.
    pub fn restore_absent(&self) {
        for package in self.packages() {
            let id = package.id();
            if self.ctx.settings.redist.get(&id) != Some(&false) {
                continue;
            }
            tracing::info!("uninstalling redistributable {id}");
            let spec = LaunchSpec {
                arguments: package.uninstall_arguments().to_string(),
                ..LaunchSpec::new(package.path.clone())
            };
            if let Err(e) = self.processes.run_to_exit(&spec) {
                tracing::warn!("uninstaller for {id} failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LauncherConfig;
    use crate::models::SessionSettings;
    use crate::platform::testing::FakeProcesses;
    use tempfile::TempDir;

    fn setup(root: &Utf8PathBuf) {
        for year in ["2013", "2017"] {
            let dir = root.join(format!("_CommonRedist/vcredist/{year}"));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("vcredist_x64.exe"), "").unwrap();
        }
    }

    #[test]
    fn test_package_discovery_and_ids() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        setup(&root);

        let ctx = SessionContext::new(
            root.join("Launcher.exe"),
            LauncherConfig::default(),
            SessionSettings::default(),
            &[],
        );
        let processes = FakeProcesses::new();
        let handler = RedistHandler::new(&ctx, &processes);

        let ids: Vec<String> = handler.packages().iter().map(RedistPackage::id).collect();
        assert_eq!(ids, vec!["VC2013X64", "VC2017X64"]);
    }

    #[test]
    fn test_host_owned_packages_are_skipped() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        setup(&root);

        let mut settings = SessionSettings::default();
        settings.redist.insert("VC2013X64".to_string(), true);
        let ctx = SessionContext::new(
            root.join("Launcher.exe"),
            LauncherConfig::default(),
            settings,
            &[],
        );
        let processes = FakeProcesses::new();
        let handler = RedistHandler::new(&ctx, &processes);

        assert!(handler.ensure_present());
        // Only the unowned 2017 package was installed.
        let spawned = processes.spawned();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].path.as_str().contains("2017"));

        handler.restore_absent();
        // 2013 is host-owned; 2017 was just recorded as launcher-installed,
        // but the in-memory settings snapshot predates that record, so no
        // uninstall happens within this session object.
        assert_eq!(processes.spawned().len(), 1);
    }

    #[test]
    fn test_launcher_installed_packages_are_uninstalled() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        setup(&root);

        let mut settings = SessionSettings::default();
        settings.redist.insert("VC2013X64".to_string(), false);
        settings.redist.insert("VC2017X64".to_string(), true);
        let ctx = SessionContext::new(
            root.join("Launcher.exe"),
            LauncherConfig::default(),
            settings,
            &[],
        );
        let processes = FakeProcesses::new();
        let handler = RedistHandler::new(&ctx, &processes);

        handler.restore_absent();
        let spawned = processes.spawned();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].path.as_str().contains("2013"));
        assert!(spawned[0].arguments.contains("uninstall"));
    }
}
