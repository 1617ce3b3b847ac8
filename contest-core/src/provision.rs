//! Contest account setup and reset

use crate::config::AccountsConfig;
use crate::error::{ManagerError, Result};
use contest_netfilter::{Invocation, SystemGateway, Username};
use std::path::PathBuf;
use std::sync::Arc;

/// Editor and swap leftovers removed from the home directory
const TEMP_PATTERNS: &[&str] = &["*.tmp", "*.bak", "*~", "*.swp", "*.swo"];

/// Emptied, relative to the home directory
const CACHE_DIRS: &[&str] = &[
    ".cache",
    ".local/share/Trash",
    ".config/Code/logs",
    ".config/Code/CachedData",
];

pub struct Provisioner {
    gateway: Arc<dyn SystemGateway>,
    config: AccountsConfig,
    user: Username,
}

impl Provisioner {
    pub fn new(gateway: Arc<dyn SystemGateway>, config: AccountsConfig, user: Username) -> Self {
        Self {
            gateway,
            config,
            user,
        }
    }

    pub fn home_dir(&self) -> PathBuf {
        self.config.home_root.join(self.user.as_str())
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.config
            .backup_root
            .join(format!("{}_backup", self.user))
            .join(format!("{}_home", self.user))
    }

    fn projects_dir(&self) -> PathBuf {
        self.home_dir().join("cb_projects")
    }

    fn owner(&self) -> String {
        format!("{0}:{0}", self.user)
    }

    fn run(&self, program: &str, args: &[&str]) -> bool {
        self.gateway.run_logged(&Invocation::new(program, args.iter().copied()))
    }

    /// Recreate the account, install software and snapshot the fresh home.
    /// Returns the number of non-fatal failures.
    pub fn setup(&self) -> Result<usize> {
        let mut failures = self.create_account()?;
        failures += self.install_packages();
        self.install_extensions();
        failures += self.disable_updates();
        failures += self.prepare_home();
        failures += self.clean_temporary_files();
        if !self.backup_home() {
            failures += 1;
        }

        let missing = self.missing_tools();
        if !missing.is_empty() {
            tracing::warn!("Not found after setup: {}", missing.join(", "));
        }
        Ok(failures)
    }

    /// Only `useradd` failing is fatal
    fn create_account(&self) -> Result<usize> {
        let user = self.user.as_str();
        let mut failures = 0;

        if self.user.exists(self.gateway.as_ref()) {
            tracing::info!("User '{}' exists, deleting it", user);
            if !self.run("deluser", &["--remove-home", user]) {
                failures += 1;
            }
        }

        let groups = self.config.groups.join(",");
        let mut useradd = vec!["-m", "-s", "/bin/bash"];
        if !groups.is_empty() {
            useradd.extend(["-G", groups.as_str()]);
        }
        useradd.push(user);
        self.gateway
            .run_checked(&Invocation::new("useradd", useradd))
            .map_err(|e| ManagerError::AccountCreation {
                user: user.to_string(),
                reason: e.to_string(),
            })?;

        for (program, args) in [("passwd", ["-d", user]), ("usermod", ["-U", user])] {
            if !self.run(program, &args) {
                failures += 1;
            }
        }

        // Not being a member is the usual case
        for group in &self.config.privileged_groups {
            let inv = Invocation::new("gpasswd", ["-d", user, group.as_str()]);
            if let Ok(out) = self.gateway.run(&inv) {
                if out.is_success() {
                    tracing::info!("Removed {} from group {}", user, group);
                }
            }
        }

        tracing::info!("User '{}' created with minimal privileges", user);
        Ok(failures)
    }

    fn install_packages(&self) -> usize {
        let mut failures = 0;
        if !self.run("apt-get", &["update"]) {
            failures += 1;
        }

        for (name, packages) in &self.config.package_groups {
            if packages.is_empty() {
                continue;
            }
            tracing::info!("Installing {} ({})", name, packages.join(" "));
            let args = ["DEBIAN_FRONTEND=noninteractive", "apt-get", "install", "-y"]
                .into_iter()
                .map(String::from)
                .chain(packages.iter().cloned());
            if !self.gateway.run_logged(&Invocation::new("env", args)) {
                tracing::warn!("Package group '{}' was not fully installed", name);
                failures += 1;
            }
        }
        failures
    }

    /// Best effort, failures are only logged
    fn install_extensions(&self) {
        if self.config.vscode_extensions.is_empty() {
            return;
        }
        if !self.gateway.command_exists("code") {
            tracing::info!("VS Code is not installed, skipping its extensions");
            return;
        }

        let timeout = self.config.extension_timeout_secs.to_string();
        let data_dir = format!("--user-data-dir={}", self.home_dir().join(".config/Code").display());
        for extension in &self.config.vscode_extensions {
            let installed = self.run(
                "timeout",
                &[
                    timeout.as_str(),
                    "sudo",
                    "-u",
                    self.user.as_str(),
                    "code",
                    data_dir.as_str(),
                    "--install-extension",
                    extension.as_str(),
                    "--force",
                ],
            );
            if installed {
                tracing::info!("Installed VS Code extension {}", extension);
            } else {
                tracing::warn!("VS Code extension {} was not installed", extension);
            }
        }
    }

    /// Required tools `which` cannot find
    pub fn missing_tools(&self) -> Vec<String> {
        self.config
            .required_tools
            .iter()
            .filter(|tool| !self.gateway.command_exists(tool))
            .cloned()
            .collect()
    }

    fn disable_updates(&self) -> usize {
        self.config
            .disabled_units
            .iter()
            .filter(|unit| !self.run("systemctl", &["disable", "--now", unit.as_str()]))
            .count()
    }

    /// Project directories for the IDEs, ownership and permissions
    fn prepare_home(&self) -> usize {
        let home = self.home_dir().to_string_lossy().into_owned();
        let projects = self.projects_dir();
        let debug = projects.join("bin/Debug").to_string_lossy().into_owned();
        let release = projects.join("bin/Release").to_string_lossy().into_owned();
        let desktop = self.home_dir().join("Desktop").to_string_lossy().into_owned();
        let projects = projects.to_string_lossy().into_owned();
        let owner = self.owner();

        [
            self.run("mkdir", &["-p", &debug, &release, &desktop]),
            self.run("chown", &["-R", &owner, &home]),
            self.run("chmod", &["-R", "u+rwX", &home]),
            self.run("chmod", &["-R", "755", &projects]),
        ]
        .into_iter()
        .filter(|ok| !ok)
        .count()
    }

    fn clean_temporary_files(&self) -> usize {
        let home = self.home_dir();
        let mut find = vec![home.to_string_lossy().into_owned(), "-type".into(), "f".into(), "(".into()];
        for (i, pattern) in TEMP_PATTERNS.iter().enumerate() {
            if i > 0 {
                find.push("-o".into());
            }
            find.extend(["-name".to_string(), pattern.to_string()]);
        }
        find.extend([")".to_string(), "-delete".to_string()]);

        let mut failures = 0;
        if !self.gateway.run_logged(&Invocation::new("find", find)) {
            failures += 1;
        }
        for dir in CACHE_DIRS.iter().map(|d| home.join(d)).filter(|d| d.exists()) {
            let dir = dir.to_string_lossy();
            if !self.run("find", &[&dir, "-mindepth", "1", "-delete"]) {
                failures += 1;
            }
        }
        failures
    }

    /// Snapshot the home directory unless a backup already exists
    fn backup_home(&self) -> bool {
        let backup = self.backup_dir();
        if backup.exists() {
            tracing::info!("Backup {} already exists, keeping it", backup.display());
            return true;
        }

        let Some(parent) = backup.parent() else {
            return false;
        };
        let source = format!("{}/", self.home_dir().display());
        let target = format!("{}/", backup.display());
        let ok = self.run("mkdir", &["-p", &parent.to_string_lossy()])
            && self.run("rsync", &["-aAX", &source, &target]);
        if ok {
            tracing::info!("Backup created at {}", backup.display());
        }
        ok
    }

    /// Refuse a reset that would clobber a live session or has nothing to restore
    pub fn ensure_resettable(&self) -> Result<()> {
        if !self.user.exists(self.gateway.as_ref()) {
            return Err(ManagerError::AccountMissing(self.user.to_string()));
        }
        if !self.backup_dir().exists() {
            return Err(ManagerError::BackupMissing(self.backup_dir()));
        }

        let pgrep = Invocation::new("pgrep", ["-u", self.user.as_str()]);
        if self.gateway.run(&pgrep).is_ok_and(|out| out.is_success()) {
            return Err(ManagerError::UserBusy(self.user.to_string()));
        }
        Ok(())
    }

    /// Restore the home directory from the backup, then fix permissions
    /// and drop temporary files. Only the copy itself is fatal; returns the
    /// number of failed follow-up steps.
    pub fn restore_home(&self) -> Result<usize> {
        let source = format!("{}/", self.backup_dir().display());
        let target = format!("{}/", self.home_dir().display());
        self.gateway
            .run_checked(&Invocation::new("rsync", ["-aAX", "--delete", &source, &target]))
            .map_err(|e| ManagerError::Restore(e.to_string()))?;

        let failures = self.prepare_home() + self.clean_temporary_files();
        tracing::info!("Home directory of {} restored", self.user);
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contest_netfilter::{CommandOutput, RecordingGateway};
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AccountsConfig {
        AccountsConfig {
            groups: vec!["audio".into(), "video".into()],
            privileged_groups: vec!["sudo".into()],
            package_groups: IndexMap::from([
                ("compilers".to_string(), vec!["gcc".to_string(), "g++".to_string()]),
                ("editors".to_string(), vec!["micro".to_string()]),
            ]),
            disabled_units: vec!["apt-daily.timer".into()],
            backup_root: dir.path().join("opt"),
            home_root: dir.path().join("home"),
            vscode_extensions: vec!["ms-vscode.cpptools".into()],
            extension_timeout_secs: 60,
            required_tools: vec!["gcc".into(), "g++".into()],
        }
    }

    fn user() -> Username {
        Username::parse("participant").unwrap()
    }

    /// `id -u` answers `known`, everything else succeeds
    fn host(known: bool) -> RecordingGateway {
        RecordingGateway::with_responder(move |inv| {
            if inv.program == "id" {
                if known {
                    CommandOutput::ok_with_stdout("1001\n")
                } else {
                    CommandOutput::failed(1, "no such user")
                }
            } else if inv.program == "pgrep" {
                CommandOutput::failed(1, "")
            } else {
                CommandOutput::ok()
            }
        })
    }

    #[test]
    fn test_setup_sequence() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(host(true));
        let provisioner = Provisioner::new(gateway.clone(), config(&dir), user());

        assert_eq!(provisioner.setup().unwrap(), 0);

        let lines = gateway.command_lines();
        let position = |line: &str| {
            lines
                .iter()
                .position(|l| l == line)
                .unwrap_or_else(|| panic!("missing {line:?} in {lines:#?}"))
        };
        let deluser = position("deluser --remove-home participant");
        let useradd = position("useradd -m -s /bin/bash -G audio,video participant");
        let compilers = position("env DEBIAN_FRONTEND=noninteractive apt-get install -y gcc g++");
        let editors = position("env DEBIAN_FRONTEND=noninteractive apt-get install -y micro");
        assert!(deluser < useradd && useradd < compilers && compilers < editors);
        position("passwd -d participant");
        position("gpasswd -d participant sudo");
        position("systemctl disable --now apt-daily.timer");

        let backup = provisioner.backup_dir();
        assert!(backup.ends_with("participant_backup/participant_home"));
        position(&format!(
            "rsync -aAX {}/ {}/",
            provisioner.home_dir().display(),
            backup.display()
        ));
    }

    #[test]
    fn test_useradd_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::with_responder(|inv| match inv.program.as_str() {
            "id" => CommandOutput::failed(1, ""),
            "useradd" => CommandOutput::failed(9, "useradd: group 'audio' does not exist"),
            _ => CommandOutput::ok(),
        }));
        let provisioner = Provisioner::new(gateway.clone(), config(&dir), user());

        let err = provisioner.setup().unwrap_err();
        assert!(matches!(err, ManagerError::AccountCreation { .. }));
        assert!(!gateway.command_lines().iter().any(|l| l.contains("apt-get")));
    }

    #[test]
    fn test_failed_package_group_continues() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::with_responder(|inv| {
            if inv.args.iter().any(|a| a == "micro") {
                CommandOutput::failed(100, "E: Unable to locate package micro")
            } else if inv.program == "id" {
                CommandOutput::failed(1, "")
            } else {
                CommandOutput::ok()
            }
        }));
        let provisioner = Provisioner::new(gateway.clone(), config(&dir), user());

        assert_eq!(provisioner.setup().unwrap(), 1);
        assert!(gateway
            .command_lines()
            .contains(&"systemctl disable --now apt-daily.timer".to_string()));
    }

    #[test]
    fn test_existing_backup_kept() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(host(false));
        let provisioner = Provisioner::new(gateway.clone(), config(&dir), user());
        std::fs::create_dir_all(provisioner.backup_dir()).unwrap();

        provisioner.setup().unwrap();
        assert!(!gateway.command_lines().iter().any(|l| l.starts_with("rsync")));
    }

    #[test]
    fn test_reset_preconditions() {
        let dir = TempDir::new().unwrap();

        let missing = Provisioner::new(Arc::new(host(false)), config(&dir), user());
        assert!(matches!(
            missing.ensure_resettable(),
            Err(ManagerError::AccountMissing(_))
        ));

        let provisioner = Provisioner::new(Arc::new(host(true)), config(&dir), user());
        assert!(matches!(
            provisioner.ensure_resettable(),
            Err(ManagerError::BackupMissing(_))
        ));

        std::fs::create_dir_all(provisioner.backup_dir()).unwrap();
        provisioner.ensure_resettable().unwrap();

        let busy = Provisioner::new(
            Arc::new(RecordingGateway::with_responder(|inv| match inv.program.as_str() {
                "id" => CommandOutput::ok_with_stdout("1001\n"),
                _ => CommandOutput::ok(),
            })),
            config(&dir),
            user(),
        );
        assert!(matches!(busy.ensure_resettable(), Err(ManagerError::UserBusy(_))));
    }

    #[test]
    fn test_restore_home() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(host(true));
        let provisioner = Provisioner::new(gateway.clone(), config(&dir), user());
        let home = provisioner.home_dir();
        std::fs::create_dir_all(home.join(".cache/thumbnails")).unwrap();

        assert_eq!(provisioner.restore_home().unwrap(), 0);
        let lines = gateway.command_lines();
        assert!(lines[0].starts_with("rsync -aAX --delete "));
        let h = home.display();
        assert_eq!(
            &lines[1..],
            &[
                format!(
                    "mkdir -p {h}/cb_projects/bin/Debug {h}/cb_projects/bin/Release {h}/Desktop"
                ),
                format!("chown -R participant:participant {h}"),
                format!("chmod -R u+rwX {h}"),
                format!("chmod -R 755 {h}/cb_projects"),
                format!(
                    "find {h} -type f ( -name *.tmp -o -name *.bak -o -name *~ -o -name *.swp -o -name *.swo ) -delete"
                ),
                format!("find {h}/.cache -mindepth 1 -delete"),
            ]
        );
    }

    #[test]
    fn test_restore_copy_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::with_responder(|inv| match inv.program.as_str() {
            "rsync" => CommandOutput::failed(23, "rsync: some files could not be transferred"),
            _ => CommandOutput::ok(),
        }));
        let provisioner = Provisioner::new(gateway.clone(), config(&dir), user());

        assert!(matches!(provisioner.restore_home(), Err(ManagerError::Restore(_))));
        assert_eq!(gateway.command_lines().len(), 1);
    }

    #[test]
    fn test_extensions_installed_under_timeout() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::with_responder(|inv| match inv.program.as_str() {
            "id" => CommandOutput::failed(1, ""),
            "timeout" => CommandOutput::failed(124, ""),
            _ => CommandOutput::ok(),
        }));
        let provisioner = Provisioner::new(gateway.clone(), config(&dir), user());

        // A hung marketplace download does not fail setup
        assert_eq!(provisioner.setup().unwrap(), 0);
        let expected = format!(
            "timeout 60 sudo -u participant code --user-data-dir={}/.config/Code --install-extension ms-vscode.cpptools --force",
            provisioner.home_dir().display()
        );
        assert!(gateway.command_lines().contains(&expected));
    }

    #[test]
    fn test_extensions_skipped_without_vscode() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::with_responder(|inv| match inv.program.as_str() {
            "id" => CommandOutput::failed(1, ""),
            "which" if inv.args.iter().any(|a| a == "code") => CommandOutput::failed(1, ""),
            _ => CommandOutput::ok(),
        }));
        let provisioner = Provisioner::new(gateway.clone(), config(&dir), user());

        provisioner.setup().unwrap();
        assert!(!gateway.command_lines().iter().any(|l| l.starts_with("timeout")));
    }

    #[test]
    fn test_missing_tools_reported() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::with_responder(|inv| {
            if inv.matches("which", &["g++"]) {
                CommandOutput::failed(1, "")
            } else {
                CommandOutput::ok()
            }
        }));
        let provisioner = Provisioner::new(gateway.clone(), config(&dir), user());

        assert_eq!(provisioner.missing_tools(), vec!["g++".to_string()]);
        let lines = gateway.command_lines();
        assert!(lines.contains(&"which gcc".to_string()));
        assert!(lines.contains(&"which g++".to_string()));
    }
}
