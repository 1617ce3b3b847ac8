//! Configuration schema types

use contest_netfilter::{AnalyzerConfig, NetworkConfig};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub usb: UsbConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Settings shared by every command
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CommonConfig {
    #[serde(default)]
    pub verbose: bool,
}

/// Where rule snapshots and the restore unit are written
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,
    #[serde(default = "default_systemd_dir")]
    pub systemd_dir: PathBuf,
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from("/etc/iptables")
}

fn default_systemd_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            rules_dir: default_rules_dir(),
            systemd_dir: default_systemd_dir(),
        }
    }
}

/// Where the USB rule files live
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UsbConfig {
    #[serde(default = "default_udev_dir")]
    pub udev_dir: PathBuf,
    #[serde(default = "default_polkit_dir")]
    pub polkit_dir: PathBuf,
}

fn default_udev_dir() -> PathBuf {
    PathBuf::from("/etc/udev/rules.d")
}

fn default_polkit_dir() -> PathBuf {
    PathBuf::from("/etc/polkit-1/rules.d")
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            udev_dir: default_udev_dir(),
            polkit_dir: default_polkit_dir(),
        }
    }
}

/// Contest account provisioning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AccountsConfig {
    /// Supplementary groups of a fresh contest account
    #[serde(default = "default_groups")]
    pub groups: Vec<String>,
    /// Groups the account is removed from after creation
    #[serde(default = "default_privileged_groups")]
    pub privileged_groups: Vec<String>,
    /// Package groups installed in order during setup
    #[serde(default = "default_package_groups")]
    pub package_groups: IndexMap<String, Vec<String>>,
    /// Units disabled so updates don't run mid-contest
    #[serde(default = "default_disabled_units")]
    pub disabled_units: Vec<String>,
    /// Home snapshots go to `<backup_root>/<user>_backup/<user>_home`
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,
    #[serde(default = "default_home_root")]
    pub home_root: PathBuf,
    /// VS Code extensions installed for the account when `code` is present
    #[serde(default = "default_vscode_extensions")]
    pub vscode_extensions: Vec<String>,
    #[serde(default = "default_extension_timeout_secs")]
    pub extension_timeout_secs: u64,
    /// Programs that must be on `PATH` once setup is done
    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,
}

fn default_groups() -> Vec<String> {
    ["audio", "video", "cdrom", "plugdev", "users"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_privileged_groups() -> Vec<String> {
    ["sudo", "netdev", "adm", "disk"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_package_groups() -> IndexMap<String, Vec<String>> {
    let group = |packages: &[&str]| packages.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    IndexMap::from([
        (
            "compilers".to_string(),
            group(&["build-essential", "gdb", "gcc", "g++", "python3", "python3-pip", "openjdk-17-jdk"]),
        ),
        ("editors".to_string(), group(&["micro", "codeblocks"])),
        ("browsers".to_string(), group(&["firefox", "chromium"])),
    ])
}

fn default_disabled_units() -> Vec<String> {
    vec![
        "apt-daily.service".to_string(),
        "apt-daily.timer".to_string(),
        "apt-daily-upgrade.service".to_string(),
        "apt-daily-upgrade.timer".to_string(),
    ]
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("/opt")
}

fn default_home_root() -> PathBuf {
    PathBuf::from("/home")
}

fn default_vscode_extensions() -> Vec<String> {
    ["ms-vscode.cpptools", "ms-python.python", "redhat.java"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_extension_timeout_secs() -> u64 {
    60
}

fn default_required_tools() -> Vec<String> {
    ["gcc", "g++", "gdb", "python3", "java", "codeblocks", "firefox"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            groups: default_groups(),
            privileged_groups: default_privileged_groups(),
            package_groups: default_package_groups(),
            disabled_units: default_disabled_units(),
            backup_root: default_backup_root(),
            home_root: default_home_root(),
            vscode_extensions: default_vscode_extensions(),
            extension_timeout_secs: default_extension_timeout_secs(),
            required_tools: default_required_tools(),
        }
    }
}

/// Periodic refresh loop
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_mins")]
    pub interval_mins: u64,
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
    /// Dependency cache older than this is re-analyzed
    #[serde(default = "default_max_cache_age_hours")]
    pub max_cache_age_hours: u64,
}

fn default_interval_mins() -> u64 {
    30
}

fn default_retry_secs() -> u64 {
    60
}

fn default_max_cache_age_hours() -> u64 {
    24
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_mins.saturating_mul(60))
    }

    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_secs(self.max_cache_age_hours.saturating_mul(3600))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_mins: default_interval_mins(),
            retry_secs: default_retry_secs(),
            max_cache_age_hours: default_max_cache_age_hours(),
        }
    }
}
