//! Configuration file discovery and loading

use super::schema::Config;
use crate::error::{ManagerError, Result};
use contest_netfilter::ConfigValidator;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "CONTEST_MANAGER_CONFIG";

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "contest.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Find the config file to use.
    ///
    /// Priority: explicit path > `$CONTEST_MANAGER_CONFIG` > `<config_dir>/contest.toml`.
    /// An explicit path is returned even if missing so loading reports it.
    pub fn find_config(explicit: Option<&Path>, config_dir: &Path) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = env::var(CONFIG_ENV) {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
            tracing::warn!("{} points to missing file {:?}, ignoring", CONFIG_ENV, p);
        }

        let p = config_dir.join(CONFIG_FILE_NAME);
        p.exists().then_some(p)
    }

    /// Load and validate config from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ManagerError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&contents)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load the config found by [`Self::find_config`], or the built-in defaults
    pub fn load(explicit: Option<&Path>, config_dir: &Path) -> Result<Config> {
        match Self::find_config(explicit, config_dir) {
            Some(path) => {
                tracing::debug!("Loading config from {:?}", path);
                Self::load_from_file(&path)
            }
            None => {
                tracing::debug!("No config file found, using built-in defaults");
                Ok(Config::default())
            }
        }
    }

    fn validate(config: &Config) -> Result<()> {
        ConfigValidator::validate(&config.network, &config.analyzer)?;
        // A zero delay would re-crawl and rebuild the firewall in a tight loop
        if config.monitor.interval_mins == 0 {
            return Err(ManagerError::ZeroSetting("monitor.interval_mins"));
        }
        if config.monitor.retry_secs == 0 {
            return Err(ManagerError::ZeroSetting("monitor.retry_secs"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.common.verbose);
        assert_eq!(config.network.chain_prefix, "CONTEST");
        assert_eq!(config.monitor.interval_mins, 30);
        assert_eq!(
            config.accounts.package_groups.keys().collect::<Vec<_>>(),
            vec!["compilers", "editors", "browsers"]
        );
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[common]
verbose = true

[network]
allow_ranges = ["10.0.0.5"]

[analyzer]
browser = "chromium-browser"
crawl_delay_ms = 0

[monitor]
interval_mins = 10
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.common.verbose);
        assert_eq!(config.analyzer.browser, "chromium-browser");
        assert_eq!(config.monitor.interval().as_secs(), 600);
        assert_eq!(config.persistence.rules_dir, PathBuf::from("/etc/iptables"));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[proxy]\nmode = \"open\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_config_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[usb]\nudev_dir = \"/tmp/udev\"\n",
        )
        .unwrap();

        let config = ConfigLoader::load(None, dir.path()).unwrap();
        assert_eq!(config.usb.udev_dir, PathBuf::from("/tmp/udev"));
    }

    #[test]
    fn test_explicit_path_wins_and_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = ConfigLoader::load(Some(&missing), dir.path()).unwrap_err();
        assert!(matches!(err, ManagerError::ConfigLoad { .. }));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[network]\nallow_ranges = [\"10.0.0.0/40\"]\n").unwrap();

        let err = ConfigLoader::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ManagerError::Netfilter(_)));
    }

    #[test]
    fn test_zero_monitor_delays_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.toml");

        fs::write(&path, "[monitor]\ninterval_mins = 0\n").unwrap();
        let err = ConfigLoader::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ManagerError::ZeroSetting("monitor.interval_mins")));

        fs::write(&path, "[monitor]\nretry_secs = 0\n").unwrap();
        let err = ConfigLoader::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ManagerError::ZeroSetting("monitor.retry_secs")));
    }

    #[test]
    fn test_huge_monitor_values_saturate() {
        let config: Config = toml::from_str(
            "[monitor]\ninterval_mins = 9223372036854775807\nmax_cache_age_hours = 9223372036854775807\n",
        )
        .unwrap();
        assert_eq!(config.monitor.interval(), Duration::from_secs(u64::MAX));
        assert_eq!(config.monitor.max_cache_age(), Duration::from_secs(u64::MAX));
    }
}
