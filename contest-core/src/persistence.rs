//! Keeping firewall rules across reboots

use crate::config::PersistenceConfig;
use contest_netfilter::{Family, Invocation, SystemGateway, Username};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

/// A systemd unit file built section by section
#[derive(Debug, Clone, Default)]
pub struct UnitFile {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl UnitFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new `[name]` section
    pub fn section(mut self, name: &str) -> Self {
        self.sections.push((name.to_string(), Vec::new()));
        self
    }

    /// Add `key=value` to the current section
    pub fn entry(mut self, key: &str, value: impl Into<String>) -> Self {
        if let Some((_, entries)) = self.sections.last_mut() {
            entries.push((key.to_string(), value.into()));
        }
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, (name, entries)) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", name);
            for (key, value) in entries {
                let _ = writeln!(out, "{}={}", key, value);
            }
        }
        out
    }
}

/// How the rules were persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMethod {
    NetfilterPersistent,
    RestoreUnit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub method: PersistMethod,
    pub failures: usize,
}

/// Saves live rule tables and restores them at boot
pub struct Persistence {
    gateway: Arc<dyn SystemGateway>,
    config: PersistenceConfig,
    user: Username,
}

impl Persistence {
    pub fn new(gateway: Arc<dyn SystemGateway>, config: PersistenceConfig, user: Username) -> Self {
        Self {
            gateway,
            config,
            user,
        }
    }

    pub fn unit_name(&self) -> String {
        format!("contest-restore-{}.service", self.user)
    }

    pub fn unit_path(&self) -> PathBuf {
        self.config.systemd_dir.join(self.unit_name())
    }

    pub fn snapshot_path(&self, family: Family) -> PathBuf {
        let ext = match family {
            Family::V4 => "v4",
            Family::V6 => "v6",
        };
        self.config
            .rules_dir
            .join(format!("contest-rules-{}.{}", self.user, ext))
    }

    /// Oneshot unit replaying both snapshots
    pub fn unit(&self) -> UnitFile {
        let mut unit = UnitFile::new()
            .section("Unit")
            .entry("Description", format!("Restore contest firewall rules for {}", self.user))
            .entry("After", "network-pre.target")
            .entry("Wants", "network-pre.target")
            .section("Service")
            .entry("Type", "oneshot")
            .entry("RemainAfterExit", "yes");
        for family in Family::ALL {
            unit = unit.entry(
                "ExecStart",
                format!(
                    "/sbin/{} {}",
                    family.restore_program(),
                    self.snapshot_path(family).display()
                ),
            );
        }
        unit.section("Install").entry("WantedBy", "multi-user.target")
    }

    /// Persist the live rules. Failures are logged and counted.
    pub fn save(&self) -> PersistReport {
        if self.gateway.command_exists("netfilter-persistent") {
            let ok = self
                .gateway
                .run_logged(&Invocation::new("netfilter-persistent", ["save"]));
            if ok {
                tracing::info!("Firewall rules saved with netfilter-persistent");
            }
            return PersistReport {
                method: PersistMethod::NetfilterPersistent,
                failures: usize::from(!ok),
            };
        }

        let mut failures = 0;
        for family in Family::ALL {
            if !self.save_snapshot(family) {
                failures += 1;
            }
        }

        if let Err(e) = self.gateway.write_file(&self.unit_path(), &self.unit().render()) {
            tracing::warn!("Failed to write {}: {}", self.unit_path().display(), e);
            failures += 1;
        }
        let unit_name = self.unit_name();
        for args in [vec!["daemon-reload"], vec!["enable", unit_name.as_str()]] {
            if !self.gateway.run_logged(&Invocation::new("systemctl", args)) {
                failures += 1;
            }
        }

        if failures == 0 {
            tracing::info!("Firewall rules will be restored at boot by {}", self.unit_name());
        }
        PersistReport {
            method: PersistMethod::RestoreUnit,
            failures,
        }
    }

    fn save_snapshot(&self, family: Family) -> bool {
        let path = self.snapshot_path(family);
        let dump = match self
            .gateway
            .run_checked(&Invocation::new(family.save_program(), Vec::<String>::new()))
        {
            Ok(out) => out.stdout,
            Err(e) => {
                tracing::warn!("{}", e);
                return false;
            }
        };
        match self.gateway.write_file(&path, &dump) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to write {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Disable the restore unit and delete it with both snapshots
    pub fn remove(&self) {
        if self.unit_path().exists() {
            self.gateway
                .run_logged(&Invocation::new("systemctl", ["disable", self.unit_name().as_str()]));
        }

        let paths = [
            self.unit_path(),
            self.snapshot_path(Family::V4),
            self.snapshot_path(Family::V6),
        ];
        for path in paths {
            match self.gateway.remove_file(&path) {
                Ok(true) => tracing::debug!("Removed {}", path.display()),
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        self.gateway
            .run_logged(&Invocation::new("systemctl", ["daemon-reload"]));
    }

    /// Whether systemd reports the restore unit as enabled
    pub fn is_enabled(&self) -> bool {
        self.gateway
            .run(&Invocation::new("systemctl", ["is-enabled", self.unit_name().as_str()]))
            .is_ok_and(|out| out.is_success())
    }
}
