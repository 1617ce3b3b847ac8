//! USB mass storage restriction
//!
//! Keyboards, mice and hubs keep working; block devices and mass-storage
//! interfaces are locked down by udev, and udisks2 mounts are refused to the
//! contest user by polkit.

use crate::config::UsbConfig;
use contest_netfilter::{Invocation, SystemGateway, Username};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

/// One udev rule line: comparisons followed by assignments
#[derive(Debug, Clone, Default)]
pub struct UdevRule {
    matches: Vec<(String, String)>,
    assigns: Vec<(String, &'static str, String)>,
}

impl UdevRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// `KEY=="value"`
    pub fn when(mut self, key: &str, value: &str) -> Self {
        self.matches.push((key.to_string(), value.to_string()));
        self
    }

    /// `KEY:="value"`, final assignment later rules cannot override
    pub fn set_final(mut self, key: &str, value: &str) -> Self {
        self.assigns.push((key.to_string(), ":=", value.to_string()));
        self
    }

    /// `KEY="value"`
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.assigns.push((key.to_string(), "=", value.to_string()));
        self
    }

    pub fn render(&self) -> String {
        self.matches
            .iter()
            .map(|(k, v)| format!("{}==\"{}\"", k, v))
            .chain(self.assigns.iter().map(|(k, op, v)| format!("{}{}\"{}\"", k, op, v)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Udev rules locking USB storage down
pub fn udev_rules(user: &Username) -> String {
    let removable_block = UdevRule::new()
        .when("ACTION", "add")
        .when("SUBSYSTEM", "block")
        .when("ATTRS{removable}", "1")
        .when("ENV{ID_BUS}", "usb")
        .set_final("OWNER", "root")
        .set_final("GROUP", "root")
        .set_final("MODE", "0600")
        .set("ENV{UDISKS_IGNORE}", "1");
    let storage_interface = UdevRule::new()
        .when("ACTION", "add")
        .when("SUBSYSTEM", "usb")
        .when("ATTR{bInterfaceClass}", "08")
        .set("ATTR{authorized}", "0");
    let storage_driver = UdevRule::new()
        .when("ACTION", "add")
        .when("SUBSYSTEM", "usb")
        .when("ENV{ID_USB_DRIVER}", "usb-storage")
        .set("ATTR{authorized}", "0");

    let mut out = String::new();
    let _ = writeln!(out, "# Contest USB storage restriction for user {}", user);
    let _ = writeln!(out, "# HID (class 03) and hub (class 09) devices are not matched");
    out.push('\n');
    out.push_str("# Removable USB block devices\n");
    let _ = writeln!(out, "{}", removable_block.render());
    out.push_str("# Mass storage interfaces\n");
    let _ = writeln!(out, "{}", storage_interface.render());
    out.push_str("# usb-storage driver\n");
    let _ = writeln!(out, "{}", storage_driver.render());
    out
}

/// udisks2 actions refused to the contest user
const UDISKS_ACTIONS: &[&str] = &[
    "org.freedesktop.udisks2.filesystem-mount",
    "org.freedesktop.udisks2.filesystem-mount-system",
    "org.freedesktop.udisks2.filesystem-mount-other-seat",
    "org.freedesktop.udisks2.encrypted-unlock",
];

/// Polkit rule refusing udisks2 mounts of USB devices to `user`
pub fn polkit_rules(user: &Username) -> String {
    let actions = UDISKS_ACTIONS
        .iter()
        .map(|a| format!("        \"{}\"", a))
        .collect::<Vec<_>>()
        .join(",\n");

    let mut out = String::new();
    let _ = writeln!(out, "// Contest USB storage restriction for user {}", user);
    out.push_str("polkit.addRule(function(action, subject) {\n");
    let _ = writeln!(out, "    if (subject.user != \"{}\") {{", user);
    out.push_str("        return polkit.Result.NOT_HANDLED;\n    }\n");
    let _ = writeln!(out, "    var blocked = [\n{}\n    ];", actions);
    out.push_str("    if (blocked.indexOf(action.id) < 0) {\n");
    out.push_str("        return polkit.Result.NOT_HANDLED;\n    }\n");
    out.push_str("    var device = action.lookup(\"device\") || \"\";\n");
    out.push_str("    var bus = action.lookup(\"drive.bus\") || \"\";\n");
    out.push_str("    if (bus == \"usb\" || device.indexOf(\"/dev/sd\") == 0) {\n");
    let _ = writeln!(
        out,
        "        polkit.log(\"Refusing \" + action.id + \" to contest user {}\");",
        user
    );
    out.push_str("        return polkit.Result.NO;\n    }\n");
    out.push_str("    return polkit.Result.NOT_HANDLED;\n});\n");
    out
}

/// Writes and removes the per-user udev and polkit rule files
pub struct UsbRestrictor {
    gateway: Arc<dyn SystemGateway>,
    config: UsbConfig,
    user: Username,
}

impl UsbRestrictor {
    pub fn new(gateway: Arc<dyn SystemGateway>, config: UsbConfig, user: Username) -> Self {
        Self {
            gateway,
            config,
            user,
        }
    }

    fn file_name(&self) -> String {
        format!("99-contest-usb-{}.rules", self.user)
    }

    pub fn udev_path(&self) -> PathBuf {
        self.config.udev_dir.join(self.file_name())
    }

    pub fn polkit_path(&self) -> PathBuf {
        self.config.polkit_dir.join(self.file_name())
    }

    /// Write both rule files and reload udev and polkit.
    /// Returns the number of failed steps.
    pub fn apply(&self) -> usize {
        let mut failures = 0;
        let files = [
            (self.udev_path(), udev_rules(&self.user)),
            (self.polkit_path(), polkit_rules(&self.user)),
        ];
        for (path, contents) in files {
            if let Err(e) = self.gateway.write_file(&path, &contents) {
                tracing::warn!("Failed to write {}: {}", path.display(), e);
                failures += 1;
            }
        }
        failures += self.reload();

        if failures == 0 {
            tracing::info!("USB storage blocked for {}", self.user);
        }
        failures
    }

    /// Delete both rule files (absent is fine) and reload.
    /// Returns the number of failed steps.
    pub fn remove(&self) -> usize {
        let mut failures = 0;
        for path in [self.udev_path(), self.polkit_path()] {
            if let Err(e) = self.gateway.remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
                failures += 1;
            }
        }
        failures + self.reload()
    }

    fn reload(&self) -> usize {
        let commands = [
            Invocation::new("udevadm", ["control", "--reload-rules"]),
            Invocation::new("udevadm", ["trigger"]),
            Invocation::new("systemctl", ["restart", "polkit"]),
        ];
        commands
            .iter()
            .filter(|inv| !self.gateway.run_logged(inv))
            .count()
    }

    /// Both rule files are in place
    pub fn is_active(&self) -> bool {
        self.udev_path().exists() && self.polkit_path().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contest_netfilter::{CommandOutput, RecordingGateway};
    use std::fs;
    use tempfile::TempDir;

    fn restrictor(dir: &TempDir, gateway: Arc<RecordingGateway>) -> UsbRestrictor {
        let config = UsbConfig {
            udev_dir: dir.path().join("udev"),
            polkit_dir: dir.path().join("polkit"),
        };
        UsbRestrictor::new(gateway, config, Username::parse("participant").unwrap())
    }

    #[test]
    fn test_udev_rule_render() {
        let rule = UdevRule::new()
            .when("SUBSYSTEM", "usb")
            .set_final("MODE", "0600")
            .set("ATTR{authorized}", "0");
        assert_eq!(rule.render(), r#"SUBSYSTEM=="usb", MODE:="0600", ATTR{authorized}="0""#);
    }

    #[test]
    fn test_udev_rules_leave_hid_and_hubs() {
        let text = udev_rules(&Username::parse("participant").unwrap());
        assert!(text.contains(r#"ATTR{bInterfaceClass}=="08""#));
        assert!(text.contains(r#"ENV{ID_USB_DRIVER}=="usb-storage""#));
        assert!(!text.contains(r#"=="03""#));
        assert!(!text.contains(r#"=="09""#));
    }

    #[test]
    fn test_polkit_rules_name_user() {
        let text = polkit_rules(&Username::parse("team_7").unwrap());
        assert!(text.contains(r#"if (subject.user != "team_7") {"#));
        assert!(text.contains("\"org.freedesktop.udisks2.filesystem-mount\""));
        assert!(text.contains("return polkit.Result.NO;"));
    }

    #[test]
    fn test_apply_and_remove() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::new().writing_files());
        let usb = restrictor(&dir, gateway.clone());

        assert!(!usb.is_active());
        assert_eq!(usb.apply(), 0);
        assert!(usb.is_active());
        assert!(fs::read_to_string(usb.udev_path()).unwrap().contains("participant"));
        assert_eq!(
            gateway.command_lines(),
            vec![
                "udevadm control --reload-rules",
                "udevadm trigger",
                "systemctl restart polkit"
            ]
        );

        assert_eq!(usb.remove(), 0);
        assert!(!usb.is_active());
        assert!(!usb.polkit_path().exists());

        // Removing twice is harmless
        assert_eq!(usb.remove(), 0);
    }

    #[test]
    fn test_reload_failure_counted() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(
            RecordingGateway::with_responder(|inv| {
                if inv.matches("systemctl", &["restart", "polkit"]) {
                    CommandOutput::failed(5, "Unit polkit.service not found.")
                } else {
                    CommandOutput::ok()
                }
            })
            .writing_files(),
        );
        let usb = restrictor(&dir, gateway);
        assert_eq!(usb.apply(), 1);
        assert!(usb.is_active());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let usb = restrictor(&dir, Arc::new(RecordingGateway::new()));
        usb.apply();
        assert!(!usb.is_active());
    }
}
