//! Periodic re-application of the restrictions
//!
//! Resolved addresses of CDNs drift, so the rules go stale within hours.
//! The monitor re-applies them on a fixed interval and re-analyzes the
//! dependencies once the cache is older than the configured age.

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::manager::{ContestManager, RestrictReport};
use contest_netfilter::Username;
use std::future::Future;
use std::time::Duration;

pub struct Monitor {
    manager: ContestManager,
    user: Username,
    interval: Duration,
    retry: Duration,
    max_cache_age: Duration,
}

impl Monitor {
    pub fn new(manager: ContestManager, user: Username, config: &MonitorConfig) -> Self {
        Self {
            manager,
            user,
            interval: config.interval(),
            retry: config.retry(),
            max_cache_age: config.max_cache_age(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One pass: re-analyze when the cache is stale, then re-apply
    pub async fn tick(&mut self) -> Result<RestrictReport> {
        let stale = self
            .manager
            .dependency_cache()
            .is_older_than(self.max_cache_age);
        if stale {
            tracing::info!("Dependency cache is stale, re-analyzing");
        }
        self.manager.restrict(&self.user, stale).await
    }

    /// Loop until Ctrl-C
    pub async fn run(self) -> usize {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Loop until `shutdown` completes. Returns the number of passes made.
    pub async fn run_until<F>(mut self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(
            "Monitoring restrictions for '{}' every {} minutes",
            self.user,
            self.interval.as_secs() / 60
        );

        let mut passes = 0;
        loop {
            passes += 1;
            let delay = match self.tick().await {
                Ok(report) => {
                    tracing::info!(
                        "[{}] Re-applied {} rules for {} domains",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        report.rules.rules_added,
                        report.allowed_domains
                    );
                    self.interval
                }
                Err(e) => {
                    tracing::error!("Refresh failed: {}, retrying in {}s", e, self.retry.as_secs());
                    self.retry
                }
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Monitor stopped after {} passes", passes);
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use contest_netfilter::{CommandOutput, RecordingGateway};
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::time::Instant;

    fn monitor(dir: &TempDir, gateway: Arc<RecordingGateway>) -> Monitor {
        let mut config = Config::default();
        config.network.essential_domains.clear();
        config.persistence.rules_dir = dir.path().join("iptables");
        config.persistence.systemd_dir = dir.path().join("systemd");
        config.usb.udev_dir = dir.path().join("udev");
        config.usb.polkit_dir = dir.path().join("polkit");
        fs::write(dir.path().join("whitelist.txt"), "").unwrap();
        fs::write(dir.path().join(".dependency_cache.json"), "{}").unwrap();

        let monitor_config = config.monitor.clone();
        let manager = ContestManager::new(config, dir.path(), gateway);
        Monitor::new(manager, Username::parse("participant").unwrap(), &monitor_config)
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::with_responder(|inv| match inv.program.as_str() {
            "id" => CommandOutput::ok_with_stdout("1001\n"),
            _ => CommandOutput::ok(),
        }));
        let passes = monitor(&dir, gateway.clone()).run_until(async {}).await;

        assert_eq!(passes, 1);
        assert!(gateway
            .command_lines()
            .contains(&"iptables -N CONTEST_PARTICIPANT_OUT".to_string()));
    }

    #[tokio::test]
    async fn test_failure_keeps_looping() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(RecordingGateway::with_responder(|_| CommandOutput::failed(1, "")));
        let mut monitor = monitor(&dir, gateway).with_interval(Duration::from_secs(5));

        assert!(monitor.tick().await.is_err());
        assert_eq!(monitor.interval(), Duration::from_secs(5));
        assert_eq!(monitor.run_until(async {}).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_retry_after_failure_and_interval_after_success() {
        let dir = TempDir::new().unwrap();
        // Each pass starts with `id -u`; the first lookup fails
        let passes_at = Arc::new(Mutex::new(Vec::new()));
        let seen = passes_at.clone();
        let gateway = Arc::new(RecordingGateway::with_responder(move |inv| {
            if inv.program != "id" {
                return CommandOutput::ok();
            }
            let mut seen = seen.lock().unwrap();
            seen.push(Instant::now());
            if seen.len() == 1 {
                CommandOutput::failed(1, "id: temporarily unavailable")
            } else {
                CommandOutput::ok_with_stdout("1001\n")
            }
        }));

        let interval = Duration::from_secs(600);
        let retry = Duration::from_secs(60);
        let monitor = monitor(&dir, gateway).with_interval(interval);
        let start = Instant::now();
        let shutdown = tokio::time::sleep(retry + interval + Duration::from_secs(1));

        let passes = monitor.run_until(shutdown).await;

        assert_eq!(passes, 3);
        let passes_at = passes_at.lock().unwrap();
        let offsets: Vec<Duration> = passes_at.iter().map(|t| *t - start).collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, retry, retry + interval]
        );
        assert_eq!(start.elapsed(), retry + interval + Duration::from_secs(1));
    }
}
