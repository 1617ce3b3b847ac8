//! Orchestration of the contest commands
//!
//! `restrict` runs the whole pipeline: whitelist, dependency analysis (cached),
//! DNS resolution, rule application, persistence and the USB lockdown. Every
//! step is awaited before the next one starts.

use crate::cache::{DependencyCache, DependencyReport};
use crate::config::Config;
use crate::error::Result;
use crate::persistence::Persistence;
use crate::provision::Provisioner;
use crate::usb::UsbRestrictor;
use crate::whitelist::{Change, WhitelistStore};
use chrono::{DateTime, Local};
use contest_netfilter::{
    ApplyReport, ChainNames, ChromiumLoader, ConfigValidator, DependencyAnalyzer, DnsResolver, Domain,
    FirewallStatus, HostResolver, Invocation, PageLoader, RuleBuilder, RuleSet, SystemGateway,
    SystemResolver, Username,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of `restrict`
#[derive(Debug, Clone)]
pub struct RestrictReport {
    /// Domains allowed: whitelist, their dependencies and the essential list
    pub allowed_domains: usize,
    /// Allowed domains that resolved to nothing
    pub unresolved: Vec<Domain>,
    pub addresses: usize,
    pub rules: ApplyReport,
    pub persistence_failures: usize,
    /// The boot snapshot was taken although some rules failed to apply
    pub partial_snapshot: bool,
    pub usb_failures: usize,
}

impl RestrictReport {
    pub fn is_complete(&self) -> bool {
        self.rules.is_complete() && self.persistence_failures == 0 && self.usb_failures == 0
    }
}

/// Live restriction state for `status`
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub user: Username,
    pub uid: Option<u32>,
    pub firewall: FirewallStatus,
    pub persistence_enabled: bool,
    pub usb_active: bool,
    pub whitelisted: usize,
    /// Last dependency analysis, `None` before the first one
    pub cache_updated: Option<DateTime<Local>>,
}

impl StatusReport {
    pub fn is_restricted(&self) -> bool {
        self.firewall.is_active() && self.usb_active
    }
}

pub struct ContestManager {
    config: Config,
    config_dir: PathBuf,
    gateway: Arc<dyn SystemGateway>,
    whitelist: WhitelistStore,
    resolver: Option<Box<dyn HostResolver>>,
    loader: Option<Box<dyn PageLoader>>,
    cache_writes: bool,
}

impl ContestManager {
    pub fn new(config: Config, config_dir: impl Into<PathBuf>, gateway: Arc<dyn SystemGateway>) -> Self {
        let config_dir = config_dir.into();
        Self {
            whitelist: WhitelistStore::in_dir(&config_dir),
            config,
            config_dir,
            gateway,
            resolver: None,
            loader: None,
            cache_writes: true,
        }
    }

    /// Keep analysis results in memory only. Used for dry runs, where pages
    /// are never really loaded and an empty result means nothing.
    pub fn without_cache_writes(mut self) -> Self {
        self.cache_writes = false;
        self
    }

    /// Resolve names with `resolver` instead of the system configuration
    pub fn with_resolver(mut self, resolver: Box<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Load pages with `loader` instead of headless Chromium
    pub fn with_page_loader(mut self, loader: Box<dyn PageLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn whitelist(&self) -> &WhitelistStore {
        &self.whitelist
    }

    pub fn dependency_cache(&self) -> DependencyCache {
        DependencyCache::in_dir(&self.config_dir)
    }

    fn rule_builder(&self, user: &Username) -> RuleBuilder {
        RuleBuilder::new(
            self.gateway.clone(),
            ChainNames::new(&self.config.network.chain_prefix, user),
        )
    }

    fn persistence(&self, user: &Username) -> Persistence {
        Persistence::new(self.gateway.clone(), self.config.persistence.clone(), user.clone())
    }

    fn usb(&self, user: &Username) -> UsbRestrictor {
        UsbRestrictor::new(self.gateway.clone(), self.config.usb.clone(), user.clone())
    }

    pub fn provisioner(&self, user: &Username) -> Provisioner {
        Provisioner::new(self.gateway.clone(), self.config.accounts.clone(), user.clone())
    }

    fn analyzer(&mut self) -> DependencyAnalyzer {
        let analyzer = &self.config.analyzer;
        let loader = self.loader.take().unwrap_or_else(|| {
            Box::new(ChromiumLoader::new(
                self.gateway.clone(),
                analyzer.browser.clone(),
                analyzer.page_timeout_secs,
                analyzer.settle_ms,
            ))
        });
        DependencyAnalyzer::new(loader, analyzer)
    }

    fn dns(&mut self) -> DnsResolver {
        let resolver = self
            .resolver
            .take()
            .unwrap_or_else(|| Box::new(SystemResolver::new()));
        DnsResolver::new(resolver, self.config.network.dns_subdomains.clone())
    }

    /// Whitelisted domains, seeding the default list on first use
    pub fn domains(&self) -> Result<BTreeSet<Domain>> {
        self.whitelist.ensure_exists()?;
        self.whitelist.load()
    }

    /// Analyze whitelisted domains missing from the cache (all with
    /// `force_refresh`) and save the cache when anything changed
    pub async fn refresh_dependencies(&mut self, force_refresh: bool) -> Result<DependencyCache> {
        let domains = self.domains()?;
        let mut cache = self.dependency_cache();
        let analyzer = self.analyzer();

        let analyzed = analyzer
            .analyze_batch(&domains, cache.entries_mut(), force_refresh)
            .await;
        self.loader = Some(analyzer.into_loader());

        if !analyzed.is_empty() && !self.cache_writes {
            tracing::info!("Not saving {} analyzed domains to the cache", analyzed.len());
        } else if !analyzed.is_empty() {
            match cache.save() {
                Ok(()) => tracing::info!("Dependency cache updated: {}", cache.path().display()),
                Err(e) => tracing::warn!("{}", e),
            }
        }
        Ok(cache)
    }

    /// Everything a restricted user may reach
    fn allowed_domains(&self, domains: &BTreeSet<Domain>, cache: &DependencyCache) -> BTreeSet<Domain> {
        let mut allowed = domains.clone();
        allowed.extend(cache.dependencies_of(domains));
        for entry in &self.config.network.essential_domains {
            match Domain::parse(entry) {
                Ok(domain) => {
                    allowed.insert(domain);
                }
                Err(e) => tracing::warn!("Skipping essential domain: {}", e),
            }
        }
        allowed
    }

    /// Install the full restriction set for `user`
    pub async fn restrict(&mut self, user: &Username, force_refresh: bool) -> Result<RestrictReport> {
        let uid = user.uid(self.gateway.as_ref())?;
        let ranges = ConfigValidator::parse_ranges(&self.config.network.allow_ranges)?;

        tracing::info!("Applying restrictions for '{}' (uid {})", user, uid);
        let cache = self.refresh_dependencies(force_refresh).await?;
        let domains = self.domains()?;
        let allowed = self.allowed_domains(&domains, &cache);

        tracing::info!("Resolving {} allowed domains", allowed.len());
        let dns = self.dns();
        let resolved = dns.resolve_all(&allowed).await;
        self.resolver = Some(dns.into_resolver());

        let rules = RuleSet::build(&resolved, &ranges);
        let applied = self.rule_builder(user).apply(uid, &rules)?;
        let partial_snapshot = !applied.is_complete();
        if partial_snapshot {
            tracing::warn!(
                "Saving a partial ruleset for boot ({} rule failures)",
                applied.failures.len()
            );
        }
        let persisted = self.persistence(user).save();
        let usb_failures = self.usb(user).apply();

        Ok(RestrictReport {
            allowed_domains: allowed.len(),
            unresolved: resolved.unresolved().cloned().collect(),
            addresses: rules.destination_count(),
            rules: applied,
            persistence_failures: persisted.failures,
            partial_snapshot,
            usb_failures,
        })
    }

    /// Remove firewall, persistence and USB restrictions. Returns the number
    /// of failed steps; missing state is not a failure.
    pub fn unrestrict(&self, user: &Username) -> usize {
        tracing::info!("Removing restrictions for '{}'", user);
        let removed = self.rule_builder(user).teardown();
        tracing::debug!("Removed {} OUTPUT bindings", removed);

        // Keep a saved ruleset from bringing the chains back at boot
        if self.gateway.command_exists("netfilter-persistent") {
            self.gateway
                .run_logged(&Invocation::new("netfilter-persistent", ["save"]));
        }
        self.persistence(user).remove();
        self.usb(user).remove()
    }

    pub fn status(&self, user: &Username) -> Result<StatusReport> {
        Ok(StatusReport {
            user: user.clone(),
            uid: user.uid(self.gateway.as_ref()).ok(),
            firewall: self.rule_builder(user).status(),
            persistence_enabled: self.persistence(user).is_enabled(),
            usb_active: self.usb(user).is_active(),
            whitelisted: self.whitelist.load()?.len(),
            cache_updated: self.dependency_cache().modified().map(DateTime::<Local>::from),
        })
    }

    pub fn add_domain(&self, input: &str) -> Result<(Domain, Change)> {
        self.whitelist.ensure_exists()?;
        self.whitelist.add(input)
    }

    pub fn remove_domain(&self, input: &str) -> Result<(Domain, Change)> {
        self.whitelist.ensure_exists()?;
        self.whitelist.remove(input)
    }

    pub fn list_domains(&self) -> Result<Vec<Domain>> {
        Ok(self.domains()?.into_iter().collect())
    }

    /// Cache contents for the current whitelist, `None` before the first analysis
    pub fn dependency_report(&self) -> Result<Option<DependencyReport>> {
        let cache = self.dependency_cache();
        if !cache.exists() {
            return Ok(None);
        }
        Ok(Some(cache.report(&self.domains()?)))
    }

    /// Create the contest account. Returns the number of non-fatal failures.
    pub fn setup(&self, user: &Username) -> Result<usize> {
        tracing::info!("Setting up contest account '{}'", user);
        self.whitelist.ensure_exists()?;
        self.provisioner(user).setup()
    }

    /// Restore the account to its post-setup state. Returns the number of
    /// non-fatal failures.
    pub fn reset(&self, user: &Username) -> Result<usize> {
        let provisioner = self.provisioner(user);
        provisioner.ensure_resettable()?;
        let failures = self.unrestrict(user);
        Ok(failures + provisioner.restore_home()?)
    }
}
