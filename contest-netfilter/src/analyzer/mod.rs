//! Dependency discovery for whitelisted sites
//!
//! A whitelisted contest site usually pulls scripts, fonts and captchas from
//! third-party hosts. The analyzer loads each site once, classifies every
//! host it contacted and keeps the essential ones.

pub mod capture;

pub use capture::{ChromiumLoader, PageCapture, PageLoader};

use crate::config::AnalyzerConfig;
use crate::domain::Domain;
use crate::filter::{Classification, HostClassifier};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Source domain → essential hosts it depends on
pub type DependencyMap = BTreeMap<Domain, BTreeSet<Domain>>;

/// URL variants tried for a domain, in order
pub fn url_variants(domain: &Domain) -> [String; 4] {
    [
        format!("https://{}", domain),
        format!("http://{}", domain),
        format!("https://www.{}", domain),
        format!("http://www.{}", domain),
    ]
}

pub struct DependencyAnalyzer {
    loader: Box<dyn PageLoader>,
    classifier: HostClassifier,
    crawl_delay: Duration,
}

impl DependencyAnalyzer {
    pub fn new(loader: Box<dyn PageLoader>, config: &AnalyzerConfig) -> Self {
        Self {
            loader,
            classifier: HostClassifier::new(config),
            crawl_delay: Duration::from_millis(config.crawl_delay_ms),
        }
    }

    pub fn with_crawl_delay(mut self, delay: Duration) -> Self {
        self.crawl_delay = delay;
        self
    }

    /// Give the page loader back for the next run
    pub fn into_loader(self) -> Box<dyn PageLoader> {
        self.loader
    }

    /// Essential dependency hosts of `domain`.
    ///
    /// Load failures are logged and yield an empty set.
    pub fn analyze(&self, domain: &Domain) -> BTreeSet<Domain> {
        let Some(capture) = self.load_first_variant(domain) else {
            tracing::warn!("Could not load any URL variant of {}, no dependencies recorded", domain);
            return BTreeSet::new();
        };

        let mut essential = BTreeSet::new();
        let mut blocked = 0usize;

        for url in capture.urls() {
            let Some(host) = capture::extract_host(&url) else {
                continue;
            };
            if host == domain.as_str() || !host.contains('.') {
                continue;
            }

            match self.classifier.classify(&host) {
                Classification::Essential => {
                    essential.insert(Domain::from_normalized(host));
                }
                Classification::Blocked => {
                    tracing::debug!("{}: blocked dependency {}", domain, host);
                    blocked += 1;
                }
                Classification::Unclassified => {
                    tracing::debug!("{}: ignoring unclassified dependency {}", domain, host);
                }
            }
        }

        tracing::info!(
            "{}: {} essential dependencies, {} blocked",
            domain,
            essential.len(),
            blocked
        );
        essential
    }

    fn load_first_variant(&self, domain: &Domain) -> Option<PageCapture> {
        for url in url_variants(domain) {
            match self.loader.load(&url) {
                Ok(capture) => {
                    tracing::debug!("Loaded {}", url);
                    return Some(capture);
                }
                Err(e) => tracing::debug!("{}", e),
            }
        }
        None
    }

    /// Analyze every domain not yet in `entries` (all of them when
    /// `force_refresh`), merging results in. Returns the domains analyzed.
    pub async fn analyze_batch(
        &self,
        domains: &BTreeSet<Domain>,
        entries: &mut DependencyMap,
        force_refresh: bool,
    ) -> Vec<Domain> {
        let pending: Vec<&Domain> = domains
            .iter()
            .filter(|d| force_refresh || !entries.contains_key(*d))
            .collect();

        if pending.is_empty() {
            tracing::info!("All {} domains already analyzed", domains.len());
            return Vec::new();
        }

        tracing::info!("Analyzing dependencies of {} domains", pending.len());
        let mut analyzed = Vec::with_capacity(pending.len());

        for (i, domain) in pending.into_iter().enumerate() {
            if i > 0 && !self.crawl_delay.is_zero() {
                tokio::time::sleep(self.crawl_delay).await;
            }
            let deps = self.analyze(domain);
            entries.insert(domain.clone(), deps);
            analyzed.push(domain.clone());
        }

        analyzed
    }
}
