//! Keyword classification of crawled dependency hosts

use crate::config::schema::{AnalyzerConfig, CDN_SUFFIXES};

/// Verdict for one external host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Must never be reachable, even if a whitelisted page pulls it in
    Blocked,
    /// Needed for a whitelisted page to work
    Essential,
    /// Neither; dropped
    Unclassified,
}

/// Classifies hosts by substring keywords
#[derive(Debug, Clone)]
pub struct HostClassifier {
    blocked: Vec<String>,
    essential: Vec<String>,
    cdn_patterns: Vec<String>,
    cdn_providers: Vec<String>,
}

impl HostClassifier {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let lower = |list: &[String]| list.iter().map(|k| k.to_lowercase()).collect();
        Self {
            blocked: lower(&config.blocked_keywords),
            essential: lower(&config.essential_keywords),
            cdn_patterns: lower(&config.cdn_patterns),
            cdn_providers: lower(&config.cdn_providers),
        }
    }

    /// Classify a lowercased host name. Blocked keywords win over everything.
    pub fn classify(&self, host: &str) -> Classification {
        let host = host.to_lowercase();

        if self.blocked.iter().any(|k| host.contains(k.as_str())) {
            return Classification::Blocked;
        }

        if self.essential.iter().any(|k| host.contains(k.as_str()))
            || self.cdn_patterns.iter().any(|p| host.contains(p.as_str()))
            || self.is_cdn_provider(&host)
        {
            return Classification::Essential;
        }

        Classification::Unclassified
    }

    /// Whether a host should be allowed as a dependency
    pub fn is_essential(&self, host: &str) -> bool {
        self.classify(host) == Classification::Essential
    }

    fn is_cdn_provider(&self, host: &str) -> bool {
        CDN_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
            && self.cdn_providers.iter().any(|p| host.contains(p.as_str()))
    }
}

impl Default for HostClassifier {
    fn default() -> Self {
        Self::new(&AnalyzerConfig::default())
    }
}
