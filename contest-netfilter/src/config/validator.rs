//! Configuration validation

use super::schema::{AnalyzerConfig, NetworkConfig};
use crate::error::{Result, ValidationError};
use ipnet::IpNet;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the network and analyzer sections
    pub fn validate(network: &NetworkConfig, analyzer: &AnalyzerConfig) -> Result<()> {
        Self::validate_chain_prefix(&network.chain_prefix)?;
        Self::parse_ranges(&network.allow_ranges)?;
        Self::validate_keywords(analyzer)?;
        Ok(())
    }

    /// Chain prefixes are short upper-case tokens; 7 characters keep the
    /// longest chain name within the iptables limit
    fn validate_chain_prefix(prefix: &str) -> Result<()> {
        let valid = !prefix.is_empty()
            && prefix.len() <= 7
            && prefix
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(ValidationError::InvalidChainPrefix {
                prefix: prefix.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Parse CIDR strings; a bare address is taken as a single host
    pub fn parse_ranges(ranges: &[String]) -> Result<Vec<IpNet>> {
        ranges
            .iter()
            .map(|range| {
                range
                    .parse::<IpNet>()
                    .or_else(|_| range.parse::<std::net::IpAddr>().map(IpNet::from))
                    .map_err(|_| {
                        ValidationError::InvalidCidr {
                            cidr: range.clone(),
                        }
                        .into()
                    })
            })
            .collect()
    }

    /// An empty keyword is a substring of every host
    fn validate_keywords(analyzer: &AnalyzerConfig) -> Result<()> {
        let lists: [(&'static str, &Vec<String>); 4] = [
            ("blocked_keywords", &analyzer.blocked_keywords),
            ("essential_keywords", &analyzer.essential_keywords),
            ("cdn_patterns", &analyzer.cdn_patterns),
            ("cdn_providers", &analyzer.cdn_providers),
        ];
        for (list, values) in lists {
            if values.iter().any(|k| k.trim().is_empty()) {
                return Err(ValidationError::EmptyKeyword { list }.into());
            }
        }
        Ok(())
    }
}
