//! Domain to address resolution

use crate::domain::Domain;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use trust_dns_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Domain → addresses, rebuilt on every rule application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedIpSet {
    entries: BTreeMap<Domain, BTreeSet<IpAddr>>,
}

impl ResolvedIpSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, domain: Domain, addrs: BTreeSet<IpAddr>) {
        self.entries.entry(domain).or_default().extend(addrs);
    }

    pub fn get(&self, domain: &Domain) -> Option<&BTreeSet<IpAddr>> {
        self.entries.get(domain)
    }

    /// Every address across all domains, deduplicated and sorted
    pub fn addresses(&self) -> BTreeSet<IpAddr> {
        self.entries.values().flatten().copied().collect()
    }

    /// Domains that produced no address at all
    pub fn unresolved(&self) -> impl Iterator<Item = &Domain> {
        self.entries
            .iter()
            .filter(|(_, addrs)| addrs.is_empty())
            .map(|(domain, _)| domain)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Looks up the A and AAAA records of one name
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Addresses for `name`; an empty set when the lookup fails
    async fn lookup(&self, name: &str) -> BTreeSet<IpAddr>;
}

/// Resolver backed by the system stub resolver configuration
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    /// Use `/etc/resolv.conf`, falling back to the library's default upstreams
    pub fn new() -> Self {
        let (config, mut opts) = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                tracing::warn!("Cannot read system resolver configuration ({}), using defaults", e);
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        opts.attempts = 1;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, name: &str) -> BTreeSet<IpAddr> {
        // Trailing dot keeps the search list out of it
        match self.resolver.lookup_ip(format!("{}.", name)).await {
            Ok(lookup) => lookup.iter().collect(),
            Err(e) => {
                tracing::debug!("DNS lookup failed for {}: {}", name, e);
                BTreeSet::new()
            }
        }
    }
}

/// Resolves a domain together with its usual subdomains
pub struct DnsResolver {
    resolver: Box<dyn HostResolver>,
    subdomains: Vec<String>,
}

impl DnsResolver {
    pub fn new(resolver: Box<dyn HostResolver>, subdomains: Vec<String>) -> Self {
        Self {
            resolver,
            subdomains,
        }
    }

    pub fn into_resolver(self) -> Box<dyn HostResolver> {
        self.resolver
    }

    /// Names looked up for `domain`: the domain itself, then each subdomain
    pub fn names(&self, domain: &Domain) -> Vec<String> {
        std::iter::once(domain.to_string())
            .chain(self.subdomains.iter().map(|sub| domain.with_subdomain(sub)))
            .collect()
    }

    /// Union of all addresses of `domain` and its subdomains
    pub async fn resolve(&self, domain: &Domain) -> BTreeSet<IpAddr> {
        let mut addrs = BTreeSet::new();
        for name in self.names(domain) {
            addrs.extend(self.resolver.lookup(&name).await);
        }
        addrs
    }

    /// Resolve every domain, one after another
    pub async fn resolve_all<'a, I>(&self, domains: I) -> ResolvedIpSet
    where
        I: IntoIterator<Item = &'a Domain>,
    {
        let mut resolved = ResolvedIpSet::new();
        for domain in domains {
            let addrs = self.resolve(domain).await;
            if addrs.is_empty() {
                tracing::warn!("No addresses found for {}", domain);
            } else {
                tracing::debug!("{} resolved to {} addresses", domain, addrs.len());
            }
            resolved.insert(domain.clone(), addrs);
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DNS_SUBDOMAINS;
    use std::collections::HashMap;

    struct TableResolver(HashMap<String, Vec<IpAddr>>);

    #[async_trait]
    impl HostResolver for TableResolver {
        async fn lookup(&self, name: &str) -> BTreeSet<IpAddr> {
            self.0.get(name).into_iter().flatten().copied().collect()
        }
    }

    fn resolver(table: &[(&str, &str)]) -> DnsResolver {
        let mut map: HashMap<String, Vec<IpAddr>> = HashMap::new();
        for (name, ip) in table {
            map.entry(name.to_string())
                .or_default()
                .push(ip.parse().unwrap());
        }
        let subdomains = DNS_SUBDOMAINS.iter().map(|s| s.to_string()).collect();
        DnsResolver::new(Box::new(TableResolver(map)), subdomains)
    }

    #[test]
    fn test_names_include_subdomains() {
        let dns = resolver(&[]);
        let domain = Domain::parse("cses.fi").unwrap();
        assert_eq!(
            dns.names(&domain),
            vec![
                "cses.fi",
                "www.cses.fi",
                "api.cses.fi",
                "cdn.cses.fi",
                "static.cses.fi",
                "assets.cses.fi"
            ]
        );
    }

    #[tokio::test]
    async fn test_resolve_unions_subdomains() {
        let dns = resolver(&[
            ("kattis.com", "203.0.113.10"),
            ("www.kattis.com", "203.0.113.10"),
            ("cdn.kattis.com", "198.51.100.7"),
            ("cdn.kattis.com", "2001:db8::7"),
        ]);
        let addrs = dns.resolve(&Domain::parse("kattis.com").unwrap()).await;
        let expected: BTreeSet<IpAddr> = ["203.0.113.10", "198.51.100.7", "2001:db8::7"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(addrs, expected);
    }

    #[tokio::test]
    async fn test_resolve_all_keeps_unresolved() {
        let dns = resolver(&[("a.example", "192.0.2.1"), ("b.example", "192.0.2.1")]);
        let domains = [
            Domain::parse("a.example").unwrap(),
            Domain::parse("b.example").unwrap(),
            Domain::parse("gone.example").unwrap(),
        ];
        let resolved = dns.resolve_all(&domains).await;

        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved.addresses().len(), 1);
        let unresolved: Vec<_> = resolved.unresolved().map(|d| d.as_str()).collect();
        assert_eq!(unresolved, vec!["gone.example"]);
    }
}
