//! Built-in defaults embedded in the binary
//!
//! The default whitelist seeds `whitelist.txt` the first time a config
//! directory is used. It is parsed once on first access.

use contest_netfilter::Domain;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Lazy-initialized default whitelist
static DEFAULT_WHITELIST: LazyLock<BTreeSet<Domain>> = LazyLock::new(load_default_whitelist);

/// Get the bundled default whitelist
pub fn default_whitelist() -> &'static BTreeSet<Domain> {
    &DEFAULT_WHITELIST
}

fn load_default_whitelist() -> BTreeSet<Domain> {
    const DEFAULT_WHITELIST_TXT: &str = include_str!("../whitelist.default.txt");
    parse_domain_lines(DEFAULT_WHITELIST_TXT)
}

/// Domains of a line-oriented list; blank, `#` and malformed lines are skipped
pub fn parse_domain_lines(text: &str) -> BTreeSet<Domain> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match Domain::parse(line) {
            Ok(domain) => Some(domain),
            Err(e) => {
                tracing::warn!("Skipping whitelist entry: {}", e);
                None
            }
        })
        .collect()
}
