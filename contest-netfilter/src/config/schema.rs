//! Configuration schema types

use serde::{Deserialize, Serialize};

/// Host substrings that mark a crawled dependency as off-limits
pub const BLOCKED_KEYWORDS: &[&str] = &[
    // AI assistants
    "openai", "chatgpt", "anthropic", "claude", "gemini", "bard",
    // Search engines
    "google", "bing", "yahoo", "duckduckgo", "yandex", "baidu",
    // Social media
    "facebook", "twitter", "instagram", "linkedin", "reddit", "discord",
    "telegram", "whatsapp", "tiktok", "youtube", "snapchat",
    // Development Q&A and code hosting
    "github", "gitlab", "stackoverflow", "stackexchange", "medium",
    "dev.to", "hackernews", "codepen", "jsfiddle",
    // Tutorials
    "wikipedia", "w3schools", "tutorialspoint", "freecodecamp",
    "coursera", "udemy", "khan", "edx",
    // Shopping
    "amazon", "ebay", "alibaba", "shopify",
    // Cloud storage
    "dropbox", "onedrive", "icloud", "mega",
    // News
    "cnn", "bbc", "reuters", "news", "techcrunch",
];

/// Host substrings that mark a crawled dependency as needed for the page
pub const ESSENTIAL_KEYWORDS: &[&str] = &[
    // CDNs and static content
    "cdn", "static", "assets", "img", "css", "js", "fonts",
    "cloudflare", "cloudfront", "fastly", "jsdelivr", "unpkg",
    "bootstrapcdn", "jquery", "ajax", "gstatic",
    // Security and auth
    "captcha", "recaptcha", "hcaptcha", "auth", "oauth",
    "ssl", "tls", "cert", "security",
    // APIs
    "api", "webhook", "analytics", "tracking",
    // Math and code rendering
    "mathjax", "katex", "mermaid", "highlight",
    // Fonts and icons
    "fontawesome", "typekit", "googlefonts",
];

/// Host prefix segments typical of CDN and static hosts
pub const CDN_PATTERNS: &[&str] = &[
    "cdn.", "static.", "assets.", "img.", "css.", "js.",
    "fonts.", "api.", "auth.", "ssl.", "captcha",
];

/// Large CDN operators accepted under `.net` / `.io`
pub const CDN_PROVIDERS: &[&str] = &["cloudflare", "fastly", "amazon", "microsoft", "akamai"];

/// Suffixes under which [`CDN_PROVIDERS`] hosts are accepted
pub const CDN_SUFFIXES: &[&str] = &[".net", ".io"];

/// Subdomains resolved alongside every allowed domain
pub const DNS_SUBDOMAINS: &[&str] = &["www", "api", "cdn", "static", "assets"];

/// Domains always allowed regardless of the whitelist
pub const ESSENTIAL_DOMAINS: &[&str] = &[
    // CDNs
    "cloudflare.com", "cloudfront.net", "fastly.com",
    "jsdelivr.net", "unpkg.com", "cdnjs.cloudflare.com",
    // Fonts
    "fonts.googleapis.com", "fonts.gstatic.com", "typekit.net",
    // Captcha
    "recaptcha.net", "hcaptcha.com", "gstatic.com",
    // Math rendering
    "mathjax.org", "cdn.mathjax.org",
    "ajax.googleapis.com",
];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Firewall rule settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Prefix of the per-user chain names (`<PREFIX>_<USER>_OUT`)
    #[serde(default = "default_chain_prefix")]
    pub chain_prefix: String,
    /// Subdomains resolved alongside every allowed domain
    #[serde(default = "default_dns_subdomains")]
    pub dns_subdomains: Vec<String>,
    /// Domains allowed for every restricted user
    #[serde(default = "default_essential_domains")]
    pub essential_domains: Vec<String>,
    /// Extra destinations allowed verbatim, in CIDR notation (e.g. a LAN judge)
    #[serde(default)]
    pub allow_ranges: Vec<String>,
}

fn default_chain_prefix() -> String {
    "CONTEST".to_string()
}

fn default_dns_subdomains() -> Vec<String> {
    strings(DNS_SUBDOMAINS)
}

fn default_essential_domains() -> Vec<String> {
    strings(ESSENTIAL_DOMAINS)
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_prefix: default_chain_prefix(),
            dns_subdomains: default_dns_subdomains(),
            essential_domains: default_essential_domains(),
            allow_ranges: vec![],
        }
    }
}

/// Dependency discovery settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// Headless browser executable
    #[serde(default = "default_browser")]
    pub browser: String,
    /// Hard limit for one page load, including the settle delay
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    /// Time given to scripts after load before capture stops
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Pause between two crawled domains
    #[serde(default = "default_crawl_delay_ms")]
    pub crawl_delay_ms: u64,
    #[serde(default = "default_blocked_keywords")]
    pub blocked_keywords: Vec<String>,
    #[serde(default = "default_essential_keywords")]
    pub essential_keywords: Vec<String>,
    #[serde(default = "default_cdn_patterns")]
    pub cdn_patterns: Vec<String>,
    #[serde(default = "default_cdn_providers")]
    pub cdn_providers: Vec<String>,
}

fn default_browser() -> String {
    "chromium".to_string()
}

fn default_page_timeout_secs() -> u64 {
    30
}

fn default_settle_ms() -> u64 {
    3000
}

fn default_crawl_delay_ms() -> u64 {
    2000
}

fn default_blocked_keywords() -> Vec<String> {
    strings(BLOCKED_KEYWORDS)
}

fn default_essential_keywords() -> Vec<String> {
    strings(ESSENTIAL_KEYWORDS)
}

fn default_cdn_patterns() -> Vec<String> {
    strings(CDN_PATTERNS)
}

fn default_cdn_providers() -> Vec<String> {
    strings(CDN_PROVIDERS)
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            browser: default_browser(),
            page_timeout_secs: default_page_timeout_secs(),
            settle_ms: default_settle_ms(),
            crawl_delay_ms: default_crawl_delay_ms(),
            blocked_keywords: default_blocked_keywords(),
            essential_keywords: default_essential_keywords(),
            cdn_patterns: default_cdn_patterns(),
            cdn_providers: default_cdn_providers(),
        }
    }
}
