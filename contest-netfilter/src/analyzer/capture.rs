//! Page loading and request capture
//!
//! A page is loaded once in a headless Chromium. The browser records its
//! NetLog (every URL requested while the page settles) to a temporary file
//! and prints the rendered DOM on stdout. Both are scanned for absolute
//! `http(s)` URLs.

use crate::error::{NetfilterError, Result};
use crate::gateway::{Invocation, SystemGateway};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use url::Url;

/// `"url": "https://..."` entries in a NetLog that did not parse as JSON
static NETLOG_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""url"\s*:\s*"(https?://[^"\s]+)""#).expect("NetLog URL pattern")
});

/// Absolute URLs referenced from `src=`, `href=`, `url(...)` and `@import`
static DOM_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:(?:src|href)\s*=\s*["']?|url\(\s*["']?|@import\s+["'])(https?://[^"'\s<>()]+)"#,
    )
    .expect("DOM URL pattern")
});

/// Everything observed while one page loaded
#[derive(Debug, Clone, Default)]
pub struct PageCapture {
    /// URLs the browser requested
    pub requests: Vec<String>,
    /// Rendered DOM
    pub dom: String,
}

impl PageCapture {
    /// All absolute URLs, from the request log and the DOM
    pub fn urls(&self) -> BTreeSet<String> {
        self.requests
            .iter()
            .cloned()
            .chain(dom_urls(&self.dom))
            .collect()
    }
}

/// Loads a page and reports what it fetched
pub trait PageLoader: Send + Sync {
    fn load(&self, url: &str) -> Result<PageCapture>;
}

/// Headless Chromium run through the system gateway
pub struct ChromiumLoader {
    gateway: Arc<dyn SystemGateway>,
    browser: String,
    timeout_secs: u64,
    settle_ms: u64,
}

impl ChromiumLoader {
    pub fn new(
        gateway: Arc<dyn SystemGateway>,
        browser: impl Into<String>,
        timeout_secs: u64,
        settle_ms: u64,
    ) -> Self {
        Self {
            gateway,
            browser: browser.into(),
            timeout_secs,
            settle_ms,
        }
    }

    fn invocation(&self, url: &str, netlog: &str) -> Invocation {
        Invocation::new(
            "timeout",
            [
                self.timeout_secs.to_string(),
                self.browser.clone(),
                "--headless=new".to_string(),
                "--disable-gpu".to_string(),
                "--no-sandbox".to_string(),
                "--no-first-run".to_string(),
                format!("--virtual-time-budget={}", self.settle_ms),
                format!("--log-net-log={}", netlog),
                "--dump-dom".to_string(),
                url.to_string(),
            ],
        )
    }
}

impl PageLoader for ChromiumLoader {
    fn load(&self, url: &str) -> Result<PageCapture> {
        let netlog = tempfile::Builder::new()
            .prefix("contest-netlog-")
            .suffix(".json")
            .tempfile()?;
        let netlog_path = netlog.path().to_string_lossy().into_owned();

        let output = self.gateway.run(&self.invocation(url, &netlog_path))?;
        if !output.is_success() {
            let reason = match output.status {
                Some(124) => format!("timed out after {}s", self.timeout_secs),
                Some(code) => format!("browser exited with {}: {}", code, output.stderr.trim()),
                None => "browser killed by signal".to_string(),
            };
            return Err(NetfilterError::PageLoad {
                url: url.to_string(),
                reason,
            });
        }
        // A page that rendered always dumps at least its root element
        if output.stdout.trim().is_empty() {
            return Err(NetfilterError::PageLoad {
                url: url.to_string(),
                reason: "browser produced no output".to_string(),
            });
        }

        let raw = std::fs::read_to_string(netlog.path()).unwrap_or_default();
        Ok(PageCapture {
            requests: netlog_urls(&raw),
            dom: output.stdout,
        })
    }
}

/// URLs requested according to a Chromium NetLog.
///
/// Chromium only closes the JSON document on a clean shutdown, so a log cut
/// short by the timeout is scanned textually instead.
pub fn netlog_urls(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => {
            let mut urls = Vec::new();
            collect_urls(&value, &mut urls);
            urls
        }
        Err(_) => NETLOG_URL
            .captures_iter(raw)
            .map(|caps| caps[1].to_string())
            .collect(),
    }
}

fn collect_urls(value: &Value, urls: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::String(s) if key == "url" && is_web_url(s) => urls.push(s.clone()),
                    _ => collect_urls(child, urls),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_urls(item, urls)),
        _ => {}
    }
}

fn is_web_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Absolute URLs referenced from markup and inline styles
pub fn dom_urls(dom: &str) -> Vec<String> {
    DOM_URL
        .captures_iter(dom)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Host of a URL, lowercased, without port and without a leading `www.`
pub fn extract_host(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
