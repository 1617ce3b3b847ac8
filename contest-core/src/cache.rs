//! Dependency cache: analyzed domain → essential third-party hosts
//!
//! An absent key means "not analyzed yet"; a key with an empty set means
//! "analyzed, nothing found". Staleness is judged from the file's mtime.

use crate::error::{ManagerError, Result};
use chrono::{DateTime, Local};
use contest_netfilter::{DependencyMap, Domain};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// File name inside the config directory
pub const CACHE_FILE_NAME: &str = ".dependency_cache.json";

#[derive(Debug)]
pub struct DependencyCache {
    path: PathBuf,
    entries: DependencyMap,
}

impl DependencyCache {
    /// Load the cache; a missing or unreadable file is an empty cache
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::read(&path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("{}, starting with an empty cache", e);
                DependencyMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn in_dir(config_dir: &Path) -> Self {
        Self::load(config_dir.join(CACHE_FILE_NAME))
    }

    fn read(path: &Path) -> Result<DependencyMap> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DependencyMap::new()),
            Err(source) => {
                return Err(ManagerError::Cache {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| ManagerError::CacheFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the cache as pretty JSON
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            ManagerError::CacheFormat {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, json + "\n").map_err(|source| ManagerError::Cache {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn entries(&self) -> &DependencyMap {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut DependencyMap {
        &mut self.entries
    }

    pub fn get(&self, domain: &Domain) -> Option<&BTreeSet<Domain>> {
        self.entries.get(domain)
    }

    /// Dependencies of the given domains, merged
    pub fn dependencies_of<'a>(&self, domains: impl IntoIterator<Item = &'a Domain>) -> BTreeSet<Domain> {
        domains
            .into_iter()
            .filter_map(|d| self.entries.get(d))
            .flatten()
            .cloned()
            .collect()
    }

    /// Last write time of the cache file
    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Time since the last write, `None` when never written
    pub fn age(&self) -> Option<Duration> {
        self.modified()
            .map(|t| SystemTime::now().duration_since(t).unwrap_or_default())
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.age().map_or(true, |age| age > max_age)
    }

    /// Cache contents as seen from the current whitelist
    pub fn report(&self, whitelist: &BTreeSet<Domain>) -> DependencyReport {
        let domains = whitelist
            .iter()
            .map(|d| (d.clone(), self.entries.get(d).cloned()))
            .collect::<Vec<_>>();
        let analyzed = domains.iter().filter(|(_, deps)| deps.is_some()).count();

        DependencyReport {
            whitelisted: whitelist.len(),
            analyzed,
            unique: self.dependencies_of(whitelist),
            domains,
            updated: self.modified().map(DateTime::<Local>::from),
        }
    }
}

/// Summary for the `dependencies` listing
#[derive(Debug, Clone)]
pub struct DependencyReport {
    pub whitelisted: usize,
    pub analyzed: usize,
    /// Each whitelisted domain with its dependencies, `None` when not analyzed
    pub domains: Vec<(Domain, Option<BTreeSet<Domain>>)>,
    /// Every dependency across whitelisted domains
    pub unique: BTreeSet<Domain>,
    pub updated: Option<DateTime<Local>>,
}

impl DependencyReport {
    pub fn updated_display(&self) -> String {
        self.updated
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn domain(s: &str) -> Domain {
        Domain::parse(s).unwrap()
    }

    fn set(list: &[&str]) -> BTreeSet<Domain> {
        list.iter().map(|s| domain(s)).collect()
    }

    #[test]
    fn test_missing_cache_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = DependencyCache::in_dir(dir.path());
        assert!(cache.entries().is_empty());
        assert!(!cache.exists());
        assert!(cache.age().is_none());
        assert!(cache.is_older_than(Duration::from_secs(3600)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut cache = DependencyCache::in_dir(dir.path());
        cache
            .entries_mut()
            .insert(domain("codeforces.com"), set(&["cdn.jsdelivr.net", "static.codeforces.org"]));
        cache.entries_mut().insert(domain("cses.fi"), BTreeSet::new());
        cache.save().unwrap();

        let text = fs::read_to_string(cache.path()).unwrap();
        assert!(text.contains("\"codeforces.com\": [\n"));
        assert!(text.contains("\"cses.fi\": []"));

        let reloaded = DependencyCache::in_dir(dir.path());
        assert_eq!(reloaded.entries(), cache.entries());
        assert!(!reloaded.is_older_than(Duration::from_secs(3600)));
    }

    #[test]
    fn test_corrupt_cache_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CACHE_FILE_NAME), "{ not json").unwrap();
        let cache = DependencyCache::in_dir(dir.path());
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_report() {
        let dir = TempDir::new().unwrap();
        let mut cache = DependencyCache::in_dir(dir.path());
        cache
            .entries_mut()
            .insert(domain("a.example"), set(&["cdn.shared.net", "fonts.a.example"]));
        cache.entries_mut().insert(domain("b.example"), set(&["cdn.shared.net"]));
        cache.entries_mut().insert(domain("removed.example"), set(&["cdn.old.net"]));

        let report = cache.report(&set(&["a.example", "b.example", "c.example"]));
        assert_eq!(report.whitelisted, 3);
        assert_eq!(report.analyzed, 2);
        assert_eq!(report.unique, set(&["cdn.shared.net", "fonts.a.example"]));
        assert_eq!(report.domains[2], (domain("c.example"), None));
        assert_eq!(report.updated_display(), "never");
    }
}
