//! Whitelisted domain store backed by a line-oriented text file

use crate::config::builtin;
use crate::error::{ManagerError, Result};
use contest_netfilter::Domain;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// File name inside the config directory
pub const WHITELIST_FILE_NAME: &str = "whitelist.txt";

const HEADER: &str = "# Contest Environment Manager - Whitelisted Sites\n\
                      # Add one domain per line\n\
                      # Comments start with #\n";

/// Result of a set mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added,
    Removed,
    /// `add` of a present domain
    AlreadyPresent,
    /// `remove` of an absent domain
    NotPresent,
}

pub struct WhitelistStore {
    path: PathBuf,
}

impl WhitelistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(config_dir: &Path) -> Self {
        Self::new(config_dir.join(WHITELIST_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seed the file from the bundled default list when it does not exist
    pub fn ensure_exists(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.error(source))?;
        }
        self.save(builtin::default_whitelist())?;
        tracing::info!("Created default whitelist at {:?}", self.path);
        Ok(true)
    }

    /// Current domains. A missing file is an empty whitelist.
    pub fn load(&self) -> Result<BTreeSet<Domain>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(builtin::parse_domain_lines(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(source) => Err(self.error(source)),
        }
    }

    /// Overwrite the file with the header and the sorted domains
    pub fn save(&self, domains: &BTreeSet<Domain>) -> Result<()> {
        let mut contents = String::from(HEADER);
        contents.push('\n');
        for domain in domains {
            contents.push_str(domain.as_str());
            contents.push('\n');
        }
        fs::write(&self.path, contents).map_err(|source| self.error(source))
    }

    pub fn add(&self, input: &str) -> Result<(Domain, Change)> {
        let domain = Domain::parse(input)?;
        let mut domains = self.load()?;
        if !domains.insert(domain.clone()) {
            return Ok((domain, Change::AlreadyPresent));
        }
        self.save(&domains)?;
        Ok((domain, Change::Added))
    }

    pub fn remove(&self, input: &str) -> Result<(Domain, Change)> {
        let domain = Domain::parse(input)?;
        let mut domains = self.load()?;
        if !domains.remove(&domain) {
            return Ok((domain, Change::NotPresent));
        }
        self.save(&domains)?;
        Ok((domain, Change::Removed))
    }

    /// Domains in ascending order
    pub fn list(&self) -> Result<Vec<Domain>> {
        Ok(self.load()?.into_iter().collect())
    }

    fn error(&self, source: std::io::Error) -> ManagerError {
        ManagerError::Whitelist {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, WhitelistStore) {
        let dir = TempDir::new().unwrap();
        let store = WhitelistStore::in_dir(dir.path());
        (dir, store)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_layout() {
        let (_dir, store) = store();
        let domains: BTreeSet<Domain> = ["zeta.example", "alpha.example"]
            .iter()
            .map(|d| Domain::parse(d).unwrap())
            .collect();
        store.save(&domains).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            text,
            "# Contest Environment Manager - Whitelisted Sites\n\
             # Add one domain per line\n\
             # Comments start with #\n\
             \n\
             alpha.example\n\
             zeta.example\n"
        );
    }

    #[test]
    fn test_load_skips_comments_and_lowercases() {
        let (_dir, store) = store();
        fs::write(store.path(), "# comment\n\nCodeForces.com\n   \n# atcoder.jp\ncses.fi\n").unwrap();
        let names: Vec<String> = store.list().unwrap().iter().map(|d| d.to_string()).collect();
        assert_eq!(names, vec!["codeforces.com", "cses.fi"]);
    }

    #[test]
    fn test_add_is_set_semantics() {
        let (_dir, store) = store();
        let (domain, change) = store.add("https://Codeforces.com/contests").unwrap();
        assert_eq!(domain.as_str(), "codeforces.com");
        assert_eq!(change, Change::Added);

        let before = fs::read_to_string(store.path()).unwrap();
        let (_, change) = store.add("codeforces.com").unwrap();
        assert_eq!(change, Change::AlreadyPresent);
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_add_rejects_invalid() {
        let (_dir, store) = store();
        let err = store.add("localhost").unwrap_err();
        assert!(matches!(err, ManagerError::Validation(_)));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_remove() {
        let (_dir, store) = store();
        store.add("atcoder.jp").unwrap();
        store.add("cses.fi").unwrap();

        assert_eq!(store.remove("ATCODER.JP").unwrap().1, Change::Removed);
        assert_eq!(store.remove("atcoder.jp").unwrap().1, Change::NotPresent);
        assert_eq!(store.list().unwrap(), vec![Domain::parse("cses.fi").unwrap()]);
    }

    #[test]
    fn test_ensure_exists_seeds_defaults_once() {
        let dir = TempDir::new().unwrap();
        let store = WhitelistStore::in_dir(&dir.path().join("nested"));

        assert!(store.ensure_exists().unwrap());
        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with(HEADER));
        assert_eq!(&store.load().unwrap(), builtin::default_whitelist());

        store.remove("codeforces.com").unwrap();
        assert!(!store.ensure_exists().unwrap());
        assert!(!store.load().unwrap().contains(&Domain::parse("codeforces.com").unwrap()));
    }
}
