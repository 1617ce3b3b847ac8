//! Domain normalization

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized host name: lowercase, no scheme, path or port, contains a dot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Normalize arbitrary user input into a domain
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = normalize(input);
        if normalized.is_empty() {
            return Err(ValidationError::InvalidDomain {
                input: input.to_string(),
            });
        }
        Ok(Self(normalized))
    }

    /// Wrap a host that is already known to be in normalized form
    pub(crate) fn from_normalized(host: String) -> Self {
        Self(host)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The same host with `prefix.` in front (e.g. `www`, `cdn`)
    pub fn with_subdomain(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.0)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip scheme, path and port, then lowercase.
/// Returns an empty string when the result has no dot.
pub fn normalize(input: &str) -> String {
    let mut rest = input.trim();

    for scheme in ["http://", "https://"] {
        if rest
            .get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
        {
            rest = &rest[scheme.len()..];
            break;
        }
    }

    let rest = rest.split('/').next().unwrap_or_default();
    let rest = rest.split(':').next().unwrap_or_default();
    let host = rest.to_lowercase().trim().to_string();

    if host.is_empty() || !host.contains('.') {
        return String::new();
    }

    host
}
