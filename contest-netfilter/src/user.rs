//! Contest user identity

use crate::error::{NetfilterError, Result, ValidationError};
use crate::gateway::{Invocation, SystemGateway};
use std::fmt;

/// Longest username accepted; keeps `CONTEST_<USER>_OUT` within the
/// 28-character iptables chain name limit
pub const MAX_USERNAME_LEN: usize = 16;

/// A validated login name, safe to place in generated files and arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    pub fn parse(name: &str) -> std::result::Result<Self, ValidationError> {
        let invalid = |reason| ValidationError::InvalidUsername {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("empty"));
        }
        if name.len() > MAX_USERNAME_LEN {
            return Err(invalid("longer than 16 characters"));
        }
        if name.starts_with('-') || name.starts_with('.') {
            return Err(invalid("must not start with '-' or '.'"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(invalid("only ASCII letters, digits, '_', '-' and '.' are allowed"));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-cased form used in chain names
    pub fn chain_token(&self) -> String {
        self.0
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }

    /// Look up the numeric UID with `id -u`
    pub fn uid(&self, gateway: &dyn SystemGateway) -> Result<u32> {
        let output = gateway.run(&Invocation::new("id", ["-u", self.as_str()]))?;
        if !output.is_success() {
            return Err(NetfilterError::UnknownUser {
                user: self.0.clone(),
            });
        }
        output
            .stdout
            .trim()
            .parse()
            .map_err(|_| NetfilterError::UnknownUser {
                user: self.0.clone(),
            })
    }

    /// Whether the account exists on this host
    pub fn exists(&self, gateway: &dyn SystemGateway) -> bool {
        self.uid(gateway).is_ok()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
