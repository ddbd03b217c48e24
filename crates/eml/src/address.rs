//! Mailbox addressing
//!
//! A validated `local@domain` mailbox as it appears in `From:`/`Sender:`
//! headers or in relay configuration.
//!
//! # Examples
//!
//! ```
//! use eml::Address;
//!
//! let addr: Address = "alerts@example.com".parse().unwrap();
//! assert_eq!(addr.local_part(), "alerts");
//! assert_eq!(addr.domain(), "example.com");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for address parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address format: expected 'local@domain', got '{0}'")]
    InvalidFormat(String),

    #[error("address local part cannot be empty")]
    EmptyLocalPart,

    #[error("address domain cannot be empty")]
    EmptyDomain,

    #[error("address local part contains invalid characters: '{0}'")]
    InvalidLocalPartCharacters(String),

    #[error("address domain is not a valid host name: '{0}'")]
    InvalidDomain(String),
}

/// A validated mailbox address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    local_part: String,
    domain: String,
}

impl Address {
    /// Create a new address from parts
    ///
    /// # Errors
    /// Returns an error if either part is empty or contains characters that
    /// cannot appear in an unquoted mailbox.
    pub fn new(
        local_part: impl Into<String>,
        domain: impl Into<String>,
    ) -> Result<Self, AddressError> {
        let local_part = local_part.into();
        let domain = domain.into();

        Self::validate_local_part(&local_part)?;
        Self::validate_domain(&domain)?;

        Ok(Self { local_part, domain })
    }

    /// Get the part before the `@`
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    /// Get the part after the `@`
    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn validate_local_part(local_part: &str) -> Result<(), AddressError> {
        if local_part.is_empty() {
            return Err(AddressError::EmptyLocalPart);
        }

        // RFC 5322 atext plus dots, no leading/trailing/double dot
        let valid_chars = local_part
            .chars()
            .all(|c| c.is_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c));
        if !valid_chars
            || local_part.starts_with('.')
            || local_part.ends_with('.')
            || local_part.contains("..")
        {
            return Err(AddressError::InvalidLocalPartCharacters(
                local_part.to_string(),
            ));
        }

        Ok(())
    }

    fn validate_domain(domain: &str) -> Result<(), AddressError> {
        if domain.is_empty() {
            return Err(AddressError::EmptyDomain);
        }

        let valid = domain.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        });
        if !valid {
            return Err(AddressError::InvalidDomain(domain.to_string()));
        }

        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('@').collect();

        if parts.len() != 2 {
            return Err(AddressError::InvalidFormat(s.to_string()));
        }

        Self::new(parts[0], parts[1])
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}
