//! Domain primitive types used across the vmjail workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_JAIL_ID_LEN;
use crate::error::{JailError, Result};

/// Unique identifier of a jailed VM.
///
/// Only ASCII alphanumerics and hyphens are accepted, at most
/// [`MAX_JAIL_ID_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JailId(String);

impl JailId {
    /// Validates and wraps a jail identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty, too long, or contains
    /// characters other than ASCII alphanumerics and hyphens.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_JAIL_ID_LEN {
            return Err(JailError::Config {
                message: format!("jail id must be 1 to {MAX_JAIL_ID_LEN} characters, got {}", id.len()),
            });
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(JailError::Config {
                message: format!("jail id {id:?} may only contain alphanumerics and hyphens"),
            });
        }
        Ok(Self(id))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JailId {
    type Error = JailError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<JailId> for String {
    fn from(id: JailId) -> Self {
        id.0
    }
}

impl fmt::Display for JailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Restrictiveness of the syscall filter the jailed binary installs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeccompLevel {
    /// No filtering.
    #[default]
    Disabled,
    /// Prohibits syscalls outside the allow-list.
    Basic,
    /// Adds checks on the parameters of allowed syscalls.
    Advanced,
}

impl SeccompLevel {
    /// Numeric level passed on the jailer command line.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Basic => 1,
            Self::Advanced => 2,
        }
    }
}

impl fmt::Display for SeccompLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// How boot artifacts are exposed inside the jail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Hard link artifacts into the jail root before start.
    #[default]
    Link,
    /// Bind mount artifacts into the jailed process's mount namespace after start.
    BindMount,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link => write!(f, "link"),
            Self::BindMount => write!(f, "bind_mount"),
        }
    }
}
