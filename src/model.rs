//! Script definitions, scope paths and the other shared value types.
//!
//! These types are the shared vocabulary used across the crate:
//! - The store persists [`ScriptDefinition`] values keyed by [`ScriptId`].
//! - The resolver walks [`ScopePath`] prefixes from the root to the firing scope.
//! - Callers hand the engine a [`Payload`] that becomes script globals.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto_shim;
use crate::error::{Error, Result};
use crate::metadata::ScriptMetadata;

/// Named values bound as globals for one invocation.
pub type Payload = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Scope paths
// ============================================================================

/// Dotted position in the configuration hierarchy, e.g. `acme.summer-conf`.
///
/// The empty path is the implicit root (system scope).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopePath(String);

impl ScopePath {
    pub const fn root() -> Self {
        Self(String::new())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let valid = trimmed.split('.').all(|segment| {
            !segment.is_empty()
                && !segment
                    .chars()
                    .any(|c| c.is_whitespace() || c == '/' || c.is_control())
        });
        if !valid {
            return Err(Error::InvalidScopePath(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|segment| !segment.is_empty())
    }

    /// Number of segments; 0 for the root.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The root followed by every dot-prefix, least specific first. The last
    /// element is the path itself.
    pub fn prefixes(&self) -> Vec<Self> {
        let mut out = vec![Self::root()];
        let mut current = String::new();
        for segment in self.segments() {
            if !current.is_empty() {
                current.push('.');
            }
            current.push_str(segment);
            out.push(Self(current.clone()));
        }
        out
    }

    /// Whether `self` is `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.is_root()
            || other.0 == self.0
            || (other.0.starts_with(&self.0) && other.0.as_bytes().get(self.0.len()) == Some(&b'.'))
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ScopePath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ScopePath> for String {
    fn from(value: ScopePath) -> Self {
        value.0
    }
}

// ============================================================================
// Script definitions
// ============================================================================

/// Identity of a script definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId {
    pub scope: ScopePath,
    pub name: String,
}

impl ScriptId {
    pub fn new(scope: ScopePath, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// A script as submitted by an author, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDraft {
    pub scope: ScopePath,
    pub name: String,
    pub source: String,
    pub enabled: bool,
}

impl ScriptDraft {
    pub fn new(scope: ScopePath, name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            source: source.into(),
            enabled: true,
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A validated, persisted script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDefinition {
    pub scope: ScopePath,
    pub name: String,
    pub source: String,
    pub content_hash: String,
    pub enabled: bool,
    pub async_capable: bool,
    pub subscribed_events: BTreeSet<String>,
    pub metadata: ScriptMetadata,
}

impl ScriptDefinition {
    pub fn id(&self) -> ScriptId {
        ScriptId::new(self.scope.clone(), self.name.clone())
    }

    pub fn subscribes_to(&self, event: &str) -> bool {
        self.subscribed_events.contains(event)
    }
}

/// Lowercase hex SHA-256 of the source's UTF-8 bytes.
pub fn content_hash(source: &str) -> String {
    crypto_shim::sha256_hex(source)
}
