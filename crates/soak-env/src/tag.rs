//! Version tags identify the product version an environment is built for.

use serde::{Deserialize, Serialize};

use crate::error::{EnvError, EnvResult};

/// A validated version tag such as `current`, `previous-major` or `legacy`.
///
/// Tags are lowercase ASCII letters, digits, `.`, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionTag(String);

impl VersionTag {
    /// Parse and validate a tag.
    pub fn new(tag: impl Into<String>) -> EnvResult<Self> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(EnvError::InvalidTag {
                tag,
                reason: "tag must not be empty".into(),
            });
        }
        if let Some(bad) = tag
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')))
        {
            return Err(EnvError::InvalidTag {
                reason: format!("unexpected character {bad:?}"),
                tag,
            });
        }
        Ok(Self(tag))
    }

    /// A tag from a literal known to be valid.
    pub fn from_static(tag: &'static str) -> Self {
        debug_assert!(Self::new(tag).is_ok(), "invalid tag literal {tag:?}");
        Self(tag.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for VersionTag {
    type Err = EnvError;

    fn from_str(s: &str) -> EnvResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for VersionTag {
    type Error = EnvError;

    fn try_from(value: String) -> EnvResult<Self> {
        Self::new(value)
    }
}

impl From<VersionTag> for String {
    fn from(tag: VersionTag) -> Self {
        tag.0
    }
}
