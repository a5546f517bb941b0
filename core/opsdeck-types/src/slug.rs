//! Toolkit slug: the sole identity of a toolkit.

use crate::ValidationError;
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Maximum slug length in bytes.
pub const MAX_SLUG_LEN: usize = 64;

/// A slug that matched `^[a-z0-9_-]{1,64}$` when it was constructed.
///
/// Because `.` and `/` are outside the alphabet, a slug is always safe to use
/// as a single path segment and as a route segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if Self::is_valid(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ValidationError::InvalidSlug(raw.to_string()))
        }
    }

    pub fn is_valid(raw: &str) -> bool {
        !raw.is_empty()
            && raw.len() <= MAX_SLUG_LEN
            && raw
                .bytes()
                .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Slug {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for Slug {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Slug::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_alphabet() {
        for ok in ["demo", "a", "metrics_v2", "log-tail", "0", "x".repeat(64).as_str()] {
            assert!(Slug::parse(ok).is_ok(), "{ok} should be valid");
        }
    }

    #[test]
    fn rejects_outside_alphabet() {
        for bad in [
            "",
            "Demo!",
            "Demo",
            "../etc",
            "a.b",
            "a/b",
            "with space",
            "ünicode",
            "x".repeat(65).as_str(),
        ] {
            assert_eq!(
                Slug::parse(bad),
                Err(ValidationError::InvalidSlug(bad.to_string())),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn deserialize_validates() {
        let ok: Slug = serde_json::from_str("\"demo\"").unwrap();
        assert_eq!(ok.as_str(), "demo");
        assert!(serde_json::from_str::<Slug>("\"Demo!\"").is_err());
    }
}
