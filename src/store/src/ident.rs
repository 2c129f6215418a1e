//! Safe identifier boundary for untrusted lookup keys
//!
//! Every caller-supplied identifier that participates in a tree lookup is
//! wrapped in a [`SafeIdent`] first. The navigation layer only accepts this
//! type, so a string that could break out of a lookup predicate (quotes,
//! bracket or path delimiters) is rejected once, here, instead of being
//! re-checked at every call site.

use crate::error::{Fault, Reason};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Characters that terminate or escape a lookup predicate.
const FORBIDDEN: &[char] = &['\'', '"', '[', ']', '/', '\\'];

/// An identifier proven safe to embed in tree lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SafeIdent(String);

impl SafeIdent {
    /// Validate an untrusted identifier.
    ///
    /// Fails with `WRONG-FORMAT` when the value is empty, contains a
    /// quote/delimiter character, or contains control characters.
    pub fn new(raw: &str) -> Result<Self, Fault> {
        if raw.is_empty() {
            return Err(Fault::new(
                Reason::WrongFormat,
                "required identifier is empty",
            ));
        }
        if raw.contains(FORBIDDEN) || raw.chars().any(char::is_control) {
            return Err(Fault::new(
                Reason::WrongFormat,
                format!("identifier {raw:?} contains characters unsafe for tree lookups"),
            )
            .with("bad_value", raw));
        }
        Ok(Self(raw.to_string()))
    }

    /// Validate an optional identifier.
    ///
    /// `None` passes through unchanged: it signals "no filter", not an
    /// identifier.
    pub fn opt(raw: Option<&str>) -> Result<Option<Self>, Fault> {
        raw.map(Self::new).transpose()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SafeIdent {
    type Err = Fault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for SafeIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeIdent {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for SafeIdent {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_identifier_passes_unchanged() {
        let id = SafeIdent::new("dept-42").unwrap();
        assert_eq!(id.as_str(), "dept-42");
    }

    #[test]
    fn injection_attempt_is_rejected() {
        let err = SafeIdent::new("' or 1=1 or '").unwrap_err();
        assert_eq!(err.reason, Reason::WrongFormat);
        assert_eq!(err.context["bad_value"], serde_json::json!("' or 1=1 or '"));
    }

    #[test]
    fn empty_identifier_is_rejected() {
        let err = SafeIdent::new("").unwrap_err();
        assert_eq!(err.reason, Reason::WrongFormat);
    }

    #[test]
    fn delimiters_and_controls_are_rejected() {
        for bad in ["a[b]", "a/b", "a\\b", "a\"b", "a\nb"] {
            assert!(SafeIdent::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn none_passes_through() {
        assert!(SafeIdent::opt(None).unwrap().is_none());
        assert_eq!(
            SafeIdent::opt(Some("root")).unwrap().unwrap().as_str(),
            "root"
        );
    }
}
