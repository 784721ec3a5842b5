//! Locator vocabulary.
//!
//! A [`Locator`] is the caller-facing address of a node in the element tree.
//! Its resolution strategy is derived from the string itself and never stored:
//! anything shaped like a structural path query (`//...` or `(...`) is a
//! [`LocatorStrategy::PathExpression`], everything else is looked up as a flat
//! [`LocatorStrategy::Identifier`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a locator string is resolved against the element tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    /// Structural path query into the tree.
    PathExpression,
    /// Flat unique-identifier lookup.
    Identifier,
}

impl LocatorStrategy {
    /// Classify a raw locator string. Pure: depends only on the prefix.
    pub fn of(raw: &str) -> Self {
        if raw.starts_with("//") || raw.starts_with('(') {
            LocatorStrategy::PathExpression
        } else {
            LocatorStrategy::Identifier
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LocatorStrategy::PathExpression => "path_expression",
            LocatorStrategy::Identifier => "identifier",
        }
    }
}

/// A locator string plus an optional human-readable name for log messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    raw: String,
    name: Option<String>,
}

impl Locator {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            name: None,
        }
    }

    /// A locator carrying a friendly name used in logs instead of the raw
    /// string.
    pub fn named(raw: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            name: Some(name.into()),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn strategy(&self) -> LocatorStrategy {
        LocatorStrategy::of(&self.raw)
    }

    /// Name used when reporting on this element; falls back to the raw
    /// locator when no friendly name was supplied.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.raw)
    }
}

impl From<&str> for Locator {
    fn from(raw: &str) -> Self {
        Locator::new(raw)
    }
}

impl From<String> for Locator {
    fn from(raw: String) -> Self {
        Locator::new(raw)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_prefixes_classify_as_path_expressions() {
        assert_eq!(LocatorStrategy::of("//div[@id='x']"), LocatorStrategy::PathExpression);
        assert_eq!(LocatorStrategy::of("(//li)[3]"), LocatorStrategy::PathExpression);
    }

    #[test]
    fn everything_else_classifies_as_identifier() {
        assert_eq!(LocatorStrategy::of("user-name"), LocatorStrategy::Identifier);
        assert_eq!(LocatorStrategy::of("/single-slash"), LocatorStrategy::Identifier);
        assert_eq!(LocatorStrategy::of(""), LocatorStrategy::Identifier);
        assert_eq!(LocatorStrategy::of("div(1)"), LocatorStrategy::Identifier);
    }

    #[test]
    fn classification_is_idempotent() {
        for raw in ["//a", "(//a)[1]", "plain-id", ""] {
            assert_eq!(LocatorStrategy::of(raw), LocatorStrategy::of(raw));
        }
    }

    #[test]
    fn display_name_falls_back_to_raw() {
        let anonymous = Locator::new("//button[@type='submit']");
        assert_eq!(anonymous.display_name(), "//button[@type='submit']");

        let named = Locator::named("//button[@type='submit']", "submit button");
        assert_eq!(named.display_name(), "submit button");
        assert_eq!(named.raw(), "//button[@type='submit']");
    }
}
