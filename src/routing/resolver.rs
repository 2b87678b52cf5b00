//! Ordered, first-match-wins pattern table.
//!
//! # Responsibilities
//! - Compile user path patterns into anchored regular expressions
//! - Preserve registration order (earlier patterns take precedence)
//! - Return the winning value together with its capture groups
//!
//! # Design Decisions
//! - Patterns are wrapped as `^(?:pattern)$` so alternations stay anchored
//! - Re-registering an identical literal pattern replaces the value in place
//! - Matching is case-sensitive

use regex::Regex;
use thiserror::Error;

/// Error raised while registering a pattern.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Capture groups produced by the winning pattern.
///
/// Index 0 is the whole match, later indices are the parenthesized groups.
/// Groups that did not participate in the match are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures(Vec<Option<String>>);

impl Captures {
    pub fn new(groups: Vec<Option<String>>) -> Self {
        Self(groups)
    }

    /// Get a capture group by index.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|g| g.as_deref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> {
        self.0.iter().map(|g| g.as_deref())
    }

    fn from_regex(captures: regex::Captures<'_>) -> Self {
        Self(
            captures
                .iter()
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect(),
        )
    }
}

/// Result of a successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    pub captures: Captures,
    pub value: &'a T,
    /// The pattern as registered.
    pub pattern: &'a str,
}

#[derive(Debug)]
struct Entry<T> {
    pattern: String,
    regex: Regex,
    value: T,
}

/// Ordered collection of `(pattern, value)` pairs.
#[derive(Debug)]
pub struct PatternResolver<T> {
    entries: Vec<Entry<T>>,
}

impl<T> PatternResolver<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register `value` under `pattern`.
    pub fn add(&mut self, pattern: &str, value: T) -> Result<(), RouteError> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.pattern == pattern) {
            entry.value = value;
            return Ok(());
        }

        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            RouteError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        self.entries.push(Entry {
            pattern: pattern.to_string(),
            regex,
            value,
        });
        Ok(())
    }

    /// Find the first registered pattern matching `value`.
    pub fn find(&self, value: &str) -> Option<RouteMatch<'_, T>> {
        self.entries.iter().find_map(|entry| {
            entry.regex.captures(value).map(|captures| RouteMatch {
                captures: Captures::from_regex(captures),
                value: &entry.value,
                pattern: &entry.pattern,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered patterns in precedence order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.pattern.as_str())
    }
}

impl<T> Default for PatternResolver<T> {
    fn default() -> Self {
        Self::new()
    }
}
