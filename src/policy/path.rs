//! Path-matching trigger.

use crate::{Error, Result};
use regex::Regex;

/// Fires when the request path matches a pattern.
#[derive(Debug, Clone)]
pub struct PathTrigger {
    pattern: Regex,
}

impl PathTrigger {
    /// Compiles `pattern` into a path trigger.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the pattern is not a valid regex.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::InvalidInput(format!("invalid path pattern '{pattern}': {e}")))?;
        Ok(Self { pattern })
    }

    /// Wraps an already compiled regex.
    #[must_use]
    pub const fn from_regex(pattern: Regex) -> Self {
        Self { pattern }
    }

    /// Returns `true` iff `path` matches.
    #[must_use]
    pub fn decide(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    /// Source text of the pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_and_miss() {
        let trigger = PathTrigger::new("/expensive/").expect("valid pattern");
        assert!(trigger.decide("/expensive/foo"));
        assert!(!trigger.decide("/cheap/bar"));
        assert!(!trigger.decide(""));
    }

    #[test]
    fn test_anchored_pattern() {
        let trigger = PathTrigger::new(r"^/reports/\d+$").expect("valid pattern");
        assert!(trigger.decide("/reports/42"));
        assert!(!trigger.decide("/api/reports/42"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = PathTrigger::new("(").expect_err("unbalanced group");
        assert!(err.to_string().contains("invalid path pattern"));
    }
}
