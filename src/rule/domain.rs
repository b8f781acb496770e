//! Domain suffix rule implementation.

use ahash::AHashSet;
use std::net::IpAddr;

use super::{DynamicRule, Rule};
use crate::error::DomainRuleError;

/// DomainRule matches domain names by suffix.
///
/// Every pattern is stored with a leading dot, so `example.com` is kept as
/// `.example.com` and matches `www.example.com` but never
/// `notexample.com`. Matching is byte-for-byte and case sensitive.
///
/// # Examples
/// ```
/// use scanfilter::rule::{DomainRule, DynamicRule};
///
/// let mut rule = DomainRule::new();
/// rule.add_pattern("example.com").unwrap();
/// assert!(rule.matches("www.example.com"));
/// assert!(!rule.matches("notexample.com"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DomainRule {
    /// Suffixes in insertion order
    suffixes: Vec<String>,
    /// Index over `suffixes`
    index: AHashSet<String>,
}

impl DomainRule {
    /// Create an empty DomainRule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a rule from a list of patterns, skipping empty ones.
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rule = Self::new();
        for pattern in patterns {
            let _ = rule.add_pattern(pattern.as_ref());
        }
        rule
    }

    /// Stored suffixes, each with its leading dot.
    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Check if `domain` ends with any stored suffix.
    ///
    /// A suffix always starts with a dot, so the only candidates are the tails
    /// of `domain` that start at one of its dots. Looking those up in the index
    /// gives the same answer as comparing against every suffix in turn.
    pub fn matches(&self, domain: &str) -> bool {
        domain
            .match_indices('.')
            .any(|(pos, _)| self.index.contains(&domain[pos..]))
    }
}

impl Rule for DomainRule {
    fn match_input(&self, _ip: Option<IpAddr>, domain: &str) -> bool {
        self.matches(domain)
    }

    fn pattern_count(&self) -> usize {
        self.suffixes.len()
    }
}

impl DynamicRule for DomainRule {
    type Error = DomainRuleError;

    fn add_pattern(&mut self, pattern: &str) -> Result<(), Self::Error> {
        let pattern = pattern.trim();

        if pattern.is_empty() || pattern == "." {
            return Err(DomainRuleError::EmptyPattern);
        }

        let suffix = if pattern.starts_with('.') {
            pattern.to_string()
        } else {
            format!(".{}", pattern)
        };

        if self.index.insert(suffix.clone()) {
            self.suffixes.push(suffix);
        }

        Ok(())
    }
}
