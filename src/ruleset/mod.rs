//! Rule files.
//!
//! A rule file lists one pattern per line. Each line is classified on its
//! own: if it parses as a CIDR it becomes a range, otherwise it becomes a
//! domain suffix. Blank lines and `#` comments are ignored.
//!
//! ```text
//! # scope
//! example.com
//! 10.0.0.0/24
//! 2001:db8::/32
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::rule::{CidrRule, DomainRule, DynamicRule, Rule};
use crate::Result;

/// Domains and ranges loaded from one rule file.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    domains: DomainRule,
    ranges: CidrRule,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse rules from a reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut ruleset = Self::new();
        for line in BufReader::new(reader).lines() {
            ruleset.add_line(&line?);
        }
        Ok(ruleset)
    }

    /// Parse rules from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ruleset = Self::from_reader(File::open(path)?)?;
        log::info!(
            "Loaded {} domains and {} ranges from {:?}",
            ruleset.domains.pattern_count(),
            ruleset.ranges.pattern_count(),
            path
        );
        Ok(ruleset)
    }

    /// Classify and add a single line.
    pub fn add_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }

        match CidrRule::parse(line) {
            Some(net) => self.ranges.add_net(net),
            None => {
                let _ = self.domains.add_pattern(line);
            }
        }
    }

    /// Domain suffix rules.
    pub fn domains(&self) -> &DomainRule {
        &self.domains
    }

    /// CIDR range rules.
    pub fn ranges(&self) -> &CidrRule {
        &self.ranges
    }

    /// Split into domain and range rules.
    pub fn into_parts(self) -> (DomainRule, CidrRule) {
        (self.domains, self.ranges)
    }

    /// Total number of rules.
    pub fn len(&self) -> usize {
        self.domains.pattern_count() + self.ranges.pattern_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domains() {
        let ruleset = RuleSet::from_reader("robinverton.de\ngoogle.de".as_bytes()).unwrap();

        assert_eq!(ruleset.domains().pattern_count(), 2);
        assert!(ruleset.ranges().is_empty());
        assert_eq!(ruleset.domains().suffixes(), &[".robinverton.de", ".google.de"]);
    }

    #[test]
    fn test_parse_mixed() {
        let data = "robinverton.de\ngoogle.de\n192.168.1.1/24\n10.0.0.1/32";
        let ruleset = RuleSet::from_reader(data.as_bytes()).unwrap();

        assert_eq!(ruleset.domains().pattern_count(), 2);
        assert_eq!(ruleset.ranges().pattern_count(), 2);
        assert!(ruleset.ranges().contains("192.168.1.2".parse().unwrap()));
        assert_eq!(ruleset.len(), 4);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let data = "# scope\n\n  example.com  \r\n\t\n10.0.0.0/24\n";
        let ruleset = RuleSet::from_reader(data.as_bytes()).unwrap();

        assert_eq!(ruleset.domains().suffixes(), &[".example.com"]);
        assert_eq!(ruleset.ranges().v4_count(), 1);
    }

    #[test]
    fn test_bad_cidr_becomes_domain() {
        let ruleset = RuleSet::from_reader("10.0.0.0/40".as_bytes()).unwrap();
        assert!(ruleset.ranges().is_empty());
        assert_eq!(ruleset.domains().suffixes(), &[".10.0.0.0/40"]);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.txt");
        std::fs::write(&path, "example.com\n10.0.0.0/24\n").unwrap();

        let ruleset = RuleSet::from_file(&path).unwrap();
        assert_eq!(ruleset.len(), 2);

        assert!(RuleSet::from_file(dir.path().join("missing.txt")).is_err());
    }
}
