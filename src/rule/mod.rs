//! Rule types and trait definitions.

mod cidr;
mod domain;

pub use cidr::CidrRule;
pub use domain::DomainRule;

use std::net::IpAddr;

/// Rule trait defines the interface for all rule types.
///
/// Rules are immutable once built and can be shared between worker threads
/// without locking.
pub trait Rule: Send + Sync {
    /// Match an IP address or domain against this rule.
    ///
    /// # Arguments
    /// * `ip` - Optional IP address carried by the record
    /// * `domain` - Domain name carried by the record (empty if none)
    fn match_input(&self, ip: Option<IpAddr>, domain: &str) -> bool;

    /// Number of patterns in this rule.
    fn pattern_count(&self) -> usize;

    /// Whether the rule has no patterns.
    fn is_empty(&self) -> bool {
        self.pattern_count() == 0
    }
}

/// Trait for rules built up pattern by pattern.
pub trait DynamicRule: Rule {
    /// Error type for pattern addition
    type Error;

    /// Add a pattern to this rule.
    ///
    /// The pattern format depends on the rule type:
    /// - Domain: `example.com`, stored as the suffix `.example.com`
    /// - CIDR: `192.168.0.0/16` or `2001:db8::/32`
    fn add_pattern(&mut self, pattern: &str) -> Result<(), Self::Error>;
}
