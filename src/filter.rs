//! Record filter combining allow domains, deny domains and IP ranges.

use std::net::IpAddr;

use crate::record::Record;
use crate::rule::{CidrRule, DomainRule, Rule};
use crate::ruleset::RuleSet;

/// Decides whether a record survives filtering.
///
/// Checks run in this order and the first decisive one wins:
///
/// 1. If ranges are configured and the record carries an IP inside one of
///    them, the record is accepted, whatever the domain lists say. If ranges
///    are configured, no allow domains are, and the IP misses, it is rejected.
/// 2. If allow domains are configured, the domain must match one.
/// 3. If deny domains are configured, the domain must not match any.
/// 4. Otherwise the record is accepted.
///
/// An empty rule counts as not configured. The filter holds no mutable state,
/// so the same record always gets the same answer.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    allow: Option<DomainRule>,
    deny: Option<DomainRule>,
    ranges: Option<CidrRule>,
}

impl Filter {
    /// Create a filter that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from an allow file and a deny file.
    ///
    /// Ranges in the allow file become the range rule. The decision has no
    /// notion of denied ranges, so ranges in the deny file are dropped.
    pub fn from_rulesets(allow: Option<RuleSet>, deny: Option<RuleSet>) -> Self {
        let mut filter = Self::new();

        if let Some(allow) = allow {
            let (domains, ranges) = allow.into_parts();
            filter = filter.with_allow(domains).with_ranges(ranges);
        }

        if let Some(deny) = deny {
            let (domains, ranges) = deny.into_parts();
            if !ranges.is_empty() {
                log::warn!(
                    "Ignoring {} CIDR lines in the deny list",
                    ranges.pattern_count()
                );
            }
            filter = filter.with_deny(domains);
        }

        filter
    }

    pub fn with_allow(mut self, allow: DomainRule) -> Self {
        self.allow = Some(allow).filter(|r| !r.is_empty());
        self
    }

    pub fn with_deny(mut self, deny: DomainRule) -> Self {
        self.deny = Some(deny).filter(|r| !r.is_empty());
        self
    }

    pub fn with_ranges(mut self, ranges: CidrRule) -> Self {
        self.ranges = Some(ranges).filter(|r| !r.is_empty());
        self
    }

    /// Whether any rule is configured.
    pub fn is_pass_through(&self) -> bool {
        self.allow.is_none() && self.deny.is_none() && self.ranges.is_none()
    }

    /// Decide a record.
    pub fn accepts(&self, record: &Record) -> bool {
        self.accepts_input(record.ip(), record.domain())
    }

    /// Decide a raw domain and optional IP.
    pub fn accepts_input(&self, ip: Option<IpAddr>, domain: &str) -> bool {
        if let Some(ranges) = &self.ranges {
            if let Some(ip) = ip {
                if ranges.contains(ip) {
                    return true;
                }
                if self.allow.is_none() {
                    return false;
                }
            }
        }

        if let Some(allow) = &self.allow {
            if !allow.matches(domain) {
                return false;
            }
        }

        if let Some(deny) = &self.deny {
            if deny.matches(domain) {
                return false;
            }
        }

        true
    }

    /// Decide a bare domain.
    pub fn accepts_domain(&self, domain: &str) -> bool {
        self.accepts_input(None, domain)
    }
}
