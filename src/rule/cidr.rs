//! IP CIDR range rule implementation.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::{DynamicRule, Rule};
use crate::error::CidrRuleError;

/// CidrRule matches IP addresses against CIDR network ranges.
///
/// Supports both IPv4 and IPv6 CIDR notation. Host bits in a pattern are
/// cleared, so `192.168.1.1/24` covers `192.168.1.0` to `192.168.1.255`.
///
/// # Examples
/// ```
/// use scanfilter::rule::{CidrRule, DynamicRule};
///
/// let mut rule = CidrRule::new();
/// rule.add_pattern("10.0.0.0/8").unwrap();
/// rule.add_pattern("fc00::/7").unwrap();
/// assert!(rule.contains("10.1.2.3".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CidrRule {
    /// IPv4 CIDR ranges
    v4_cidrs: Vec<Ipv4Net>,
    /// IPv6 CIDR ranges
    v6_cidrs: Vec<Ipv6Net>,
}

impl CidrRule {
    /// Create an empty CidrRule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a CIDR pattern without adding it.
    pub fn parse(pattern: &str) -> Option<IpNet> {
        pattern.trim().parse::<IpNet>().ok().map(|net| net.trunc())
    }

    /// Add an already parsed network.
    pub fn add_net(&mut self, net: IpNet) {
        match net.trunc() {
            IpNet::V4(v4) => self.v4_cidrs.push(v4),
            IpNet::V6(v6) => self.v6_cidrs.push(v6),
        }
    }

    /// Get the number of IPv4 CIDR patterns.
    pub fn v4_count(&self) -> usize {
        self.v4_cidrs.len()
    }

    /// Get the number of IPv6 CIDR patterns.
    pub fn v6_count(&self) -> usize {
        self.v6_cidrs.len()
    }

    /// Check if an address lies inside any stored range.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.contains_v4(v4),
            IpAddr::V6(v6) => self.contains_v6(v6),
        }
    }

    fn contains_v4(&self, ip: Ipv4Addr) -> bool {
        self.v4_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }

    fn contains_v6(&self, ip: Ipv6Addr) -> bool {
        self.v6_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }
}

impl Rule for CidrRule {
    fn match_input(&self, ip: Option<IpAddr>, _domain: &str) -> bool {
        ip.map_or(false, |ip| self.contains(ip))
    }

    fn pattern_count(&self) -> usize {
        self.v4_count() + self.v6_count()
    }
}

impl DynamicRule for CidrRule {
    type Error = CidrRuleError;

    fn add_pattern(&mut self, pattern: &str) -> Result<(), Self::Error> {
        match Self::parse(pattern) {
            Some(net) => {
                self.add_net(net);
                Ok(())
            }
            None => Err(CidrRuleError::InvalidCidr(pattern.trim().to_string())),
        }
    }
}
