//! Scan target definitions

use crate::{Error, Result};
use std::net::IpAddr;

/// A host specification handed to the scanning engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScanTarget {
    /// Single IP address
    Ip(IpAddr),

    /// CIDR notation (e.g., "192.168.1.0/24")
    Cidr(String),

    /// Hostname (e.g., "server.example.com")
    Hostname(String),

    /// IP range (e.g., 192.168.1.1 - 192.168.1.254)
    Range(IpRange),
}

impl ScanTarget {
    /// Parse a target from a string, auto-detecting the type
    pub fn parse(s: &str) -> std::result::Result<Self, TargetParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TargetParseError::Empty);
        }

        if let Some((addr, prefix)) = s.split_once('/') {
            let ip: IpAddr = addr.parse().map_err(|_| TargetParseError::InvalidCidr)?;
            let prefix: u8 = prefix.parse().map_err(|_| TargetParseError::InvalidCidr)?;
            let max = if ip.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(TargetParseError::InvalidCidr);
            }
            return Ok(ScanTarget::Cidr(s.to_string()));
        }

        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(ScanTarget::Ip(ip));
        }

        // Hostnames may contain '-', so only treat it as a range when both sides are IPs
        if let Some((start, end)) = s.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.trim().parse(), end.trim().parse()) {
                return IpRange::new(start, end).map(ScanTarget::Range);
            }
        }

        if is_valid_hostname(s) {
            Ok(ScanTarget::Hostname(s.to_string()))
        } else {
            Err(TargetParseError::InvalidHostname)
        }
    }

    /// Get a display string for the target
    pub fn display(&self) -> String {
        match self {
            ScanTarget::Ip(ip) => ip.to_string(),
            ScanTarget::Cidr(cidr) => cidr.clone(),
            ScanTarget::Hostname(host) => host.clone(),
            ScanTarget::Range(range) => format!("{}-{}", range.start, range.end),
        }
    }
}

impl std::fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// An IP address range
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl IpRange {
    /// Create a new IP range; both ends must share a family and be ordered
    pub fn new(start: IpAddr, end: IpAddr) -> std::result::Result<Self, TargetParseError> {
        if start.is_ipv4() != end.is_ipv4() || start > end {
            return Err(TargetParseError::InvalidIpRange);
        }
        Ok(Self { start, end })
    }
}

/// Error parsing a scan target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetParseError {
    InvalidIpRange,
    InvalidCidr,
    InvalidHostname,
    Empty,
}

impl std::fmt::Display for TargetParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetParseError::InvalidIpRange => write!(f, "Invalid IP range"),
            TargetParseError::InvalidCidr => write!(f, "Invalid CIDR notation"),
            TargetParseError::InvalidHostname => write!(f, "Invalid hostname"),
            TargetParseError::Empty => write!(f, "Empty target"),
        }
    }
}

impl std::error::Error for TargetParseError {}

/// Parse operator input ("10.0.0.1 10.0.0.2, db.local") into targets.
///
/// Entries are separated by whitespace or commas; duplicates are dropped
/// while keeping the first occurrence's position.
pub fn parse_target_list(input: &str) -> Result<Vec<ScanTarget>> {
    let mut targets: Vec<ScanTarget> = Vec::new();

    for token in input.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        let target = ScanTarget::parse(token)
            .map_err(|e| Error::InvalidTarget(format!("{}: {}", token, e)))?;
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    if targets.is_empty() {
        return Err(Error::InvalidTarget("no targets given".to_string()));
    }
    Ok(targets)
}

fn is_valid_hostname(s: &str) -> bool {
    s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
