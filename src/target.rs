//! Classification of free-text target lines.
//!
//! Web and CLI input arrives as newline separated text mixing single
//! addresses, CIDR subnets, address ranges and domain names. Nothing here
//! fails: a line that is not an address form is a domain, and a blank line
//! is `Invalid` and gets dropped by the callers.

use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// 192.168.1.1
    Ipv4,
    /// 192.168.1.0/24
    Ipv4Subnet,
    /// 192.168.1.1-192.168.1.5
    Ipv4Range,
    Domain,
    /// Empty or whitespace-only line
    Invalid,
}

impl TargetKind {
    pub fn is_ip(self) -> bool {
        matches!(self, TargetKind::Ipv4 | TargetKind::Ipv4Subnet | TargetKind::Ipv4Range)
    }
}

pub fn classify(line: &str) -> TargetKind {
    let line = line.trim();
    if line.is_empty() {
        return TargetKind::Invalid;
    }
    if is_ipv4(line) {
        return TargetKind::Ipv4;
    }
    if is_subnet(line) {
        return TargetKind::Ipv4Subnet;
    }
    if is_range(line) {
        return TargetKind::Ipv4Range;
    }
    TargetKind::Domain
}

pub fn is_ipv4(s: &str) -> bool {
    s.parse::<Ipv4Addr>().is_ok()
}

/// `a.b.c.d/n` with a prefix length of at most 32
pub fn is_subnet(s: &str) -> bool {
    match s.split_once('/') {
        Some((addr, prefix)) => {
            is_ipv4(addr) && prefix.parse::<u8>().map_or(false, |len| len <= 32)
        }
        None => false,
    }
}

/// Exactly one `-` with an IPv4 address on both sides
pub fn is_range(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 2 && is_ipv4(parts[0]) && is_ipv4(parts[1])
}

/// Trimmed, non-empty lines in input order
pub fn split_target_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lines of `text` that classify as domains; address forms are skipped
pub fn domain_targets(text: &str) -> Vec<String> {
    split_target_lines(text)
        .into_iter()
        .filter(|line| classify(line) == TargetKind::Domain)
        .collect()
}
