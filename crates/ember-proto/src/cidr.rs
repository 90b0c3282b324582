//! CIDR parsing and matching for Z-line style IP bans.
//!
//! Patterns are `a.b.c.d/len` or IPv6 equivalents; a bare address is treated
//! as a full-length prefix. Comparison happens on the packed binary address,
//! never on the textual form.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

/// Parse a CIDR pattern. A bare IP gets the host prefix length.
pub fn parse(pattern: &str) -> Option<IpNet> {
    if let Ok(net) = IpNet::from_str(pattern) {
        return Some(net);
    }
    match IpAddr::from_str(pattern) {
        Ok(ip) => {
            let len = match ip {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            IpNet::new(ip, len).ok()
        }
        Err(_) => None,
    }
}

/// Does `pattern` look like an IP or CIDR rather than a hostname glob?
pub fn is_cidr_pattern(pattern: &str) -> bool {
    parse(pattern).is_some()
}

/// Match an address against a CIDR pattern. Malformed patterns never match.
pub fn matches(pattern: &str, ip: IpAddr) -> bool {
    match parse(pattern) {
        Some(net) => net.contains(&ip),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn v4_prefix() {
        assert!(matches("192.0.2.0/24", ip("192.0.2.77")));
        assert!(!matches("192.0.2.0/24", ip("192.0.3.1")));
    }

    #[test]
    fn bare_address_is_host_match() {
        assert!(matches("192.0.2.1", ip("192.0.2.1")));
        assert!(!matches("192.0.2.1", ip("192.0.2.2")));
    }

    #[test]
    fn v6_prefix() {
        assert!(matches("2001:db8::/32", ip("2001:db8:1::5")));
        assert!(!matches("2001:db8::/32", ip("2001:db9::1")));
    }

    #[test]
    fn malformed_never_matches() {
        assert!(!matches("not-an-ip", ip("192.0.2.1")));
        assert!(!matches("192.0.2.0/99", ip("192.0.2.1")));
        assert!(!is_cidr_pattern("*.example.org"));
    }
}
