//! Security group ingress rule matching
//!
//! Before creating an ingress rule for the VIP, the reconciler checks
//! whether an existing rule already grants the required access. A rule
//! matches when each of its range fields is either unrestricted or covers
//! the requested value. An empty string and a missing field both mean
//! "unrestricted"; backend versions differ on which one they report, so the
//! convention is preserved literally rather than normalized.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::cloud::SgRule;

/// Whether an existing rule already admits traffic to `address`:`port`.
///
/// Unparseable range fields never match; a new, well-formed rule gets
/// created instead of trusting garbage.
pub fn rule_matches(rule: &SgRule, address: &str, port: u16) -> bool {
    covers_port(rule.port_range.as_deref(), port) && covers_address(rule.ip_range.as_deref(), address)
}

/// Whether any rule in the list admits traffic to `address`:`port`
pub fn any_rule_matches(rules: &[SgRule], address: &str, port: u16) -> bool {
    rules.iter().any(|rule| rule_matches(rule, address, port))
}

fn covers_port(range: Option<&str>, port: u16) -> bool {
    let range = match range {
        None | Some("") => return true,
        Some(r) => r,
    };
    let (lo, hi) = match range.split_once(':') {
        Some((lo, hi)) => (lo, hi),
        None => (range, range),
    };
    match (lo.trim().parse::<u16>(), hi.trim().parse::<u16>()) {
        (Ok(lo), Ok(hi)) => lo <= port && port <= hi,
        _ => false,
    }
}

fn covers_address(range: Option<&str>, address: &str) -> bool {
    let range = match range {
        None | Some("") => return true,
        Some(r) => r,
    };
    let net = match range.parse::<IpNet>() {
        Ok(net) => net,
        Err(_) => return false,
    };
    match address.parse::<IpAddr>() {
        Ok(addr) => net.contains(&addr),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(port_range: Option<&str>, ip_range: Option<&str>) -> SgRule {
        SgRule {
            port_range: port_range.map(str::to_string),
            ip_range: ip_range.map(str::to_string),
        }
    }

    #[test]
    fn fully_unrestricted_rule_matches() {
        assert!(rule_matches(&rule(None, None), "1.1.1.1", 80));
        assert!(rule_matches(&rule(Some(""), Some("")), "1.1.1.1", 80));
    }

    #[test]
    fn covering_port_range_with_open_source_matches() {
        assert!(rule_matches(&rule(Some("60:90"), Some("")), "1.1.1.1", 80));
        assert!(rule_matches(&rule(Some("80:80"), None), "1.1.1.1", 80));
        assert!(rule_matches(&rule(Some("80"), None), "1.1.1.1", 80));
    }

    #[test]
    fn covering_cidr_with_open_ports_matches() {
        assert!(rule_matches(&rule(Some(""), Some("1.0.0.0/8")), "1.1.1.1", 80));
        assert!(rule_matches(&rule(None, Some("1.1.1.1/32")), "1.1.1.1", 80));
    }

    #[test]
    fn disjoint_values_do_not_match() {
        // port 80 outside 81:90, even though the source is unrestricted
        assert!(!rule_matches(&rule(Some("81:90"), Some("")), "1.1.1.1", 80));
        // address outside 2.0.0.0/8, even though ports are unrestricted
        assert!(!rule_matches(&rule(Some(""), Some("2.0.0.0/8")), "1.1.1.1", 80));
    }

    #[test]
    fn both_fields_must_cover() {
        // port covers but source does not
        assert!(!rule_matches(
            &rule(Some("60:90"), Some("2.0.0.0/8")),
            "1.1.1.1",
            80
        ));
        // source covers but port does not
        assert!(!rule_matches(
            &rule(Some("81:90"), Some("1.0.0.0/8")),
            "1.1.1.1",
            80
        ));
        // both cover
        assert!(rule_matches(
            &rule(Some("60:90"), Some("1.0.0.0/8")),
            "1.1.1.1",
            80
        ));
    }

    #[test]
    fn malformed_fields_never_match() {
        assert!(!rule_matches(&rule(Some("eighty"), None), "1.1.1.1", 80));
        assert!(!rule_matches(&rule(None, Some("not-a-cidr")), "1.1.1.1", 80));
    }

    #[test]
    fn empty_rule_list_does_not_match() {
        assert!(!any_rule_matches(&[], "1.1.1.1", 80));
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            rule(Some("81:90"), Some("")),
            rule(Some(""), Some("2.0.0.0/8")),
        ];
        assert!(!any_rule_matches(&rules, "1.1.1.1", 80));

        let rules = vec![rule(Some("81:90"), Some("")), rule(None, None)];
        assert!(any_rule_matches(&rules, "1.1.1.1", 80));
    }
}
