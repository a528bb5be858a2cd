//! Address pattern matching
//!
//! Matching is total: any malformed address or pattern simply does not match.
//!
//! Pattern forms:
//! - `any` or `*`: matches everything
//! - `10.0.0.5`, `2001:db8::1`: exact address
//! - `10.0.0.0/8`, `2001:db8::/32`: CIDR range
//! - `mac:aa:bb:cc:dd:ee:ff`: exact MAC; octets may be `*` and a trailing
//!   `*` matches all remaining octets (`mac:aa:bb:cc:*`)

use std::net::IpAddr;

use ipnet::IpNet;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ClientInfo;

/// Prefix marking a MAC pattern
pub const MAC_PREFIX: &str = "mac:";

static MAC_OCTET_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{2}$").unwrap());

static DOTTED_MAC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{4}\.[0-9a-f]{4}\.[0-9a-f]{4}$").unwrap());

static BARE_MAC_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{12}$").unwrap());

pub fn is_wildcard(pattern: &str) -> bool {
    matches!(pattern.trim(), "any" | "*")
}

pub fn is_mac_pattern(pattern: &str) -> bool {
    strip_mac_prefix(pattern).is_some()
}

fn strip_mac_prefix(pattern: &str) -> Option<&str> {
    let pattern = pattern.trim();
    match pattern.get(..MAC_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(MAC_PREFIX) => {
            Some(&pattern[MAC_PREFIX.len()..])
        }
        _ => None,
    }
}

/// Normalize a MAC address to lowercase colon-separated form.
///
/// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff`, `aabb.ccdd.eeff` and
/// `aabbccddeeff` in any case. Mixed separators are rejected.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let lower = raw.trim().to_ascii_lowercase();

    let octets: Vec<String> = if DOTTED_MAC_REGEX.is_match(&lower) || BARE_MAC_REGEX.is_match(&lower)
    {
        let hex: String = lower.chars().filter(|c| *c != '.').collect();
        hex.as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect()
    } else {
        let separator = match (lower.contains(':'), lower.contains('-')) {
            (true, false) => ':',
            (false, true) => '-',
            _ => return None,
        };
        lower.split(separator).map(str::to_string).collect()
    };

    if octets.len() != 6 || !octets.iter().all(|o| MAC_OCTET_REGEX.is_match(o)) {
        return None;
    }
    Some(octets.join(":"))
}

/// Parsed MAC pattern body: one entry per octet, `None` for `*`
#[derive(Debug, PartialEq)]
struct MacPattern {
    octets: Vec<Option<String>>,
    /// Trailing `*` matches any remaining octets
    open_ended: bool,
}

fn parse_mac_pattern(body: &str) -> Option<MacPattern> {
    let body = body.trim().to_ascii_lowercase();
    if body == "*" {
        return Some(MacPattern {
            octets: vec![],
            open_ended: true,
        });
    }
    if !body.contains('*') {
        let normalized = normalize_mac(&body)?;
        return Some(MacPattern {
            octets: normalized.split(':').map(|o| Some(o.to_string())).collect(),
            open_ended: false,
        });
    }

    let separator = match (body.contains(':'), body.contains('-')) {
        (true, false) => ':',
        (false, true) => '-',
        _ => return None,
    };
    let segments: Vec<&str> = body.split(separator).collect();
    let open_ended = segments.len() < 6 && segments.last() == Some(&"*");
    let fixed = if open_ended {
        &segments[..segments.len() - 1]
    } else {
        &segments[..]
    };
    if !open_ended && segments.len() != 6 {
        return None;
    }

    let mut octets = Vec::with_capacity(fixed.len());
    for segment in fixed {
        match *segment {
            "*" => octets.push(None),
            octet if MAC_OCTET_REGEX.is_match(octet) => octets.push(Some(octet.to_string())),
            _ => return None,
        }
    }
    Some(MacPattern { octets, open_ended })
}

/// Match an IP address against an exact, CIDR or wildcard pattern.
///
/// Cross-family comparisons never match.
pub fn matches_ip(ip: &str, pattern: &str) -> bool {
    let pattern = pattern.trim();
    if is_wildcard(pattern) {
        return true;
    }
    let Ok(addr) = ip.trim().parse::<IpAddr>() else {
        return false;
    };
    let addr = addr.to_canonical();

    if pattern.contains('/') {
        match pattern.parse::<IpNet>() {
            Ok(net) => net.contains(&addr),
            Err(_) => false,
        }
    } else {
        match pattern.parse::<IpAddr>() {
            Ok(expected) => expected.to_canonical() == addr,
            Err(_) => false,
        }
    }
}

/// Match a MAC address against a `mac:` pattern or a wildcard
pub fn matches_mac(mac: &str, pattern: &str) -> bool {
    if is_wildcard(pattern) {
        return true;
    }
    let Some(body) = strip_mac_prefix(pattern) else {
        return false;
    };
    let Some(address) = normalize_mac(mac) else {
        return false;
    };
    let Some(parsed) = parse_mac_pattern(body) else {
        return false;
    };

    address
        .split(':')
        .zip(parsed.octets.iter())
        .all(|(actual, expected)| expected.as_deref().map_or(true, |e| e == actual))
}

/// Match the client against one pattern, picking the IP or MAC side by the
/// pattern's form
pub fn matches_client(client: &ClientInfo, pattern: &str) -> bool {
    if is_wildcard(pattern) {
        return true;
    }
    if is_mac_pattern(pattern) {
        return client
            .mac
            .as_deref()
            .is_some_and(|mac| matches_mac(mac, pattern));
    }
    matches_ip(&client.ip, pattern)
}

/// Whether a pattern is well formed (used to warn about rules that can
/// never match)
pub fn is_valid_pattern(pattern: &str) -> bool {
    let pattern = pattern.trim();
    if is_wildcard(pattern) {
        return true;
    }
    if let Some(body) = strip_mac_prefix(pattern) {
        return parse_mac_pattern(body).is_some();
    }
    if pattern.contains('/') {
        pattern.parse::<IpNet>().is_ok()
    } else {
        pattern.parse::<IpAddr>().is_ok()
    }
}
