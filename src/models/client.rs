//! Client facts derived from an inbound request

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::utils::address::normalize_mac;

/// IP address family
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

impl std::fmt::Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "v4"),
            IpVersion::V6 => write!(f, "v6"),
        }
    }
}

/// Facts about the calling client, derived once per request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client address as text (canonical form when it parsed)
    pub ip: String,
    /// Address family, `None` when `ip` is not a parsable address
    pub ip_version: Option<IpVersion>,
    /// Normalized MAC address (lowercase, colon separated)
    pub mac: Option<String>,
}

impl ClientInfo {
    /// Build client info from a parsed address.
    ///
    /// IPv4-mapped IPv6 addresses are reduced to plain IPv4 so that v4 rules
    /// apply to dual-stack listeners. The MAC is dropped if it does not
    /// normalize.
    pub fn from_ip(addr: IpAddr, mac: Option<&str>) -> Self {
        let addr = addr.to_canonical();
        Self {
            ip: addr.to_string(),
            ip_version: Some(IpVersion::of(&addr)),
            mac: mac.and_then(normalize_mac),
        }
    }

    /// Build client info from raw text; unparsable addresses keep the raw
    /// text with an unknown family.
    pub fn from_raw(ip: &str, mac: Option<&str>) -> Self {
        match ip.trim().parse::<IpAddr>() {
            Ok(addr) => Self::from_ip(addr, mac),
            Err(_) => Self {
                ip: ip.trim().to_string(),
                ip_version: None,
                mac: mac.and_then(normalize_mac),
            },
        }
    }

    /// Client with no usable address (no peer information available)
    pub fn unknown() -> Self {
        Self {
            ip: String::new(),
            ip_version: None,
            mac: None,
        }
    }

    pub fn parsed_ip(&self) -> Option<IpAddr> {
        self.ip.parse().ok()
    }

    pub fn has_address(&self) -> bool {
        !self.ip.is_empty()
    }
}
