//! Client address extraction

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

use crate::models::ClientInfo;

/// Derive the client's address facts for one request.
///
/// With `trust_proxy` the leftmost `X-Forwarded-For` hop, then `X-Real-IP`,
/// take priority over the socket peer. Unparsable forwarded values are
/// ignored. The MAC comes from `mac_header` and is dropped if it does not
/// normalize.
pub fn derive_client_info(
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    trust_proxy: bool,
    mac_header: &str,
) -> ClientInfo {
    let mac = headers.get(mac_header).and_then(|h| h.to_str().ok());

    let forwarded = if trust_proxy {
        forwarded_ip(headers)
    } else {
        None
    };

    match forwarded.or_else(|| peer.map(|p| p.ip())) {
        Some(ip) => ClientInfo::from_ip(ip, mac),
        None => ClientInfo {
            mac: mac.and_then(crate::utils::address::normalize_mac),
            ..ClientInfo::unknown()
        },
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    // Take the leftmost IP (original client)
    let from_xff = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());

    from_xff.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    })
}
