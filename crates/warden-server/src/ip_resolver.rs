//! Trusted-proxy-aware client-IP resolution (spec.md §4.5, §9).

use crate::config::AuthConfig;
use axum::http::HeaderMap;
use std::net::IpAddr;

/// Resolves the client IP: `X-Real-IP` first if set and the immediate
/// peer is trusted, else the first entry of `X-Forwarded-For` under the
/// same condition, else the TCP peer address. Private-address
/// auto-trust is a documented fallback, never a default (spec.md §9).
pub fn resolve_client_ip(headers: &HeaderMap, peer: IpAddr, auth: &AuthConfig) -> IpAddr {
    let peer_is_trusted = is_trusted(peer, auth);

    if peer_is_trusted {
        if let Some(ip) = header_ip(headers, "x-real-ip") {
            return ip;
        }
        if let Some(ip) = forwarded_for_first(headers) {
            return ip;
        }
    }

    peer
}

fn is_trusted(peer: IpAddr, auth: &AuthConfig) -> bool {
    if auth.trusted_proxies.contains(&peer) {
        return true;
    }
    auth.trust_private_proxies && is_private(peer)
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn forwarded_for_first(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn auth_with(trusted: Vec<IpAddr>, trust_private: bool) -> AuthConfig {
        AuthConfig {
            hmac_keys: HashMap::new(),
            timestamp_tolerance: Duration::from_secs(60),
            api_keys: Vec::new(),
            trusted_proxies: trusted,
            trust_private_proxies: trust_private,
        }
    }

    #[test]
    fn falls_back_to_peer_when_untrusted() {
        let peer: IpAddr = Ipv4Addr::new(8, 8, 8, 8).into();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
        let auth = auth_with(vec![], false);

        assert_eq!(resolve_client_ip(&headers, peer, &auth), peer);
    }

    #[test]
    fn honors_x_real_ip_from_trusted_proxy() {
        let peer: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
        let auth = auth_with(vec![peer], false);

        let expected: IpAddr = Ipv4Addr::new(1, 2, 3, 4).into();
        assert_eq!(resolve_client_ip(&headers, peer, &auth), expected);
    }

    #[test]
    fn honors_forwarded_for_first_entry() {
        let peer: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("5.5.5.5, 6.6.6.6"),
        );
        let auth = auth_with(vec![peer], false);

        let expected: IpAddr = Ipv4Addr::new(5, 5, 5, 5).into();
        assert_eq!(resolve_client_ip(&headers, peer, &auth), expected);
    }

    #[test]
    fn private_ip_is_not_trusted_without_opt_in() {
        let peer: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
        let auth = auth_with(vec![], false);

        assert_eq!(resolve_client_ip(&headers, peer, &auth), peer);
    }

    #[test]
    fn private_ip_is_trusted_when_opted_in() {
        let peer: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
        let auth = auth_with(vec![], true);

        let expected: IpAddr = Ipv4Addr::new(1, 2, 3, 4).into();
        assert_eq!(resolve_client_ip(&headers, peer, &auth), expected);
    }
}
