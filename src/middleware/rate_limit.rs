use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderValue},
    response::Response,
};
use ipnet::IpNet;

use crate::{config::TrustedProxiesConfig, services::RateLimitResult};

pub const RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";
pub const RETRY_AFTER: &str = "Retry-After";

/// Limit and remaining value for tiers that are not counted.
pub const UNLIMITED: &str = "unlimited";

/// Every header the gateway may attach from a window check.
pub const RATE_LIMIT_HEADERS: &[&str] = &[
    RATE_LIMIT_LIMIT,
    RATE_LIMIT_REMAINING,
    RATE_LIMIT_RESET,
    RETRY_AFTER,
];

/// Attach window state to a response.
///
/// `X-RateLimit-Reset` is a Unix timestamp in seconds. Limit and remaining
/// read `unlimited` for tiers that are not counted. `Retry-After` is only set
/// on rejections.
pub fn add_rate_limit_headers(response: &mut Response, rate_limit: &RateLimitResult, rejected: bool) {
    let headers = response.headers_mut();

    headers.insert(RATE_LIMIT_LIMIT, count_or_unlimited(rate_limit.limit));
    headers.insert(RATE_LIMIT_REMAINING, count_or_unlimited(rate_limit.remaining));
    headers.insert(
        RATE_LIMIT_RESET,
        HeaderValue::from(rate_limit.reset_at.timestamp().max(0)),
    );
    if rejected {
        headers.insert(RETRY_AFTER, HeaderValue::from(rate_limit.retry_after_secs));
    }
}

fn count_or_unlimited(count: Option<u32>) -> HeaderValue {
    match count {
        Some(count) => HeaderValue::from(count),
        None => HeaderValue::from_static(UNLIMITED),
    }
}

/// Extract the client IP address from the request.
///
/// Proxy headers are only trusted when the connecting peer is a trusted proxy
/// (or `dangerously_trust_all` is set). The forwarded chain is then read
/// right-to-left and the first hop outside the trusted ranges is the client,
/// so entries an attacker prepends are never used. `X-Real-IP` is the
/// fallback.
pub fn extract_client_ip(req: &Request, trusted_proxies: &TrustedProxiesConfig) -> Option<IpAddr> {
    let connecting = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    extract_client_ip_from_parts(req.headers(), connecting, trusted_proxies)
}

pub fn extract_client_ip_from_parts(
    headers: &HeaderMap,
    connecting_addr: Option<SocketAddr>,
    trusted_proxies: &TrustedProxiesConfig,
) -> Option<IpAddr> {
    let connecting_ip = connecting_addr.map(|addr| addr.ip());

    if !trusted_proxies.is_configured() {
        return connecting_ip;
    }

    let parsed_cidrs = trusted_proxies.parsed_cidrs();
    let should_trust_headers = match connecting_ip {
        Some(ip) => trusted_proxies.is_trusted_ip(ip, &parsed_cidrs),
        None => trusted_proxies.dangerously_trust_all,
    };

    if !should_trust_headers {
        if let Some(ip) = connecting_ip
            && headers.contains_key(&trusted_proxies.real_ip_header)
        {
            tracing::debug!(
                connecting_ip = %ip,
                header = %trusted_proxies.real_ip_header,
                "Ignoring proxy header from untrusted peer"
            );
        }
        return connecting_ip;
    }

    if let Some(ip) = forwarded_client(headers, trusted_proxies, &parsed_cidrs) {
        return Some(ip);
    }

    if let Some(value) = headers.get("X-Real-IP")
        && let Ok(value) = value.to_str()
        && let Ok(ip) = value.trim().parse::<IpAddr>()
    {
        return Some(ip);
    }

    connecting_ip
}

fn forwarded_client(
    headers: &HeaderMap,
    trusted_proxies: &TrustedProxiesConfig,
    parsed_cidrs: &[IpNet],
) -> Option<IpAddr> {
    let value = headers.get(&trusted_proxies.real_ip_header)?.to_str().ok()?;
    let hops: Vec<IpAddr> = value
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if trusted_proxies.dangerously_trust_all {
        return hops.into_iter().next();
    }

    hops.into_iter()
        .rev()
        .find(|&ip| !trusted_proxies.is_trusted_ip(ip, parsed_cidrs))
}
