//! Client identity resolution for rate limiting and brute-force lockout.
//!
//! # Resolution Order
//!
//! 1. `X-Forwarded-For` (first element of the comma-separated list)
//! 2. `X-Real-IP`
//! 3. The TCP peer address (`ConnectInfo<SocketAddr>`)
//! 4. [`UNKNOWN_IP`]
//!
//! Steps 1 and 2 are subject to the trust boundary below.
//!
//! # Trust Boundary
//!
//! Forwarded headers are client-controlled unless a proxy you operate
//! overwrites them. `TRUSTED_PROXIES` makes that boundary explicit:
//!
//! | `TRUSTED_PROXIES` | Peer | Identity |
//! |---|---|---|
//! | empty | any | forwarded header if present, else peer |
//! | set | inside allowlist | forwarded header if present, else peer |
//! | set | outside allowlist | peer (headers ignored) |
//! | set | unknown | [`UNKNOWN_IP`] |
//!
//! With an empty allowlist anyone who can reach the service directly can
//! rotate `X-Forwarded-For` to dodge per-IP limits. Startup logs a warning
//! in that mode.
//!
//! Configure the proxy to overwrite, not append:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! # The "unknown" Fallback
//!
//! All requests without an identifiable address share the `"unknown"` key and
//! are therefore limited collectively. Monitor for high "unknown" traffic.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Identity used when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `"10.0.0.0/8"`, `"::1/128"`, or a bare address (implicit /32 or /128).
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();

        let Some((addr, prefix)) = cidr.split_once('/') else {
            let network: IpAddr = cidr.parse().ok()?;
            return Some(Self {
                network,
                prefix_len: max_prefix(&network),
            });
        };

        let network: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;
        if prefix_len > max_prefix(&network) {
            return None;
        }

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            // Mixed families never match
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Allowlist of reverse proxies whose forwarded headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy allowlist enabled");
        }

        Self { ranges }
    }

    /// Whether an allowlist is configured. When it is not, forwarded headers
    /// are trusted from everyone.
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip` may set forwarded headers.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        !self.is_enabled() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Header Parsing
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

/// Read the forwarded client address from headers without allocating.
/// Empty values are treated as absent.
#[inline]
fn forwarded_ip<B>(req: &Request<B>) -> ForwardedIp<'_> {
    // "client, proxy1, proxy2" - the first entry is the client
    if let Some(value) = req.headers().get("x-forwarded-for")
        && let Ok(value) = value.to_str()
        && let Some(first) = value.split(',').next()
        && !first.trim().is_empty()
    {
        return ForwardedIp::FromXff(first.trim());
    }

    if let Some(value) = req.headers().get("x-real-ip")
        && let Ok(value) = value.to_str()
        && !value.trim().is_empty()
    {
        return ForwardedIp::FromRealIp(value.trim());
    }

    ForwardedIp::NotFound
}

fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

// =============================================================================
// Public API
// =============================================================================

/// Resolve the client identity for a request.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` for the fallback so the common
/// no-information case does not allocate.
pub fn resolve_client_ip<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    let peer = peer_ip(req);

    let headers_believed = match peer {
        _ if !trusted.is_enabled() => true,
        Some(peer) => trusted.is_trusted(&peer),
        None => false,
    };

    if headers_believed {
        match forwarded_ip(req) {
            ForwardedIp::FromXff(ip) | ForwardedIp::FromRealIp(ip) => {
                return Cow::Owned(ip.to_string());
            }
            ForwardedIp::NotFound => {}
        }
    } else if forwarded_ip(req) != ForwardedIp::NotFound {
        debug!(
            peer = ?peer,
            "Ignoring forwarded client address from untrusted peer"
        );
    }

    peer.map_or(Cow::Borrowed(UNKNOWN_IP), |peer| Cow::Owned(peer.to_string()))
}
