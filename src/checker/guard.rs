// src/checker/guard.rs
// =============================================================================
// Everything that decides whether a link may be probed at all.
//
// 1. Syntax: only bare host/domain tokens are accepted. Anything carrying a
//    path, query, fragment, port or scheme is rejected before any I/O.
// 2. Normalization: the token becomes an https:// URL.
// 3. SSRF guard: the host's addresses must include at least one public one.
//    Literal IPs are classified directly, names go through the resolver.
//    If resolution fails or returns nothing the host is treated as private.
//
// Rust concepts:
// - IpAddr / Ipv4Addr / Ipv6Addr: the standard library already knows about
//   loopback and friends, we just add the ranges it leaves unstable
// - url::Host: tells us whether the URL names a domain or a literal address
// =============================================================================

use super::transport::Resolver;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::debug;
use url::{Host, Url};

// Characters that would make a link more than a bare host
const FORBIDDEN_CHARS: &[char] = &['/', '?', '#', ':'];

/// Trim `link` and return it if it is a bare host token.
///
/// Returns None for empty input or anything containing `/ ? # :`.
pub fn validate_link(link: &str) -> Option<&str> {
    let clean = link.trim();
    if clean.is_empty() || clean.contains(FORBIDDEN_CHARS) {
        return None;
    }
    Some(clean)
}

/// Prepend `https://` unless the link already carries an http(s) scheme.
pub fn normalize_link(clean: &str) -> String {
    if clean.starts_with("http://") || clean.starts_with("https://") {
        clean.to_string()
    } else {
        format!("https://{}", clean)
    }
}

/// Validate, normalize and parse a raw link into a probe target.
pub fn parse_candidate(link: &str) -> Option<Url> {
    let clean = validate_link(link)?;
    Url::parse(&normalize_link(clean)).ok()
}

// Is this address somewhere we must never send a request?
//
// IPv4: 10/8, 172.16/12, 192.168/16, 127/8, 169.254/16 and 0/8.
// IPv6: loopback, unspecified, link-local unicast (fe80::/10), link-local
// multicast (ff02::/16), unique-local (fc00::/7), and IPv4-mapped addresses
// classified by their IPv4 part.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(v4),
            None => is_private_v6(v6),
        },
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.octets()[0] == 0
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xffc0) == 0xfe80
        || (first & 0xff0f) == 0xff02
        || (first & 0xfe00) == 0xfc00
}

pub struct SsrfGuard {
    resolver: Arc<dyn Resolver>,
}

impl SsrfGuard {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    /// True when `url` must not be probed.
    ///
    /// One public address is enough to let a multi-homed host through.
    pub async fn is_blocked(&self, url: &Url) -> bool {
        match url.host() {
            Some(Host::Ipv4(ip)) => is_private_ip(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => is_private_ip(IpAddr::V6(ip)),
            Some(Host::Domain(name)) => self.is_private_host(name).await,
            None => true,
        }
    }

    async fn is_private_host(&self, host: &str) -> bool {
        // A bare IP that url did not already classify (it normally does)
        if let Ok(ip) = host.parse::<IpAddr>() {
            return is_private_ip(ip);
        }

        match self.resolver.lookup(host).await {
            Ok(ips) if ips.is_empty() => {
                debug!(host, "resolver returned no addresses, blocking");
                true
            }
            Ok(ips) => ips.into_iter().all(is_private_ip),
            Err(e) => {
                debug!(host, error = %e, "resolution failed, blocking");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::transport::testing::StubResolver;
    use super::*;

    #[test]
    fn test_validate_link() {
        let cases = [
            ("", None),
            ("   ", None),
            ("example.com", Some("example.com")),
            ("  sub.example.com \n", Some("sub.example.com")),
            ("example.com/path", None),
            ("example.com?x=1", None),
            ("example.com#hash", None),
            ("example.com:8080", None),
            ("http://example.com", None),
        ];
        for (input, expected) in cases {
            assert_eq!(validate_link(input), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_normalize_link() {
        assert_eq!(normalize_link("example.com"), "https://example.com");
        assert_eq!(normalize_link("http://example.com"), "http://example.com");
        assert_eq!(normalize_link("https://example.com"), "https://example.com");
    }

    #[test]
    fn test_parse_candidate_rejects_unparseable_hosts() {
        assert!(parse_candidate("exa mple.com").is_none());
        assert!(parse_candidate("go.dev").is_some());
    }

    #[test]
    fn test_private_ranges() {
        let private = [
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "127.0.0.1",
            "169.254.169.254",
            "0.0.0.0",
            "::1",
            "::",
            "fe80::1",
            "fd00::1",
            "ff02::1",
            "::ffff:10.0.0.1",
        ];
        for ip in private {
            assert!(is_private_ip(ip.parse().unwrap()), "{} should be private", ip);
        }

        let public = ["8.8.8.8", "172.32.0.1", "93.184.216.34", "2606:4700::1111"];
        for ip in public {
            assert!(!is_private_ip(ip.parse().unwrap()), "{} should be public", ip);
        }
    }

    #[tokio::test]
    async fn test_guard_blocks_literal_private_ip() {
        let guard = SsrfGuard::new(Arc::new(StubResolver::new()));
        let url = parse_candidate("127.0.0.1").unwrap();
        assert!(guard.is_blocked(&url).await);

        // url normalizes numeric hosts, so this is 127.0.0.1 as well
        let url = parse_candidate("2130706433").unwrap();
        assert!(guard.is_blocked(&url).await);
    }

    #[tokio::test]
    async fn test_guard_uses_resolver_for_names() {
        let resolver = StubResolver::new()
            .answer("intranet.corp", &["10.0.0.5", "192.168.0.7"])
            .answer("mixed.example", &["10.0.0.5", "93.184.216.34"])
            .answer("empty.example", &[])
            .fail("nxdomain.example");
        let guard = SsrfGuard::new(Arc::new(resolver));

        let blocked = |host: &str| parse_candidate(host).unwrap();
        assert!(guard.is_blocked(&blocked("intranet.corp")).await);
        assert!(!guard.is_blocked(&blocked("mixed.example")).await);
        assert!(guard.is_blocked(&blocked("empty.example")).await);
        assert!(guard.is_blocked(&blocked("nxdomain.example")).await);
        assert!(!guard.is_blocked(&blocked("example.com")).await);
    }
}
