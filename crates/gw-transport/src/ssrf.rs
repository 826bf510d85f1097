//! URL validation and SSRF preflight for the HTTP and Streamable-HTTP
//! adapters (spec §4.2.c: "rejects non-http(s) URLs").

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use gw_core::GatewayError;

/// Parse and validate a base URL for the HTTP adapters. Rejects anything
/// that isn't `http`/`https`; requires `https` unless `allow_insecure` is
/// set (e.g. for explicit localhost development templates).
pub fn validate_http_url(raw: &str, allow_insecure: bool) -> Result<reqwest::Url, GatewayError> {
    let parsed = reqwest::Url::parse(raw)
        .map_err(|e| GatewayError::ConnectionFailed(format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_insecure => {}
        "http" => {
            return Err(GatewayError::PolicyViolation(
                "http:// URLs require allow_insecure".to_string(),
            ))
        }
        other => {
            return Err(GatewayError::PolicyViolation(format!(
                "unsupported URL scheme '{other}', only http(s) allowed"
            )))
        }
    }

    if parsed.host_str().is_none() {
        return Err(GatewayError::ConnectionFailed("URL has no host".to_string()));
    }

    Ok(parsed)
}

/// Resolve `host:port` and reject addresses that resolve into a private,
/// loopback, link-local, or cloud-metadata range, unless `allow_insecure`.
pub async fn preflight_ssrf_check(
    host: &str,
    port: u16,
    allow_insecure: bool,
) -> Result<(), GatewayError> {
    if allow_insecure {
        return Ok(());
    }

    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| GatewayError::ConnectionFailed(format!("DNS resolution failed: {e}")))?;

    let mut any = false;
    for addr in addrs {
        any = true;
        if is_ssrf_dangerous(addr) {
            return Err(GatewayError::PolicyViolation(format!(
                "refusing to connect to {host}: resolves to a disallowed address range"
            )));
        }
    }

    if !any {
        return Err(GatewayError::ConnectionFailed(format!(
            "DNS resolution for '{host}' returned no addresses"
        )));
    }

    Ok(())
}

fn is_ssrf_dangerous(addr: SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(v4) => is_ipv4_dangerous(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                is_ipv4_dangerous(mapped)
            } else {
                v6.is_loopback() || v6.is_unspecified() || is_unique_local(v6)
            }
        }
    }
}

fn is_ipv4_dangerous(v4: Ipv4Addr) -> bool {
    if v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified() {
        return true;
    }
    // Cloud metadata endpoint (AWS/GCP/Azure all use 169.254.169.254,
    // already covered by is_link_local, but keep the literal check
    // explicit so the intent survives a std link-local-range change).
    if v4 == Ipv4Addr::new(169, 254, 169, 254) {
        return true;
    }
    false
}

fn is_unique_local(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

pub fn parse_host_port(url: &reqwest::Url) -> Result<(String, u16), GatewayError> {
    let host = url
        .host_str()
        .ok_or_else(|| GatewayError::ConnectionFailed("URL has no host".to_string()))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| GatewayError::ConnectionFailed("URL has no resolvable port".to_string()))?;
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_rejects_non_http_scheme() {
        let result = validate_http_url("ftp://example.com/file", false);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_plain_http_without_allow_insecure() {
        let result = validate_http_url("http://example.com", false);
        assert!(result.is_err());
    }

    #[test]
    fn test_accepts_plain_http_with_allow_insecure() {
        let result = validate_http_url("http://localhost:8080", true);
        assert!(result.is_ok());
    }

    #[test]
    fn test_accepts_https() {
        let result = validate_http_url("https://example.com/mcp", false);
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_url_refused() {
        assert!(validate_http_url("not a url", false).is_err());
    }

    #[test]
    fn test_ipv4_private_ranges_dangerous() {
        assert!(is_ipv4_dangerous(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_ipv4_dangerous(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(is_ipv4_dangerous(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(is_ipv4_dangerous(Ipv4Addr::new(169, 254, 169, 254)));
    }

    #[test]
    fn test_ipv4_public_not_dangerous() {
        assert!(!is_ipv4_dangerous(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_ipv4_mapped_ipv6_private_is_dangerous() {
        let mapped = Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x0a00, 0x0001);
        assert!(mapped.to_ipv4_mapped().is_some());
        assert!(is_ssrf_dangerous(SocketAddr::new(IpAddr::V6(mapped), 443)));
    }

    #[test]
    fn test_parse_host_port_uses_scheme_default() {
        let url = reqwest::Url::parse("https://example.com/mcp").unwrap();
        let (host, port) = parse_host_port(&url).unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }
}
