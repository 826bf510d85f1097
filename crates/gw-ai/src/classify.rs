//! Error classification at the provider boundary (spec §4.7 "Retry &
//! classification"). The seven classes the spec names map directly onto
//! `gw_core::ErrorKind` (`server_error` ↔ `Server`), so this module only
//! builds the right `GatewayError` variant from an HTTP response — the
//! retry decision itself lives in `gw_core::GatewayError::{kind,
//! retryable, retry_after}`.

use std::time::Duration;

use gw_core::GatewayError;

pub fn http_status_error(channel_id: &str, status: u16, retry_after: Option<Duration>, body: &str) -> GatewayError {
    match status {
        401 | 403 => GatewayError::AuthError {
            channel: channel_id.to_string(),
        },
        429 => GatewayError::RateLimited {
            channel: channel_id.to_string(),
            retry_after,
        },
        400..=499 => GatewayError::InvalidRequest(truncate(body)),
        500..=599 => GatewayError::ServerError(truncate(body)),
        _ => GatewayError::Unknown,
    }
}

pub fn transport_error(error: &reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout
    } else if error.is_connect() {
        GatewayError::NetworkError(error.to_string())
    } else {
        GatewayError::NetworkError(error.to_string())
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_401_maps_to_auth_error() {
        let err = http_status_error("c1", 401, None, "unauthorized");
        assert!(matches!(err, GatewayError::AuthError { .. }));
        assert_eq!(err.kind(), gw_core::ErrorKind::Auth);
    }

    #[test]
    fn test_429_maps_to_rate_limited_and_is_retryable() {
        let err = http_status_error("c1", 429, Some(Duration::from_secs(2)), "too many requests");
        assert!(err.retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_400_maps_to_invalid_request_not_retryable() {
        let err = http_status_error("c1", 400, None, "bad request");
        assert!(!err.retryable());
    }

    #[test]
    fn test_500_maps_to_server_error_and_is_retryable() {
        let err = http_status_error("c1", 503, None, "upstream overloaded");
        assert!(err.retryable());
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "x".repeat(1000);
        let err = http_status_error("c1", 400, None, &body);
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn test_truncate_does_not_split_a_multibyte_char_at_the_boundary() {
        // 255 ascii bytes followed by a run of 3-byte chars straddling the
        // 256-byte cutoff; slicing at a raw byte index would panic here.
        let body = format!("{}{}", "x".repeat(255), "€€€€€€€€€€");
        let truncated = truncate(&body);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 256 + 3);
    }
}
