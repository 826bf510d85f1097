use std::time::Duration;

/// Error kinds stable across the core (spec §7).
///
/// `Display` never interpolates raw secret values (keys, tokens, env
/// values) — only names/counts/durations.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("parse error: {0}")]
    ParseError(String),
    #[error("buffer overflow: exceeded {budget} bytes")]
    BufferOverflow { budget: usize },
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("unsupported protocol version: {0}")]
    VersionUnsupported(String),

    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("request cancelled")]
    Cancelled,

    #[error("command '{0}' is not on the allow-list")]
    CommandNotAllowed(String),
    #[error("working directory escapes the allowed root")]
    WorkingDirectoryOutsideRoot,
    #[error("package '{package}' is not available in the offline sandbox cache")]
    OfflinePackageMissing { package: String },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("no service instance with id '{0}'")]
    InstanceNotFound(String),

    #[error("provider auth error for channel '{channel}'")]
    AuthError { channel: String },
    #[error("rate limited on channel '{channel}'")]
    RateLimited {
        channel: String,
        retry_after: Option<Duration>,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("provider server error: {0}")]
    ServerError(String),
    #[error("provider call timed out")]
    Timeout,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("unknown error")]
    Unknown,
}

/// Coarse retryability/kind classification surfaced to callers, per §7's
/// "tagged error with kind, retryability hint, optional retry-after hint".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Timeout,
    Policy,
    Auth,
    RateLimit,
    InvalidRequest,
    Server,
    Network,
    Unknown,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        use GatewayError::*;
        match self {
            NotConnected | ConnectionClosed | ConnectionFailed(_) => ErrorKind::Transport,
            ParseError(_) | BufferOverflow { .. } | MalformedMessage(_) => ErrorKind::Protocol,
            HandshakeFailed(_) | VersionUnsupported(_) => ErrorKind::Protocol,
            RequestTimeout(_) => ErrorKind::Timeout,
            Cancelled => ErrorKind::Protocol,
            CommandNotAllowed(_) | WorkingDirectoryOutsideRoot | OfflinePackageMissing { .. } => {
                ErrorKind::Policy
            }
            PolicyViolation(_) => ErrorKind::Policy,
            InstanceNotFound(_) => ErrorKind::InvalidRequest,
            AuthError { .. } => ErrorKind::Auth,
            RateLimited { .. } => ErrorKind::RateLimit,
            InvalidRequest(_) => ErrorKind::InvalidRequest,
            ServerError(_) => ErrorKind::Server,
            Timeout => ErrorKind::Timeout,
            NetworkError(_) => ErrorKind::Network,
            Unknown => ErrorKind::Unknown,
        }
    }

    /// Whether a caller should retry this error class (§4.7 retry table).
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimit | ErrorKind::Server | ErrorKind::Timeout | ErrorKind::Network
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_not_connected() {
        assert_eq!(GatewayError::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn test_display_buffer_overflow() {
        let err = GatewayError::BufferOverflow { budget: 1024 };
        assert_eq!(err.to_string(), "buffer overflow: exceeded 1024 bytes");
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(GatewayError::NotConnected.kind(), ErrorKind::Transport);
        assert_eq!(
            GatewayError::AuthError {
                channel: "c1".into()
            }
            .kind(),
            ErrorKind::Auth
        );
    }

    #[test]
    fn test_retryable_classes() {
        assert!(
            GatewayError::RateLimited {
                channel: "c1".into(),
                retry_after: None
            }
            .retryable()
        );
        assert!(GatewayError::NetworkError("reset".into()).retryable());
        assert!(!GatewayError::InvalidRequest("bad".into()).retryable());
        assert!(!GatewayError::AuthError { channel: "c1".into() }.retryable());
    }

    #[test]
    fn test_retry_after_only_on_rate_limited() {
        let d = Duration::from_secs(3);
        let err = GatewayError::RateLimited {
            channel: "c1".into(),
            retry_after: Some(d),
        };
        assert_eq!(err.retry_after(), Some(d));
        assert_eq!(GatewayError::Timeout.retry_after(), None);
    }

    #[test]
    fn test_no_secret_leak_in_display() {
        let secret = "sk-super-secret-marker-value";
        let err = GatewayError::AuthError {
            channel: "c1".into(),
        };
        assert!(!err.to_string().contains(secret));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GatewayError>();
    }
}
