use std::error::Error;
use std::fmt;

use bytes::Bytes;

use crate::http::{UpstreamFailure, UpstreamTransportErrorKind};

pub type RelayResult<T> = Result<T, RelayError>;

/// Errors raised while building or translating a provider request. These are
/// implementation defects or capability gaps, never upstream faults.
#[derive(Debug, Clone)]
pub enum AdaptorError {
    Unsupported(&'static str),
    InvalidConfig(String),
    Other(String),
}

impl fmt::Display for AdaptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaptorError::Unsupported(what) => write!(f, "unsupported: {what}"),
            AdaptorError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            AdaptorError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for AdaptorError {}

/// The relay error taxonomy. Classification decides both the client-facing
/// status and whether a caller may retry:
///
/// - `Local`: validation or accounting failure on our side; surfaced
///   immediately, never retried.
/// - `UpstreamTransport`: no HTTP response came back; retryable by the
///   caller's own policy.
/// - `UpstreamStatus`: the provider answered non-2xx; forwarded with the
///   body preserved for logs.
/// - `ResponseParse`: the provider answered with an unrecognizable shape;
///   fatal, never defaulted to success.
/// - `TaskTimeout`: a bounded provider-side poll loop exceeded its cap.
#[derive(Debug, Clone)]
pub enum RelayError {
    Local {
        code: String,
        message: String,
        status: u16,
    },
    UpstreamTransport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    UpstreamStatus {
        status: u16,
        body: Bytes,
    },
    ResponseParse {
        message: String,
    },
    TaskTimeout {
        attempts: u32,
    },
}

impl RelayError {
    pub fn local(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        RelayError::Local {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::local("invalid_request", message, 400)
    }

    pub fn quota_not_enough() -> Self {
        Self::local("quota_not_enough", "user quota is not enough", 403)
    }

    pub fn not_implemented(what: &str) -> Self {
        Self::local("not_implemented", format!("not implemented: {what}"), 501)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::local("internal_error", message, 500)
    }

    pub fn response_parse(message: impl Into<String>) -> Self {
        RelayError::ResponseParse {
            message: message.into(),
        }
    }

    /// Status returned to the client. Upstream statuses are forwarded as-is.
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Local { status, .. } => *status,
            RelayError::UpstreamTransport { .. } => 502,
            RelayError::UpstreamStatus { status, .. } => *status,
            RelayError::ResponseParse { .. } => 502,
            RelayError::TaskTimeout { .. } => 504,
        }
    }

    /// Stable machine-readable code for the client envelope.
    pub fn client_code(&self) -> &str {
        match self {
            RelayError::Local { code, .. } => code,
            RelayError::UpstreamTransport { .. } => "upstream_unreachable",
            RelayError::UpstreamStatus { .. } => "upstream_error",
            RelayError::ResponseParse { .. } => "bad_response",
            RelayError::TaskTimeout { .. } => "task_timeout",
        }
    }

    /// True when the failure is attributable to this gateway, not upstream.
    pub fn is_local(&self) -> bool {
        matches!(self, RelayError::Local { .. })
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Local { code, message, .. } => write!(f, "{code}: {message}"),
            RelayError::UpstreamTransport { kind, message } => {
                write!(f, "upstream transport ({kind:?}): {message}")
            }
            RelayError::UpstreamStatus { status, body } => {
                write!(f, "upstream status {status}: {}", String::from_utf8_lossy(body))
            }
            RelayError::ResponseParse { message } => write!(f, "bad response: {message}"),
            RelayError::TaskTimeout { attempts } => {
                write!(f, "task polling timed out after {attempts} attempts")
            }
        }
    }
}

impl Error for RelayError {}

impl From<UpstreamFailure> for RelayError {
    fn from(failure: UpstreamFailure) -> Self {
        match failure {
            UpstreamFailure::Transport { kind, message } => {
                RelayError::UpstreamTransport { kind, message }
            }
            UpstreamFailure::Http { status, body, .. } => {
                RelayError::UpstreamStatus { status, body }
            }
        }
    }
}

impl From<AdaptorError> for RelayError {
    fn from(err: AdaptorError) -> Self {
        match err {
            AdaptorError::Unsupported(what) => RelayError::not_implemented(what),
            AdaptorError::InvalidConfig(msg) => RelayError::internal(msg),
            AdaptorError::Other(msg) => RelayError::internal(msg),
        }
    }
}
