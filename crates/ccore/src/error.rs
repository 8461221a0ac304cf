//! Error types for ccore.
//!
//! All fallible operations return [`Result`], built on [`CcoreError`]. The
//! enum follows the usual layering:
//!
//! - Use `thiserror` for automatic `Error` trait implementation
//! - Preserve error chains with `#[source]` attributes
//! - Include context in messages (engine names, MIME types, URLs)
//!
//! Every variant maps to a stable [`ErrorKind`] token. The fallback
//! executor matches kinds against the configured fatal set, and the retry
//! layer consults [`CcoreError::is_transient`] to decide whether a backoff
//! attempt is worthwhile.

use thiserror::Error;

/// Result type alias using `CcoreError`.
pub type Result<T> = std::result::Result<T, CcoreError>;

/// One engine's terminal outcome inside a fallback chain.
///
/// Collected in resolution order; surfaced by
/// [`CcoreError::AllEnginesFailed`] and [`CcoreError::Timeout`] so callers
/// can see exactly what was tried and why each attempt died.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EngineAttempt {
    pub engine: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for EngineAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.engine, self.kind.as_str(), self.message)
    }
}

/// A single failed audio segment inside a partial transcription failure.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SegmentFailure {
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

/// Stable error-kind tokens.
///
/// These are the strings accepted by `fallback.fatal_errors` and reported
/// in attempt records; the `as_str` form is part of the configuration
/// surface and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    EngineNotFound,
    EngineUnavailable,
    NoEngineAvailable,
    NetworkError,
    RateLimitError,
    AuthError,
    NotFoundError,
    ParseError,
    UnsupportedContentError,
    Timeout,
    Cancelled,
    TranscriptionError,
    AllEnginesFailed,
    ValidationError,
    IoError,
    SerializationError,
    FatalInternal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EngineNotFound => "EngineNotFound",
            ErrorKind::EngineUnavailable => "EngineUnavailable",
            ErrorKind::NoEngineAvailable => "NoEngineAvailable",
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::RateLimitError => "RateLimitError",
            ErrorKind::AuthError => "AuthError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::UnsupportedContentError => "UnsupportedContentError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::TranscriptionError => "TranscriptionError",
            ErrorKind::AllEnginesFailed => "AllEnginesFailed",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::IoError => "IoError",
            ErrorKind::SerializationError => "SerializationError",
            ErrorKind::FatalInternal => "FatalInternal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for all ccore operations.
#[derive(Debug, Error)]
pub enum CcoreError {
    /// An explicitly requested engine name is not registered.
    #[error("Engine not found: '{engine}'")]
    EngineNotFound { engine: String },

    /// Engine is registered but its external dependencies or credentials
    /// are missing at runtime.
    #[error("Engine '{engine}' is not available (missing: {})", missing.join(", "))]
    EngineUnavailable { engine: String, missing: Vec<String> },

    /// The resolver produced no candidates for a MIME type.
    #[error("No engines available for MIME type '{mime_type}'")]
    NoEngineAvailable { mime_type: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    #[error("Authentication rejected: {message}")]
    Auth { message: String },

    #[error("Resource not found: {message}")]
    NotFound { message: String },

    #[error("Parse error: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported content: {message}")]
    UnsupportedContent { message: String },

    /// Overall extraction budget exceeded. Carries the attempts recorded
    /// before the deadline so the failure is still observable per engine.
    #[error("Extraction timed out after {seconds}s ({} engines attempted)", attempts.len())]
    Timeout { seconds: u64, attempts: Vec<EngineAttempt> },

    #[error("Extraction cancelled")]
    Cancelled,

    /// One or more audio segments failed after their siblings completed.
    #[error("Transcription failed: {message}")]
    Transcription {
        message: String,
        segments: Vec<SegmentFailure>,
    },

    /// Every engine in the resolved chain failed.
    #[error("All {} engines failed: {}", attempts.len(), format_attempts(attempts))]
    AllEnginesFailed { attempts: Vec<EngineAttempt> },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_attempts(attempts: &[EngineAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pub fn $name<S: Into<String>>(message: S) -> Self {
            Self::$variant {
                message: message.into(),
                source: None,
            }
        }
    };
}

impl CcoreError {
    error_constructor!(network, Network);
    error_constructor!(parse, Parse);
    error_constructor!(validation, Validation);

    pub fn network_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn parse_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Parse {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedContent {
            message: message.into(),
        }
    }

    /// The stable kind token for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CcoreError::EngineNotFound { .. } => ErrorKind::EngineNotFound,
            CcoreError::EngineUnavailable { .. } => ErrorKind::EngineUnavailable,
            CcoreError::NoEngineAvailable { .. } => ErrorKind::NoEngineAvailable,
            CcoreError::Network { .. } => ErrorKind::NetworkError,
            CcoreError::RateLimited { .. } => ErrorKind::RateLimitError,
            CcoreError::Auth { .. } => ErrorKind::AuthError,
            CcoreError::NotFound { .. } => ErrorKind::NotFoundError,
            CcoreError::Parse { .. } => ErrorKind::ParseError,
            CcoreError::UnsupportedContent { .. } => ErrorKind::UnsupportedContentError,
            CcoreError::Timeout { .. } => ErrorKind::Timeout,
            CcoreError::Cancelled => ErrorKind::Cancelled,
            CcoreError::Transcription { .. } => ErrorKind::TranscriptionError,
            CcoreError::AllEnginesFailed { .. } => ErrorKind::AllEnginesFailed,
            CcoreError::Validation { .. } => ErrorKind::ValidationError,
            CcoreError::Io(_) => ErrorKind::IoError,
            CcoreError::Serialization(_) => ErrorKind::SerializationError,
            CcoreError::Internal(_) => ErrorKind::FatalInternal,
        }
    }

    /// Whether retrying this error with backoff can succeed.
    ///
    /// Only transient transport conditions qualify; auth rejections and
    /// missing resources never do.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CcoreError::Network { .. } | CcoreError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for CcoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return CcoreError::Network {
                message: format!("request timed out: {err}"),
                source: Some(Box::new(err)),
            };
        }
        if let Some(status) = err.status() {
            return status_to_error(status, err.to_string());
        }
        CcoreError::Network {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Map an HTTP status code onto the error taxonomy.
pub(crate) fn status_to_error(status: reqwest::StatusCode, message: String) -> CcoreError {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CcoreError::Auth { message },
        StatusCode::NOT_FOUND | StatusCode::GONE => CcoreError::NotFound { message },
        StatusCode::TOO_MANY_REQUESTS => CcoreError::RateLimited { message },
        s if s.is_server_error() => CcoreError::Network { message, source: None },
        _ => CcoreError::unsupported(message),
    }
}
