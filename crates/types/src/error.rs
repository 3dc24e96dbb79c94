//! Unified error type for the protogate workspace.

use std::fmt;
use thiserror::Error;

/// Boxed cause carried by a [`TranslateError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Category of a [`TranslateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No converter is registered for the `(source, target)` pair.
    UnsupportedPair,
    /// The pair is registered but cannot answer in the requested mode
    /// (streaming or non-streaming).
    ModeUnsupported,
    /// The client request could not be expressed in the backend format.
    RequestConversion,
    /// The backend call failed or returned a non-success status.
    BackendTransport,
    /// A backend response or stream event could not be converted.
    ResponseConversion,
    /// The caller abandoned the request.
    StreamCancelled,
    /// Prompt token estimation failed.
    TokenCount,
    /// Startup registration problem (duplicates, empty bundles).
    Registry,
}

impl ErrorKind {
    /// Stable `snake_case` name, used as an error code in client envelopes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedPair => "unsupported_pair",
            Self::ModeUnsupported => "mode_unsupported",
            Self::RequestConversion => "request_conversion",
            Self::BackendTransport => "backend_transport",
            Self::ResponseConversion => "response_conversion",
            Self::StreamCancelled => "stream_cancelled",
            Self::TokenCount => "token_count",
            Self::Registry => "registry",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised anywhere along the translation path.
///
/// Carries a [`ErrorKind`] tag, a human-readable message, the upstream HTTP
/// status when one exists, and the underlying cause.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TranslateError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    #[source]
    source: Option<BoxError>,
}

impl TranslateError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            source: None,
        }
    }

    pub fn unsupported_pair(source: impl fmt::Display, target: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::UnsupportedPair,
            format!("no converter registered for {source} -> {target}"),
        )
    }

    pub fn mode_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModeUnsupported, message)
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RequestConversion, message)
    }

    pub fn response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResponseConversion, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendTransport, message)
    }

    /// The backend answered with a non-success HTTP status.
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::BackendTransport,
            message: body.into(),
            status: Some(status),
            source: None,
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::StreamCancelled, "request cancelled by client")
    }

    pub fn token_count(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TokenCount, message)
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Registry, message)
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Re-tags the error, keeping message, status and cause.
    #[must_use]
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Upstream HTTP status, if the backend produced one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// HTTP status code this error should be reported with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.kind {
            ErrorKind::UnsupportedPair
            | ErrorKind::ModeUnsupported
            | ErrorKind::RequestConversion => 400,
            ErrorKind::BackendTransport => match self.status {
                Some(s @ 400..=499) => s,
                _ => 502,
            },
            ErrorKind::ResponseConversion => 502,
            ErrorKind::StreamCancelled => 499,
            ErrorKind::TokenCount | ErrorKind::Registry => 500,
        }
    }

}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TranslateError>;
