//! API error type that renders a [`DispatchError`] as an HTTP response.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use protogate_engine::{DispatchError, Registry};
use protogate_types::{ProtocolFormat, TranslateError};

/// Wrapper around [`DispatchError`] that implements [`IntoResponse`].
///
/// The body is already shaped by the client format's error envelope.
#[derive(Debug)]
pub struct ApiError(pub DispatchError);

impl ApiError {
    /// Renders an error raised before dispatch in `client`'s error schema.
    #[must_use]
    pub fn reject(registry: &Registry, client: &ProtocolFormat, error: TranslateError) -> Self {
        tracing::warn!(%client, kind = %error.kind(), error = %error, "request rejected");
        let body = registry.envelope(client).body(&error);
        Self(DispatchError {
            status: error.http_status(),
            body,
            error,
        })
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.0.body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        Self(e)
    }
}
