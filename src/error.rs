//! Typed errors for the `aqi-watch` service.
//!
//! Internal components fail with [`Error`]; the HTTP boundary (`routes`) is the
//! only place these become status codes, and the scheduled job is the only
//! place they are swallowed.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::routes::Envelope;

// ---

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ---
    /// Upstream fetch failed, timed out, or returned a malformed payload.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A read or write against the store failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// No reading exists yet for the queried city.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or invalid admin credential.
    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        // ---
        match self {
            Error::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();

        // Store and source details go to the log, never to the client.
        let message = match &self {
            Error::StoreUnavailable(e) => {
                tracing::error!("store error: {}", e);
                "Failed to fetch data".to_string()
            }
            Error::SourceUnavailable(e) => {
                tracing::error!("source error: {}", e);
                "Upstream source unavailable".to_string()
            }
            Error::NotFound(msg) | Error::BadRequest(msg) => msg.clone(),
            Error::Unauthorized => "Unauthorized".to_string(),
        };

        let mut response = (status, Json(Envelope::<()>::failure(message))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer realm=\"admin\""),
            );
        }
        response
    }
}
