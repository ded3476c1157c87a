//! Routes gateway.
//!
//! Sibling modules each export a subrouter over [`AppState`]; this module
//! merges them, attaches the shared layers, and owns the response envelope
//! every JSON endpoint uses. `main.rs` only ever calls [`router`].

use std::sync::Arc;

use axum::extract::{rejection::QueryRejection, Query};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::Authenticator;
use crate::error::{Error, Result};
use crate::fanout::Fanout;
use crate::overrides::OverrideState;
use crate::store::SharedStore;

mod admin;
mod aqi;
mod health;
mod stream;

// ---

/// Everything a handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub overrides: Arc<OverrideState>,
    pub fanout: Fanout,
    pub auth: Arc<dyn Authenticator>,
    /// City used when a request does not name one.
    pub default_city: String,
}

impl AppState {
    pub(crate) fn city(&self, requested: Option<String>) -> String {
        // ---
        requested
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| self.default_city.clone())
    }
}

/// `{success, data?, error?}` wrapper for every JSON body.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Successful JSON response.
pub(crate) fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope::success(data))
}

/// Unwrap query parameters, turning axum's plain-text rejection into an
/// enveloped 400.
pub(crate) fn params<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    // ---
    query
        .map(|Query(q)| q)
        .map_err(|e| Error::BadRequest(e.body_text()))
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(health::router())
        .merge(aqi::router())
        .merge(stream::router())
        .merge(admin::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
