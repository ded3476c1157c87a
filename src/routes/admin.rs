//! Admin endpoints: login and override settings.
//!
//! Everything under `/admin/settings` requires `Authorization: Bearer
//! <token>`, checked by the [`AdminSession`] extractor before the handler
//! runs. Override edits are pushed to live subscribers right away so an open
//! dashboard reflects them without waiting for the next fetch.

use axum::extract::{rejection::JsonRejection, FromRequestParts, State};
use axum::http::{header::AUTHORIZATION, request::Parts};
use axum::{routing::get, routing::post, Json, Router};
use serde::Deserialize;
use tracing::{info, warn};

use super::{ok, AppState, Envelope};
use crate::auth::IssuedToken;
use crate::error::{Error, Result};
use crate::fanout::FanoutEvent;
use crate::overrides::{OverridePatch, OverrideSettings};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/admin/login", post(login)).route(
        "/admin/settings",
        get(get_settings).post(update_settings).delete(clear_settings),
    )
}

/// Proof that the request carried a valid admin bearer token.
pub struct AdminSession;

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // ---
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(Error::Unauthorized)?;

        state.auth.verify(token)?;
        Ok(AdminSession)
    }
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    // ---
    payload
        .map(|Json(v)| v)
        .map_err(|e| Error::BadRequest(e.body_text()))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// `POST /admin/login`
async fn login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Envelope<IssuedToken>>> {
    // ---
    let req = body(payload)?;
    Ok(ok(state.auth.login(&req.username, &req.password)?))
}

/// `GET /admin/settings`
async fn get_settings(
    _: AdminSession,
    State(state): State<AppState>,
) -> Json<Envelope<OverrideSettings>> {
    ok(state.overrides.get())
}

/// `POST /admin/settings`: merge the patch, then push the overridden view.
async fn update_settings(
    _: AdminSession,
    State(state): State<AppState>,
    payload: std::result::Result<Json<OverridePatch>, JsonRejection>,
) -> Result<Json<Envelope<OverrideSettings>>> {
    // ---
    let patch = body(payload)?;
    let settings = state.overrides.set(patch);
    info!(enabled = settings.enabled, "Override settings updated");

    publish_latest(&state, true).await;
    Ok(ok(settings))
}

/// `DELETE /admin/settings`: clear, then push the stored view.
async fn clear_settings(
    _: AdminSession,
    State(state): State<AppState>,
) -> Json<Envelope<OverrideSettings>> {
    // ---
    state.overrides.clear();
    info!("Override settings cleared");

    publish_latest(&state, false).await;
    ok(state.overrides.get())
}

/// Send the newest reading for the default city to subscribers.
///
/// Best effort: the settings change has already happened, so a missing
/// reading or a store error only skips the push.
async fn publish_latest(state: &AppState, with_overrides: bool) {
    // ---
    let latest = match state.store.latest(&state.default_city, 1).await {
        Ok(rows) => rows.into_iter().next(),
        Err(e) => {
            warn!("Could not load latest reading to publish: {}", e);
            return;
        }
    };
    let Some(reading) = latest else {
        return;
    };

    let payload = if with_overrides {
        state.overrides.apply(&reading)
    } else {
        serde_json::to_value(&reading).unwrap_or_default()
    };
    state.fanout.publish(FanoutEvent::update(payload));
}
