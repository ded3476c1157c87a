//! Read-only AQI endpoints under `/api/aqi`.
//!
//! Every handler is a thin translation from query parameters to one store
//! call. `city` defaults to the configured target city everywhere.

use axum::extract::{rejection::QueryRejection, Query, State};
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ok, params, AppState, Envelope};
use crate::error::{Error, Result};
use crate::models::Reading;
use crate::store::{AggregatedBucket, AqiStats, ComparisonStats, Granularity, Period};

// ---

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 1000;
const DEFAULT_STATS_HOURS: i64 = 24;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/aqi/latest", get(latest))
        .route("/api/aqi/stats", get(stats))
        .route("/api/aqi/range", get(range))
        .route("/api/aqi/current", get(current))
        .route("/api/aqi/indicator", get(indicator))
        .route("/api/aqi/history", get(history))
        .route("/api/aqi/comparison", get(comparison))
}

#[derive(Debug, Deserialize)]
struct CityQuery {
    city: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    city: Option<String>,
    limit: Option<i64>,
    hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    city: Option<String>,
    hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeQuery {
    city: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    city: Option<String>,
    period: Option<String>,
    granularity: Option<String>,
}

fn positive(name: &str, value: i64) -> Result<i64> {
    // ---
    if value > 0 {
        Ok(value)
    } else {
        Err(Error::BadRequest(format!("{name} must be a positive integer")))
    }
}

fn parse_instant(name: &str, value: Option<&str>) -> Result<DateTime<Utc>> {
    // ---
    let raw = value.ok_or_else(|| Error::BadRequest("startDate and endDate are required".into()))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::BadRequest(format!("{name} must be an RFC 3339 timestamp")))
}

/// `GET /api/aqi/latest?city&limit|hours`
async fn latest(
    State(state): State<AppState>,
    query: std::result::Result<Query<LatestQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<Reading>>>> {
    // ---
    let q = params(query)?;
    let city = state.city(q.city);

    let rows = match q.hours {
        Some(hours) => state.store.by_hours(&city, positive("hours", hours)?).await?,
        None => {
            let limit = positive("limit", q.limit.unwrap_or(DEFAULT_LIMIT))?.min(MAX_LIMIT);
            state.store.latest(&city, limit).await?
        }
    };
    debug!("latest: {} row(s) for {}", rows.len(), city);
    Ok(ok(rows))
}

/// `GET /api/aqi/stats?city&hours`
async fn stats(
    State(state): State<AppState>,
    query: std::result::Result<Query<StatsQuery>, QueryRejection>,
) -> Result<Json<Envelope<AqiStats>>> {
    // ---
    let q = params(query)?;
    let city = state.city(q.city);
    let hours = positive("hours", q.hours.unwrap_or(DEFAULT_STATS_HOURS))?;
    Ok(ok(state.store.average_stats(&city, hours).await?))
}

/// `GET /api/aqi/range?city&startDate&endDate`
async fn range(
    State(state): State<AppState>,
    query: std::result::Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<Reading>>>> {
    // ---
    let q = params(query)?;
    let start = parse_instant("startDate", q.start_date.as_deref())?;
    let end = parse_instant("endDate", q.end_date.as_deref())?;
    if start > end {
        return Err(Error::BadRequest("startDate must not be after endDate".into()));
    }
    let city = state.city(q.city);
    Ok(ok(state.store.by_date_range(&city, start, end).await?))
}

async fn newest(state: &AppState, city: &str) -> Result<Reading> {
    // ---
    state
        .store
        .latest(city, 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("No data available for {city}")))
}

/// `GET /api/aqi/current?city`: stored values, overrides never applied.
async fn current(
    State(state): State<AppState>,
    query: std::result::Result<Query<CityQuery>, QueryRejection>,
) -> Result<Json<Envelope<Reading>>> {
    // ---
    let q = params(query)?;
    let city = state.city(q.city);
    Ok(ok(newest(&state, &city).await?))
}

/// `GET /api/aqi/indicator`: configured city, overrides applied.
async fn indicator(State(state): State<AppState>) -> Result<Json<Envelope<Value>>> {
    // ---
    let reading = newest(&state, &state.default_city).await?;
    Ok(ok(state.overrides.apply(&reading)))
}

/// `GET /api/aqi/history?city&period&granularity`
async fn history(
    State(state): State<AppState>,
    query: std::result::Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<AggregatedBucket>>>> {
    // ---
    let q = params(query)?;
    let period: Period = q
        .period
        .as_deref()
        .unwrap_or("week")
        .parse()
        .map_err(Error::BadRequest)?;
    let granularity: Granularity = q
        .granularity
        .as_deref()
        .unwrap_or("day")
        .parse()
        .map_err(Error::BadRequest)?;
    let city = state.city(q.city);
    Ok(ok(state.store.aggregated(&city, period, granularity).await?))
}

/// `GET /api/aqi/comparison?city`
async fn comparison(
    State(state): State<AppState>,
    query: std::result::Result<Query<CityQuery>, QueryRejection>,
) -> Result<Json<Envelope<ComparisonStats>>> {
    // ---
    let q = params(query)?;
    let city = state.city(q.city);
    Ok(ok(state.store.comparison_stats(&city).await?))
}
