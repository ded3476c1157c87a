//! Router-level tests: the real HTTP surface over an in-memory SQLite store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use aqi_watch::auth::SharedSecretAuthenticator;
use aqi_watch::fanout::{Fanout, FanoutEvent};
use aqi_watch::overrides::OverrideState;
use aqi_watch::store::{SharedStore, SqliteStore};
use aqi_watch::{router, AppState, NewReading};

// ---

fn reading(ts: DateTime<Utc>, aqi: i32) -> NewReading {
    // ---
    NewReading {
        timestamp: ts,
        city: "Tashkent".to_string(),
        state: Some("Toshkent Shahri".to_string()),
        country: "Uzbekistan".to_string(),
        aqi_us: aqi,
        main_pollutant_us: Some("p2".to_string()),
        temperature_celsius: Some(21.5),
        humidity: Some(40),
        pressure_hpa: Some(1015),
        wind_speed_ms: Some(3.1),
        wind_direction: Some(270),
        pm25_concentration: Some(29.3),
        pm10_concentration: None,
        no2_concentration: None,
        so2_concentration: None,
        o3_concentration: None,
        co_concentration: None,
        latitude: Some(41.2995),
        longitude: Some(69.2401),
        raw_response: Some("{}".to_string()),
    }
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 26, h, m, 0).unwrap()
}

/// App with the Tashkent morning already stored: 40 @ 08:00, 70 @ 08:12,
/// 55 @ 08:24.
async fn app() -> Result<(Router, AppState)> {
    // ---
    let store: SharedStore = Arc::new(SqliteStore::in_memory().await?);
    for (m, aqi) in [(0, 40), (12, 70), (24, 55)] {
        store.upsert(&reading(at(8, m), aqi)).await?;
    }

    let state = AppState {
        store,
        overrides: Arc::new(OverrideState::new()),
        fanout: Fanout::new(8),
        auth: Arc::new(SharedSecretAuthenticator::new(
            "admin",
            "s3cret",
            Duration::from_secs(3600),
        )),
        default_city: "Tashkent".to_string(),
    };
    Ok((router(state.clone()), state))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    // ---
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn call(app: &Router, req: Request<Body>) -> Result<(StatusCode, Value)> {
    // ---
    let response = app.clone().oneshot(req).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

async fn login(app: &Router) -> Result<String> {
    // ---
    let (status, body) = call(
        app,
        json_request(
            Method::POST,
            "/admin/login",
            None,
            json!({ "username": "admin", "password": "s3cret" }),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["expires_in"], 3600);
    Ok(body["data"]["token"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn health_reports_ok() -> Result<()> {
    // ---
    let (app, _) = app().await?;
    let (status, body) = call(&app, get("/health")).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
    Ok(())
}

#[tokio::test]
async fn latest_is_newest_first() -> Result<()> {
    // ---
    let (app, _) = app().await?;
    let (status, body) = call(&app, get("/api/aqi/latest?limit=2")).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let aqis: Vec<i64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["aqi_us"].as_i64().unwrap())
        .collect();
    assert_eq!(aqis, vec![55, 70]);
    Ok(())
}

#[tokio::test]
async fn latest_rejects_bad_limit() -> Result<()> {
    // ---
    let (app, _) = app().await?;

    let (status, body) = call(&app, get("/api/aqi/latest?limit=0")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = call(&app, get("/api/aqi/latest?limit=lots")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn latest_by_hours_uses_trailing_window() -> Result<()> {
    // ---
    let (app, state) = app().await?;
    state
        .store
        .upsert(&reading(Utc::now() - chrono::Duration::minutes(30), 90))
        .await?;

    let (status, body) = call(&app, get("/api/aqi/latest?hours=1&limit=50")).await?;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["aqi_us"], 90);
    Ok(())
}

#[tokio::test]
async fn oversized_hours_is_400_not_a_crash() -> Result<()> {
    // ---
    let (app, _) = app().await?;

    for uri in [
        "/api/aqi/latest?hours=9223372036854775807",
        "/api/aqi/latest?hours=10000000000",
        "/api/aqi/stats?hours=9223372036854775807",
        "/api/aqi/stats?hours=10000000000",
    ] {
        let (status, body) = call(&app, get(uri)).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["success"], false, "{uri}");
    }
    Ok(())
}

#[tokio::test]
async fn stats_on_empty_window_has_zero_points() -> Result<()> {
    // ---
    let (app, _) = app().await?;
    let (status, body) = call(&app, get("/api/aqi/stats?hours=1")).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["data_points"], 0);
    assert!(body["data"]["avg_aqi"].is_null());
    Ok(())
}

#[tokio::test]
async fn range_is_inclusive_and_requires_both_bounds() -> Result<()> {
    // ---
    let (app, _) = app().await?;

    let (status, body) = call(
        &app,
        get("/api/aqi/range?startDate=2025-03-26T08:00:00Z&endDate=2025-03-26T08:12:00Z"),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = call(&app, get("/api/aqi/range?startDate=2025-03-26T08:00:00Z")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = call(
        &app,
        get("/api/aqi/range?startDate=yesterday&endDate=2025-03-26T08:12:00Z"),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn current_for_unknown_city_is_404() -> Result<()> {
    // ---
    let (app, _) = app().await?;
    let (status, body) = call(&app, get("/api/aqi/current?city=NoSuchCity")).await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("NoSuchCity"));
    assert!(body.get("data").is_none());
    Ok(())
}

#[tokio::test]
async fn history_defaults_and_validation() -> Result<()> {
    // ---
    let (app, _) = app().await?;

    let (status, body) = call(&app, get("/api/aqi/history")).await?;
    assert_eq!(status, StatusCode::OK);
    let buckets = body["data"].as_array().unwrap();
    // trailing week of daily buckets, both partial end days included
    assert_eq!(buckets.len(), 8);

    let (status, body) = call(&app, get("/api/aqi/history?period=decade")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, get("/api/aqi/history?granularity=minute")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn comparison_has_every_period() -> Result<()> {
    // ---
    let (app, _) = app().await?;
    let (status, body) = call(&app, get("/api/aqi/comparison")).await?;

    assert_eq!(status, StatusCode::OK);
    for key in ["today", "yesterday", "this_week", "last_week", "this_month", "last_month"] {
        assert!(body["data"].get(key).is_some(), "missing {key}");
    }
    Ok(())
}

#[tokio::test]
async fn admin_requires_valid_token() -> Result<()> {
    // ---
    let (app, _) = app().await?;

    let (status, body) = call(&app, get("/admin/settings")).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let req = Request::builder()
        .uri("/admin/settings")
        .header(header::AUTHORIZATION, "Bearer not-a-token")
        .body(Body::empty())?;
    let (status, _) = call(&app, req).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/admin/login",
            None,
            json!({ "username": "admin", "password": "wrong" }),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
    Ok(())
}

#[tokio::test]
async fn override_changes_indicator_but_not_current() -> Result<()> {
    // ---
    let (app, state) = app().await?;
    let token = login(&app).await?;
    let mut sub = state.fanout.subscribe();

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/admin/settings",
            Some(&token),
            json!({ "enabled": true, "aqi": 999 }),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "enabled": true, "aqi": 999 }));

    // the edit is pushed to live subscribers with overrides applied
    match sub.recv().await {
        Some(FanoutEvent::Update(v)) => assert_eq!(v["aqi_us"], 999),
        other => panic!("expected update, got {other:?}"),
    }

    let (_, indicator) = call(&app, get("/api/aqi/indicator")).await?;
    assert_eq!(indicator["data"]["aqi_us"], 999);
    assert_eq!(indicator["data"]["temperature_celsius"], 21.5);

    let (_, current) = call(&app, get("/api/aqi/current")).await?;
    assert_eq!(current["data"]["aqi_us"], 55);

    let (_, settings) = call(
        &app,
        Request::builder()
            .uri("/admin/settings")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(settings["data"]["enabled"], true);
    Ok(())
}

#[tokio::test]
async fn delete_clears_overrides_and_publishes_stored_value() -> Result<()> {
    // ---
    let (app, state) = app().await?;
    let token = login(&app).await?;

    call(
        &app,
        json_request(
            Method::POST,
            "/admin/settings",
            Some(&token),
            json!({ "enabled": true, "aqi": "N/A" }),
        ),
    )
    .await?;
    let (_, indicator) = call(&app, get("/api/aqi/indicator")).await?;
    assert_eq!(indicator["data"]["aqi_us"], "N/A");

    let mut sub = state.fanout.subscribe();
    let req = Request::builder()
        .method(Method::DELETE)
        .uri("/admin/settings")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?;
    let (status, body) = call(&app, req).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "enabled": false }));

    match sub.recv().await {
        Some(FanoutEvent::Update(v)) => assert_eq!(v["aqi_us"], 55),
        other => panic!("expected update, got {other:?}"),
    }

    let (_, indicator) = call(&app, get("/api/aqi/indicator")).await?;
    assert_eq!(indicator["data"]["aqi_us"], 55);
    Ok(())
}

#[tokio::test]
async fn malformed_settings_body_is_400() -> Result<()> {
    // ---
    let (app, _) = app().await?;
    let token = login(&app).await?;

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            "/admin/settings",
            Some(&token),
            json!({ "enabled": "sometimes" }),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    Ok(())
}

/// Read body frames until one contains `needle`.
async fn frame_containing<S>(stream: &mut S, needle: &str) -> String
where
    S: futures::Stream<Item = Result<axum::body::Bytes, axum::Error>> + Unpin,
{
    // ---
    let mut seen = String::new();
    while !seen.contains(needle) {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for SSE frame")
            .expect("stream ended")
            .expect("body error");
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }
    seen
}

#[tokio::test]
async fn stream_delivers_events_and_deregisters_on_close() -> Result<()> {
    // ---
    let (app, state) = app().await?;
    let response = app.clone().oneshot(get("/api/aqi/stream")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let mut body = response.into_body().into_data_stream();
    frame_containing(&mut body, "event: connected").await;
    assert_eq!(state.fanout.subscriber_count(), 1);

    state
        .fanout
        .publish(FanoutEvent::update(json!({ "aqi_us": 61, "raw_response": "{}" })));
    let frame = frame_containing(&mut body, "event: update").await;
    assert!(frame.contains("\"aqi_us\":61"));
    assert!(!frame.contains("raw_response"));

    drop(body);
    assert_eq!(state.fanout.subscriber_count(), 0);
    Ok(())
}
