//! Status-bar client for `aqi-watch`.
//!
//! Polls `/api/aqi/indicator` and prints one status line per poll to stdout,
//! suitable for a status bar that reads the last line. Band changes are
//! logged; moving to a worse band also rings the terminal bell. Logs go to
//! stderr.
//!
//! # Environment Variables
//! - `INDICATOR_URL` (optional) – service base URL (default: `http://localhost:3000`)
//! - `INDICATOR_INTERVAL_SECS` (optional) – poll period (default: 60)
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `info`)
use std::{env, io::Write, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::filter::EnvFilter;

use aqi_watch::indicator::{render, IndicatorPayload, IndicatorState};

// ---

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    data: Option<IndicatorPayload>,
    error: Option<String>,
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<IndicatorPayload> {
    // ---
    let envelope: Envelope = client
        .get(url)
        .send()
        .await
        .context("request failed")?
        .json()
        .await
        .context("unexpected response body")?;

    match envelope {
        Envelope {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        Envelope { error, .. } => Err(anyhow!(error.unwrap_or_else(|| "no data".into()))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenvy::dotenv().ok();
    init_tracing();

    let base = env::var("INDICATOR_URL").unwrap_or_else(|_| "http://localhost:3000".into());
    let secs: u64 = match env::var("INDICATOR_INTERVAL_SECS") {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow!("INDICATOR_INTERVAL_SECS must be a positive integer, got {v}"))?,
        Err(_) => 60,
    };
    let url = format!("{}/api/aqi/indicator", base.trim_end_matches('/'));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let mut state = IndicatorState::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("Polling {} every {}s", url, secs.max(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let line = match fetch(&client, &url).await {
            Ok(payload) => match payload.aqi() {
                Some(aqi) => {
                    let obs = state.observe(aqi);
                    if let Some(alert) = obs.alert {
                        if alert.is_worse() {
                            tracing::warn!("{}", alert);
                            print!("\x07");
                        } else {
                            tracing::info!("{}", alert);
                        }
                    }
                    render(&payload, Some(&obs))
                }
                // Overridden to a display string: show it, leave the trend alone.
                None => render(&payload, None),
            },
            Err(e) => {
                tracing::error!("Failed to fetch indicator: {:#}", e);
                "AQI: ⚠".to_string()
            }
        };

        println!("{line}");
        std::io::stdout().flush().ok();
    }

    Ok(())
}

fn init_tracing() {
    // ---
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = env::var("AXUM_LOG_LEVEL").unwrap_or_else(|_| "info".into());
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(env_filter)
        .compact()
        .init();
}
