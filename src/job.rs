//! Fetch-and-persist job and the scheduler that drives it.
//!
//! One run: fetch from the source, map to a row, upsert, then publish the
//! stored row to live subscribers. Failures are logged and swallowed here and
//! nowhere else; the next tick is the retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::Location;
use crate::error::Result;
use crate::fanout::{Fanout, FanoutEvent};
use crate::models::{tick_timestamp, Reading};
use crate::source::AirQualitySource;
use crate::store::SharedStore;

// ---

pub struct FetchJob {
    source: Arc<dyn AirQualitySource>,
    store: SharedStore,
    fanout: Fanout,
    location: Location,
    tick_secs: u64,
}

impl FetchJob {
    pub fn new(
        source: Arc<dyn AirQualitySource>,
        store: SharedStore,
        fanout: Fanout,
        location: Location,
        tick_secs: u64,
    ) -> Self {
        // ---
        Self {
            source,
            store,
            fanout,
            location,
            tick_secs,
        }
    }

    /// Run one fetch. Never fails; returns the stored row on success.
    pub async fn run_once(&self) -> Option<Reading> {
        // ---
        info!("Starting air quality data fetch for {}", self.location.city);

        match self.try_run().await {
            Ok(reading) => {
                info!(
                    "AQI: {}, Temp: {}°C, PM2.5: {}",
                    reading.aqi_us,
                    reading
                        .temperature_celsius
                        .map_or("N/A".to_string(), |t| t.to_string()),
                    reading
                        .pm25_concentration
                        .map_or("N/A".to_string(), |c| c.to_string()),
                );
                Some(reading)
            }
            Err(e) => {
                error!("Error fetching air quality data: {}", e);
                None
            }
        }
    }

    async fn try_run(&self) -> Result<Reading> {
        // ---
        debug!("fetch - Step 1: source");
        let response = self.source.fetch_current(&self.location).await?;

        debug!("fetch - Step 2: store");
        let captured_at = tick_timestamp(Utc::now(), self.tick_secs);
        let stored = self
            .store
            .upsert(&response.to_new_reading(captured_at))
            .await?;

        // Published only after the upsert has committed.
        debug!("fetch - Step 3: publish");
        let delivered = self
            .fanout
            .publish(FanoutEvent::update(serde_json::to_value(&stored).unwrap_or_default()));
        debug!("Update delivered to {} subscriber(s)", delivered);

        Ok(stored)
    }

    /// Run now, then every `tick_secs`, until `shutdown` flips to `true`.
    ///
    /// Runs are awaited inside the loop, so two never overlap; ticks missed
    /// while a slow run was in flight are skipped rather than bunched up.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        // ---
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(self.tick_secs.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Scheduling fetch every {} seconds", self.tick_secs);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    _ = shutdown.changed() => {
                        info!("Scheduler stopped");
                        break;
                    }
                }
            }
        })
    }
}
