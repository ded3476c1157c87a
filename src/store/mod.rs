//! Aggregate store: the append-only history of readings.
//!
//! Backends implement a handful of primitive queries; trailing windows,
//! bucketing and period comparisons are derived from them here so every
//! backend shares the same calendar rules (see [`calendar`]).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{NewReading, Reading};

pub mod calendar;
mod postgres;
mod sqlite;

pub use calendar::{Granularity, Period};
pub use postgres::PgStore;
pub use sqlite::SqliteStore;

// ---

/// Rolling AQI statistics over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct AqiStats {
    pub avg_aqi: Option<f64>,
    pub max_aqi: Option<i32>,
    pub min_aqi: Option<i32>,
    pub data_points: i64,
}

/// The columns bucketing needs; avoids dragging `raw_response` around.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AqiSample {
    pub timestamp: DateTime<Utc>,
    pub aqi_us: i32,
    pub temperature_celsius: Option<f64>,
    pub humidity: Option<i32>,
}

/// One time bucket of a history query. Averages are rounded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedBucket {
    pub time_bucket: DateTime<Utc>,
    pub avg_aqi: Option<i64>,
    pub max_aqi: Option<i32>,
    pub min_aqi: Option<i32>,
    pub avg_temp: Option<i64>,
    pub avg_humidity: Option<i64>,
    pub data_points: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodStats {
    pub avg_aqi: Option<i64>,
    pub max_aqi: Option<i32>,
    pub min_aqi: Option<i32>,
}

impl From<AqiStats> for PeriodStats {
    fn from(s: AqiStats) -> Self {
        PeriodStats {
            avg_aqi: s.avg_aqi.map(|v| v.round() as i64),
            max_aqi: s.max_aqi,
            min_aqi: s.min_aqi,
        }
    }
}

/// Calendar comparison, serialized as a map keyed by period name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonStats {
    pub today: PeriodStats,
    pub yesterday: PeriodStats,
    pub this_week: PeriodStats,
    pub last_week: PeriodStats,
    pub this_month: PeriodStats,
    pub last_month: PeriodStats,
}

impl ComparisonStats {
    fn slot(&mut self, name: &str) -> Option<&mut PeriodStats> {
        // ---
        match name {
            "today" => Some(&mut self.today),
            "yesterday" => Some(&mut self.yesterday),
            "this_week" => Some(&mut self.this_week),
            "last_week" => Some(&mut self.last_week),
            "this_month" => Some(&mut self.this_month),
            "last_month" => Some(&mut self.last_month),
            _ => None,
        }
    }
}

/// Persistent history of readings keyed by (timestamp, city).
///
/// Every failure surfaces as [`crate::Error::StoreUnavailable`]; nothing in
/// this layer retries.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    // ---
    /// Insert, or merge into the row with the same (timestamp, city). Incoming
    /// non-null fields win; the merged row is returned. Single statement.
    async fn upsert(&self, reading: &NewReading) -> Result<Reading>;

    /// Newest `limit` rows, descending by timestamp.
    async fn latest(&self, city: &str, limit: i64) -> Result<Vec<Reading>>;

    /// Rows with `start <= timestamp <= end`, descending.
    async fn by_date_range(
        &self,
        city: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>>;

    /// AQI statistics for rows with `start <= timestamp <= end`.
    async fn stats_between(
        &self,
        city: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AqiStats>;

    /// Bucketing columns for rows with `start <= timestamp <= end`, ascending.
    async fn samples_between(
        &self,
        city: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AqiSample>>;

    /// Cheap round trip used at startup.
    async fn ping(&self) -> Result<()>;

    async fn close(&self);

    async fn by_hours(&self, city: &str, hours: i64) -> Result<Vec<Reading>> {
        // ---
        let (start, now) = trailing_hours(Utc::now(), hours)?;
        self.by_date_range(city, start, now).await
    }

    async fn average_stats(&self, city: &str, hours: i64) -> Result<AqiStats> {
        // ---
        let (start, now) = trailing_hours(Utc::now(), hours)?;
        self.stats_between(city, start, now).await
    }

    async fn aggregated(
        &self,
        city: &str,
        period: Period,
        granularity: Granularity,
    ) -> Result<Vec<AggregatedBucket>> {
        self.aggregated_at(city, period, granularity, Utc::now())
            .await
    }

    /// [`ReadingStore::aggregated`] evaluated as of `now`.
    async fn aggregated_at(
        &self,
        city: &str,
        period: Period,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> Result<Vec<AggregatedBucket>> {
        // ---
        let from = now - period.duration();
        let samples = self.samples_between(city, from, now).await?;
        Ok(bucketize(&samples, from, now, granularity))
    }

    async fn comparison_stats(&self, city: &str) -> Result<ComparisonStats> {
        self.comparison_stats_at(city, Utc::now()).await
    }

    /// [`ReadingStore::comparison_stats`] evaluated as of `now`.
    async fn comparison_stats_at(
        &self,
        city: &str,
        now: DateTime<Utc>,
    ) -> Result<ComparisonStats> {
        // ---
        let mut out = ComparisonStats::default();
        for period in calendar::comparison_periods(now) {
            let stats = self.stats_between(city, period.start, period.end).await?;
            if let Some(slot) = out.slot(period.name) {
                *slot = stats.into();
            }
        }
        Ok(out)
    }
}

/// `[now - hours, now]`, or `BadRequest` when the window does not fit in a
/// `DateTime`.
pub fn trailing_hours(now: DateTime<Utc>, hours: i64) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    // ---
    Duration::try_hours(hours)
        .and_then(|span| now.checked_sub_signed(span))
        .map(|start| (start, now))
        .ok_or_else(|| Error::BadRequest(format!("hours out of range: {hours}")))
}

/// Shared handle used by the job and the HTTP layer.
pub type SharedStore = Arc<dyn ReadingStore>;

/// Open the backend named by `db_url` and make sure the schema exists.
///
/// `sqlite:` URLs select [`SqliteStore`]; everything else is handed to
/// PostgreSQL.
pub async fn connect(db_url: &str, pool_max: u32) -> anyhow::Result<SharedStore> {
    // ---
    if db_url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteStore::connect(db_url, pool_max).await?))
    } else {
        Ok(Arc::new(PgStore::connect(db_url, pool_max).await?))
    }
}

#[derive(Default)]
struct Accumulator {
    aqi_sum: i64,
    aqi_max: Option<i32>,
    aqi_min: Option<i32>,
    temp_sum: f64,
    temp_n: u32,
    humidity_sum: i64,
    humidity_n: u32,
    n: i64,
}

/// Group `samples` into contiguous buckets covering `[from, to]`.
///
/// Empty buckets are kept (with `data_points = 0`) so the series has no gaps.
pub fn bucketize(
    samples: &[AqiSample],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    granularity: Granularity,
) -> Vec<AggregatedBucket> {
    // ---
    let starts = calendar::bucket_starts(from, to, granularity);
    let mut acc: Vec<Accumulator> = starts.iter().map(|_| Accumulator::default()).collect();

    for s in samples {
        let bucket = granularity.truncate(s.timestamp);
        let Ok(idx) = starts.binary_search(&bucket) else {
            continue;
        };
        let a = &mut acc[idx];
        a.n += 1;
        a.aqi_sum += s.aqi_us as i64;
        a.aqi_max = Some(a.aqi_max.map_or(s.aqi_us, |m| m.max(s.aqi_us)));
        a.aqi_min = Some(a.aqi_min.map_or(s.aqi_us, |m| m.min(s.aqi_us)));
        if let Some(t) = s.temperature_celsius {
            a.temp_sum += t;
            a.temp_n += 1;
        }
        if let Some(h) = s.humidity {
            a.humidity_sum += h as i64;
            a.humidity_n += 1;
        }
    }

    starts
        .into_iter()
        .zip(acc)
        .map(|(time_bucket, a)| AggregatedBucket {
            time_bucket,
            avg_aqi: (a.n > 0).then(|| (a.aqi_sum as f64 / a.n as f64).round() as i64),
            max_aqi: a.aqi_max,
            min_aqi: a.aqi_min,
            avg_temp: (a.temp_n > 0).then(|| (a.temp_sum / a.temp_n as f64).round() as i64),
            avg_humidity: (a.humidity_n > 0)
                .then(|| (a.humidity_sum as f64 / a.humidity_n as f64).round() as i64),
            data_points: a.n,
        })
        .collect()
}
