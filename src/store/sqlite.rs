//! SQLite backend, for single-file deployments and tests.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{AqiSample, AqiStats, ReadingStore};
use crate::error::Result;
use crate::models::{NewReading, Reading};
use crate::schema;

// ---

const UPSERT: &str = r#"
    INSERT INTO air_quality_data (
        timestamp, city, state, country,
        aqi_us, main_pollutant_us,
        temperature_celsius, humidity, pressure_hpa,
        wind_speed_ms, wind_direction,
        pm25_concentration, pm10_concentration,
        no2_concentration, so2_concentration,
        o3_concentration, co_concentration,
        latitude, longitude,
        raw_response
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (timestamp, city) DO UPDATE SET
        state               = COALESCE(excluded.state, state),
        country             = excluded.country,
        aqi_us              = excluded.aqi_us,
        main_pollutant_us   = COALESCE(excluded.main_pollutant_us, main_pollutant_us),
        temperature_celsius = COALESCE(excluded.temperature_celsius, temperature_celsius),
        humidity            = COALESCE(excluded.humidity, humidity),
        pressure_hpa        = COALESCE(excluded.pressure_hpa, pressure_hpa),
        wind_speed_ms       = COALESCE(excluded.wind_speed_ms, wind_speed_ms),
        wind_direction      = COALESCE(excluded.wind_direction, wind_direction),
        pm25_concentration  = COALESCE(excluded.pm25_concentration, pm25_concentration),
        pm10_concentration  = COALESCE(excluded.pm10_concentration, pm10_concentration),
        no2_concentration   = COALESCE(excluded.no2_concentration, no2_concentration),
        so2_concentration   = COALESCE(excluded.so2_concentration, so2_concentration),
        o3_concentration    = COALESCE(excluded.o3_concentration, o3_concentration),
        co_concentration    = COALESCE(excluded.co_concentration, co_concentration),
        latitude            = COALESCE(excluded.latitude, latitude),
        longitude           = COALESCE(excluded.longitude, longitude),
        raw_response        = COALESCE(excluded.raw_response, raw_response)
    RETURNING *
"#;

/// Readings stored in a SQLite file (or in memory).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. The schema is assumed to exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str, pool_max: u32) -> anyhow::Result<Self> {
        // ---
        tracing::info!("Opening SQLite database: {}", db_url);

        let in_memory = db_url.contains(":memory:") || db_url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(|e| anyhow::anyhow!("Invalid SQLite URL '{}': {}", db_url, e))?
            .create_if_missing(true);

        // Every connection to `:memory:` is a separate database, so keep exactly
        // one connection alive for the life of the pool.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(pool_max)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        schema::create_sqlite_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Fresh, empty, private database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    // ---
    async fn upsert(&self, r: &NewReading) -> Result<Reading> {
        // ---
        let row = sqlx::query_as::<_, Reading>(UPSERT)
            .bind(r.timestamp)
            .bind(&r.city)
            .bind(&r.state)
            .bind(&r.country)
            .bind(r.aqi_us)
            .bind(&r.main_pollutant_us)
            .bind(r.temperature_celsius)
            .bind(r.humidity)
            .bind(r.pressure_hpa)
            .bind(r.wind_speed_ms)
            .bind(r.wind_direction)
            .bind(r.pm25_concentration)
            .bind(r.pm10_concentration)
            .bind(r.no2_concentration)
            .bind(r.so2_concentration)
            .bind(r.o3_concentration)
            .bind(r.co_concentration)
            .bind(r.latitude)
            .bind(r.longitude)
            .bind(&r.raw_response)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn latest(&self, city: &str, limit: i64) -> Result<Vec<Reading>> {
        // ---
        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT * FROM air_quality_data
            WHERE city = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(city)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn by_date_range(
        &self,
        city: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        // ---
        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT * FROM air_quality_data
            WHERE city = ?
              AND timestamp BETWEEN ? AND ?
            ORDER BY timestamp DESC
            "#,
        )
        .bind(city)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn stats_between(
        &self,
        city: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AqiStats> {
        // ---
        let stats = sqlx::query_as::<_, AqiStats>(
            r#"
            SELECT
                AVG(aqi_us) AS avg_aqi,
                MAX(aqi_us) AS max_aqi,
                MIN(aqi_us) AS min_aqi,
                COUNT(*)    AS data_points
            FROM air_quality_data
            WHERE city = ?
              AND timestamp BETWEEN ? AND ?
            "#,
        )
        .bind(city)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn samples_between(
        &self,
        city: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AqiSample>> {
        // ---
        let rows = sqlx::query_as::<_, AqiSample>(
            r#"
            SELECT timestamp, aqi_us, temperature_celsius, humidity
            FROM air_quality_data
            WHERE city = ?
              AND timestamp BETWEEN ? AND ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(city)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
