//! PostgreSQL backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{AqiSample, AqiStats, ReadingStore};
use crate::config::mask_db_url;
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
    ) VALUES (
        $1, $2, $3, $4,
        $5, $6,
        $7, $8, $9,
        $10, $11,
        $12, $13,
        $14, $15,
        $16, $17,
        $18, $19,
        $20
    )
    ON CONFLICT (timestamp, city) DO UPDATE SET
        state               = COALESCE(EXCLUDED.state, air_quality_data.state),
        country             = EXCLUDED.country,
        aqi_us              = EXCLUDED.aqi_us,
        main_pollutant_us   = COALESCE(EXCLUDED.main_pollutant_us, air_quality_data.main_pollutant_us),
        temperature_celsius = COALESCE(EXCLUDED.temperature_celsius, air_quality_data.temperature_celsius),
        humidity            = COALESCE(EXCLUDED.humidity, air_quality_data.humidity),
        pressure_hpa        = COALESCE(EXCLUDED.pressure_hpa, air_quality_data.pressure_hpa),
        wind_speed_ms       = COALESCE(EXCLUDED.wind_speed_ms, air_quality_data.wind_speed_ms),
        wind_direction      = COALESCE(EXCLUDED.wind_direction, air_quality_data.wind_direction),
        pm25_concentration  = COALESCE(EXCLUDED.pm25_concentration, air_quality_data.pm25_concentration),
        pm10_concentration  = COALESCE(EXCLUDED.pm10_concentration, air_quality_data.pm10_concentration),
        no2_concentration   = COALESCE(EXCLUDED.no2_concentration, air_quality_data.no2_concentration),
        so2_concentration   = COALESCE(EXCLUDED.so2_concentration, air_quality_data.so2_concentration),
        o3_concentration    = COALESCE(EXCLUDED.o3_concentration, air_quality_data.o3_concentration),
        co_concentration    = COALESCE(EXCLUDED.co_concentration, air_quality_data.co_concentration),
        latitude            = COALESCE(EXCLUDED.latitude, air_quality_data.latitude),
        longitude           = COALESCE(EXCLUDED.longitude, air_quality_data.longitude),
        raw_response        = COALESCE(EXCLUDED.raw_response, air_quality_data.raw_response)
    RETURNING *
"#;

/// Readings stored in PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool. The schema is assumed to exist.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str, pool_max: u32) -> anyhow::Result<Self> {
        // ---
        tracing::info!("Attempting to connect to database: {}", mask_db_url(db_url));

        let pool = PgPoolOptions::new()
            .max_connections(pool_max)
            .connect(db_url)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to connect to database '{}': {}",
                    mask_db_url(db_url),
                    e
                )
            })?;

        tracing::info!("Successfully connected to database");

        schema::create_pg_schema(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ReadingStore for PgStore {
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
            WHERE city = $1
            ORDER BY timestamp DESC
            LIMIT $2
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
            WHERE city = $1
              AND timestamp BETWEEN $2 AND $3
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
                AVG(aqi_us)::DOUBLE PRECISION AS avg_aqi,
                MAX(aqi_us)                   AS max_aqi,
                MIN(aqi_us)                   AS min_aqi,
                COUNT(*)                      AS data_points
            FROM air_quality_data
            WHERE city = $1
              AND timestamp BETWEEN $2 AND $3
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
            WHERE city = $1
              AND timestamp BETWEEN $2 AND $3
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
