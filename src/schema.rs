//! Database schema management for `aqi-watch`.
//!
//! Ensures the readings table and its indexes exist before serving requests.
//! Applied once when a store is opened. Each backend gets its own dialect but
//! the same shape: one table, `UNIQUE (timestamp, city)`, and indexes for
//! descending time scans and city/AQI filters.

use anyhow::Result;
use sqlx::{PgPool, SqlitePool};

// ---

/// Create the PostgreSQL schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
/// Errors are propagated if any SQL execution fails.
pub async fn create_pg_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS air_quality_data (
            id                  BIGSERIAL PRIMARY KEY,
            timestamp           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            city                TEXT        NOT NULL,
            state               TEXT,
            country             TEXT        NOT NULL,
            aqi_us              INTEGER     NOT NULL,
            main_pollutant_us   TEXT,
            temperature_celsius DOUBLE PRECISION,
            humidity            INTEGER,
            pressure_hpa        INTEGER,
            wind_speed_ms       DOUBLE PRECISION,
            wind_direction      INTEGER,
            pm25_concentration  DOUBLE PRECISION,
            pm10_concentration  DOUBLE PRECISION,
            no2_concentration   DOUBLE PRECISION,
            so2_concentration   DOUBLE PRECISION,
            o3_concentration    DOUBLE PRECISION,
            co_concentration    DOUBLE PRECISION,
            latitude            DOUBLE PRECISION,
            longitude           DOUBLE PRECISION,
            raw_response        TEXT,
            UNIQUE (timestamp, city)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    for ddl in INDEXES {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Create the SQLite schema (idempotent).
///
/// Timestamps are stored as RFC 3339 text with a fixed `+00:00` offset, which
/// keeps lexical and chronological order identical.
pub async fn create_sqlite_schema(pool: &SqlitePool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS air_quality_data (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp           TEXT    NOT NULL,
            city                TEXT    NOT NULL,
            state               TEXT,
            country             TEXT    NOT NULL,
            aqi_us              INTEGER NOT NULL,
            main_pollutant_us   TEXT,
            temperature_celsius REAL,
            humidity            INTEGER,
            pressure_hpa        INTEGER,
            wind_speed_ms       REAL,
            wind_direction      INTEGER,
            pm25_concentration  REAL,
            pm10_concentration  REAL,
            no2_concentration   REAL,
            so2_concentration   REAL,
            o3_concentration    REAL,
            co_concentration    REAL,
            latitude            REAL,
            longitude           REAL,
            raw_response        TEXT,
            UNIQUE (timestamp, city)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    for ddl in INDEXES {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Index DDL valid in both dialects.
const INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS idx_aqd_timestamp ON air_quality_data (timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_aqd_city ON air_quality_data (city)",
    "CREATE INDEX IF NOT EXISTS idx_aqd_aqi ON air_quality_data (aqi_us)",
    "CREATE INDEX IF NOT EXISTS idx_aqd_city_timestamp ON air_quality_data (city, timestamp DESC)",
];
