//! Data models for the air quality pipeline.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Weather block of an IQAir `current` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct IqAirWeather {
    // ---
    /// Temperature, °C.
    pub tp: Option<f64>,
    /// Pressure, hPa.
    pub pr: Option<i32>,
    /// Relative humidity, %.
    pub hu: Option<i32>,
    /// Wind speed, m/s.
    pub ws: Option<f64>,
    /// Wind direction, degrees.
    pub wd: Option<i32>,
}

/// One pollutant channel; upstream omits channels it has no sensor for.
#[derive(Debug, Clone, Deserialize)]
pub struct IqAirChannel {
    pub conc: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IqAirPollution {
    // ---
    pub aqius: i32,
    pub mainus: Option<String>,
    pub p2: Option<IqAirChannel>,
    pub p1: Option<IqAirChannel>,
    pub n2: Option<IqAirChannel>,
    pub s2: Option<IqAirChannel>,
    pub o3: Option<IqAirChannel>,
    pub co: Option<IqAirChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IqAirCurrent {
    pub weather: IqAirWeather,
    pub pollution: IqAirPollution,
}

/// GeoJSON point, `[longitude, latitude]`.
#[derive(Debug, Clone, Deserialize)]
pub struct IqAirLocation {
    pub coordinates: [f64; 2],
}

/// The `data` member of a successful `/city` response.
#[derive(Debug, Clone, Deserialize)]
pub struct IqAirData {
    // ---
    pub city: String,
    pub state: Option<String>,
    pub country: String,
    pub location: Option<IqAirLocation>,
    pub current: IqAirCurrent,
}

/// Raw upstream payload plus its verbatim body text.
#[derive(Debug, Clone)]
pub struct IqAirResponse {
    pub data: IqAirData,
    pub raw: String,
}

/// A reading ready to be written; no identity yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    // ---
    pub timestamp: DateTime<Utc>,
    pub city: String,
    pub state: Option<String>,
    pub country: String,
    pub aqi_us: i32,
    pub main_pollutant_us: Option<String>,
    pub temperature_celsius: Option<f64>,
    pub humidity: Option<i32>,
    pub pressure_hpa: Option<i32>,
    pub wind_speed_ms: Option<f64>,
    pub wind_direction: Option<i32>,
    pub pm25_concentration: Option<f64>,
    pub pm10_concentration: Option<f64>,
    pub no2_concentration: Option<f64>,
    pub so2_concentration: Option<f64>,
    pub o3_concentration: Option<f64>,
    pub co_concentration: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub raw_response: Option<String>,
}

/// One persisted observation, as served by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub city: String,
    pub state: Option<String>,
    pub country: String,
    pub aqi_us: i32,
    pub main_pollutant_us: Option<String>,
    pub temperature_celsius: Option<f64>,
    pub humidity: Option<i32>,
    pub pressure_hpa: Option<i32>,
    pub wind_speed_ms: Option<f64>,
    pub wind_direction: Option<i32>,
    pub pm25_concentration: Option<f64>,
    pub pm10_concentration: Option<f64>,
    pub no2_concentration: Option<f64>,
    pub so2_concentration: Option<f64>,
    pub o3_concentration: Option<f64>,
    pub co_concentration: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub raw_response: Option<String>,
}

/// Floor `at` to the start of its scheduling tick.
///
/// Every fetch inside the same `tick_secs` window maps to the same capture
/// timestamp, so repeated fetches collide on the (timestamp, city) key
/// instead of producing near-duplicate rows.
pub fn tick_timestamp(at: DateTime<Utc>, tick_secs: u64) -> DateTime<Utc> {
    // ---
    let tick = tick_secs.max(1) as i64;
    let secs = at.timestamp().div_euclid(tick) * tick;
    Utc.timestamp_opt(secs, 0).single().unwrap_or(at)
}

impl IqAirResponse {
    /// Map the upstream payload onto a storable row captured at `timestamp`.
    pub fn to_new_reading(&self, timestamp: DateTime<Utc>) -> NewReading {
        // ---
        let IqAirData {
            city,
            state,
            country,
            location,
            current,
        } = &self.data;
        let (weather, pollution) = (&current.weather, &current.pollution);
        let conc = |c: &Option<IqAirChannel>| c.as_ref().and_then(|c| c.conc);

        NewReading {
            timestamp,
            city: city.clone(),
            state: state.clone(),
            country: country.clone(),
            aqi_us: pollution.aqius,
            main_pollutant_us: pollution.mainus.clone(),
            temperature_celsius: weather.tp,
            humidity: weather.hu,
            pressure_hpa: weather.pr,
            wind_speed_ms: weather.ws,
            wind_direction: weather.wd,
            pm25_concentration: conc(&pollution.p2),
            pm10_concentration: conc(&pollution.p1),
            no2_concentration: conc(&pollution.n2),
            so2_concentration: conc(&pollution.s2),
            o3_concentration: conc(&pollution.o3),
            co_concentration: conc(&pollution.co),
            latitude: location.as_ref().map(|l| l.coordinates[1]),
            longitude: location.as_ref().map(|l| l.coordinates[0]),
            raw_response: Some(self.raw.clone()),
        }
    }
}
