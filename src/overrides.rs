//! Operator overrides for displayed values.
//!
//! Overrides are a projection over a stored [`Reading`]: they never touch the
//! reading itself or the store, and they have no effect while disabled. State
//! lives in memory only and starts disabled and empty on every boot.

use std::sync::RwLock;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

use crate::models::Reading;

// ---

/// A replacement value.
///
/// Numbers are the normal case. A string that parses as a number is
/// normalised to a number; any other string (`"N/A"`, `"--"`) is kept as a
/// display string and substituted verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OverrideValue {
    Number(Number),
    Display(String),
}

impl<'de> Deserialize<'de> for OverrideValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // ---
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(Number),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => OverrideValue::Number(n),
            Raw::Text(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    OverrideValue::Number(i.into())
                } else if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
                    OverrideValue::Number(n)
                } else {
                    OverrideValue::Display(s)
                }
            }
        })
    }
}

impl From<OverrideValue> for Value {
    fn from(v: OverrideValue) -> Self {
        match v {
            OverrideValue::Number(n) => Value::Number(n),
            OverrideValue::Display(s) => Value::String(s),
        }
    }
}

/// Current override configuration, as returned to the admin.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aqi: Option<OverrideValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<OverrideValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<OverrideValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<OverrideValue>,
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update. Absent fields are left alone; `null` clears a value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverridePatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub aqi: Option<Option<OverrideValue>>,
    #[serde(default, deserialize_with = "present")]
    pub temperature: Option<Option<OverrideValue>>,
    #[serde(default, deserialize_with = "present")]
    pub humidity: Option<Option<OverrideValue>>,
    #[serde(default, deserialize_with = "present", alias = "wind_speed")]
    pub wind_speed: Option<Option<OverrideValue>>,
}

/// Process-wide override state behind a lock.
#[derive(Debug, Default)]
pub struct OverrideState {
    inner: RwLock<OverrideSettings>,
}

impl OverrideState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current settings.
    pub fn get(&self) -> OverrideSettings {
        // ---
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Merge `patch` into the current settings and return the result.
    pub fn set(&self, patch: OverridePatch) -> OverrideSettings {
        // ---
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(enabled) = patch.enabled {
            guard.enabled = enabled;
        }
        if let Some(v) = patch.aqi {
            guard.aqi = v;
        }
        if let Some(v) = patch.temperature {
            guard.temperature = v;
        }
        if let Some(v) = patch.humidity {
            guard.humidity = v;
        }
        if let Some(v) = patch.wind_speed {
            guard.wind_speed = v;
        }
        guard.clone()
    }

    /// Back to disabled and empty.
    pub fn clear(&self) {
        // ---
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = OverrideSettings::default();
    }

    /// Project `reading` through the current overrides.
    pub fn apply(&self, reading: &Reading) -> Value {
        self.apply_value(serde_json::to_value(reading).unwrap_or_default())
    }

    /// Substitute overridden fields in a serialized reading.
    ///
    /// Works on one snapshot of the settings, so a concurrent `set` is either
    /// fully visible or not at all.
    pub fn apply_value(&self, reading: Value) -> Value {
        // ---
        let settings = self.get();
        let Value::Object(mut map) = reading else {
            return reading;
        };
        if !settings.enabled {
            return Value::Object(map);
        }

        substitute(&mut map, "aqi_us", settings.aqi);
        substitute(&mut map, "temperature_celsius", settings.temperature);
        substitute(&mut map, "humidity", settings.humidity);
        substitute(&mut map, "wind_speed_ms", settings.wind_speed);
        Value::Object(map)
    }
}

fn substitute(map: &mut Map<String, Value>, field: &str, value: Option<OverrideValue>) {
    if let Some(v) = value {
        map.insert(field.to_string(), v.into());
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn reading() -> Reading {
        // ---
        Reading {
            id: 1,
            timestamp: Utc::now(),
            city: "Tashkent".into(),
            state: Some("Toshkent Shahri".into()),
            country: "Uzbekistan".into(),
            aqi_us: 87,
            main_pollutant_us: Some("p2".into()),
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
            raw_response: None,
        }
    }

    impl From<i64> for OverrideValue {
        fn from(v: i64) -> Self {
            OverrideValue::Number(v.into())
        }
    }

    fn patch(v: Value) -> OverridePatch {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_starts_disabled_and_empty() {
        // ---
        let state = OverrideState::new();
        assert_eq!(state.get(), OverrideSettings::default());
    }

    #[test]
    fn test_disabled_is_noop_even_with_values() {
        // ---
        let state = OverrideState::new();
        state.set(patch(json!({ "aqi": 999, "temperature": -40 })));

        let r = reading();
        assert_eq!(state.apply(&r), serde_json::to_value(&r).unwrap());
    }

    #[test]
    fn test_enabled_substitutes_fields() {
        // ---
        let state = OverrideState::new();
        state.set(patch(json!({ "enabled": true, "aqi": 999, "windSpeed": "N/A" })));

        let r = reading();
        let shown = state.apply(&r);
        assert_eq!(shown["aqi_us"], json!(999));
        assert_eq!(shown["wind_speed_ms"], json!("N/A"));
        assert_eq!(shown["temperature_celsius"], json!(21.5));
        // the reading itself is untouched
        assert_eq!(r.aqi_us, 87);
    }

    #[test]
    fn test_apply_is_idempotent() {
        // ---
        let state = OverrideState::new();
        state.set(patch(json!({ "enabled": true, "aqi": 150, "humidity": "12" })));

        let once = state.apply(&reading());
        let twice = state.apply_value(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once["humidity"], json!(12));
    }

    #[test]
    fn test_set_merges_and_keeps_enabled() {
        // ---
        let state = OverrideState::new();
        state.set(patch(json!({ "enabled": true, "aqi": 10 })));
        let after = state.set(patch(json!({ "temperature": 30.5 })));

        assert!(after.enabled);
        assert_eq!(after.aqi, Some(OverrideValue::from(10_i64)));
        assert_eq!(
            after.temperature,
            Some(OverrideValue::Number(Number::from_f64(30.5).unwrap()))
        );
    }

    #[test]
    fn test_null_clears_single_field() {
        // ---
        let state = OverrideState::new();
        state.set(patch(json!({ "enabled": true, "aqi": 10, "humidity": 5 })));
        let after = state.set(patch(json!({ "aqi": null })));

        assert_eq!(after.aqi, None);
        assert_eq!(after.humidity, Some(OverrideValue::from(5_i64)));
    }

    #[test]
    fn test_clear_resets_everything() {
        // ---
        let state = OverrideState::new();
        state.set(patch(json!({ "enabled": true, "aqi": 10, "windSpeed": 4 })));
        state.clear();
        assert_eq!(state.get(), OverrideSettings::default());
    }

    #[test]
    fn test_get_returns_copy() {
        // ---
        let state = OverrideState::new();
        let mut copy = state.get();
        copy.enabled = true;
        copy.aqi = Some(OverrideValue::from(1_i64));
        assert_eq!(state.get(), OverrideSettings::default());
    }

    #[test]
    fn test_numeric_strings_normalised() {
        // ---
        let v: OverrideValue = serde_json::from_value(json!("999")).unwrap();
        assert_eq!(v, OverrideValue::Number(999.into()));
        let v: OverrideValue = serde_json::from_value(json!(" 12.5 ")).unwrap();
        assert_eq!(v, OverrideValue::Number(Number::from_f64(12.5).unwrap()));
        let v: OverrideValue = serde_json::from_value(json!("Error")).unwrap();
        assert_eq!(v, OverrideValue::Display("Error".into()));
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        // ---
        let state = OverrideState::new();
        let settings = state.set(patch(json!({ "enabled": true, "wind_speed": 7 })));
        assert_eq!(
            serde_json::to_value(settings).unwrap(),
            json!({ "enabled": true, "windSpeed": 7 })
        );
    }
}
