//! Status-bar indicator logic.
//!
//! Pure state for the `aqi-indicator` client: severity bands, the trend arrow
//! between successive polls, and band-crossing alerts. The binary only does
//! HTTP and printing around this.

use std::fmt;

use serde::Deserialize;

// ---

/// AQI change that counts as a real move rather than noise.
pub const TREND_THRESHOLD: i64 = 5;

/// US EPA severity bands. Upper bounds are inclusive: 50, 100, 150, 200, 300.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Good,
    Moderate,
    UnhealthyForSensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl Severity {
    pub fn from_aqi(aqi: i64) -> Self {
        // ---
        match aqi {
            i64::MIN..=50 => Severity::Good,
            51..=100 => Severity::Moderate,
            101..=150 => Severity::UnhealthyForSensitive,
            151..=200 => Severity::Unhealthy,
            201..=300 => Severity::VeryUnhealthy,
            _ => Severity::Hazardous,
        }
    }

    pub fn label(self) -> &'static str {
        // ---
        match self {
            Severity::Good => "Good",
            Severity::Moderate => "Moderate",
            Severity::UnhealthyForSensitive => "Unhealthy for Sensitive Groups",
            Severity::Unhealthy => "Unhealthy",
            Severity::VeryUnhealthy => "Very Unhealthy",
            Severity::Hazardous => "Hazardous",
        }
    }

    pub fn badge(self) -> &'static str {
        // ---
        match self {
            Severity::Good => "🟢",
            Severity::Moderate => "🟡",
            Severity::UnhealthyForSensitive => "🟠",
            Severity::Unhealthy => "🔴",
            Severity::VeryUnhealthy => "🟣",
            Severity::Hazardous => "⚫",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

impl Trend {
    /// Compare two successive AQI values. Moves of at most
    /// [`TREND_THRESHOLD`] either way are `Stable`.
    pub fn between(previous: i64, current: i64) -> Self {
        // ---
        let diff = current - previous;
        if diff > TREND_THRESHOLD {
            Trend::Worsening
        } else if diff < -TREND_THRESHOLD {
            Trend::Improving
        } else {
            Trend::Stable
        }
    }

    pub fn arrow(self) -> &'static str {
        // ---
        match self {
            Trend::Improving => "↓",
            Trend::Stable => "→",
            Trend::Worsening => "↑",
        }
    }
}

/// The band changed between two successive observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandCrossing {
    pub from: Severity,
    pub to: Severity,
}

impl BandCrossing {
    pub fn is_worse(&self) -> bool {
        self.to > self.from
    }
}

impl fmt::Display for BandCrossing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Air quality changed: {} → {}", self.from, self.to)
    }
}

/// What one poll produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub aqi: i64,
    pub severity: Severity,
    /// `None` on the first observation.
    pub trend: Option<Trend>,
    pub alert: Option<BandCrossing>,
}

/// Remembers the previous AQI across polls.
#[derive(Debug, Default)]
pub struct IndicatorState {
    previous: Option<i64>,
}

impl IndicatorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new AQI value.
    pub fn observe(&mut self, aqi: i64) -> Observation {
        // ---
        let severity = Severity::from_aqi(aqi);
        let (trend, alert) = match self.previous {
            Some(prev) => {
                let from = Severity::from_aqi(prev);
                let alert = (from != severity).then_some(BandCrossing { from, to: severity });
                (Some(Trend::between(prev, aqi)), alert)
            }
            None => (None, None),
        };
        self.previous = Some(aqi);

        Observation {
            aqi,
            severity,
            trend,
            alert,
        }
    }
}

/// The fields the indicator reads from `/api/aqi/indicator`.
///
/// Overridden values may be numbers or display strings, so they are kept as
/// raw JSON and rendered as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorPayload {
    pub aqi_us: serde_json::Value,
    #[serde(default)]
    pub temperature_celsius: serde_json::Value,
    #[serde(default)]
    pub humidity: serde_json::Value,
}

impl IndicatorPayload {
    /// Numeric AQI, if the (possibly overridden) value is a number.
    pub fn aqi(&self) -> Option<i64> {
        // ---
        self.aqi_us
            .as_i64()
            .or_else(|| self.aqi_us.as_f64().map(|f| f.round() as i64))
    }
}

fn show(v: &serde_json::Value) -> String {
    // ---
    match v {
        serde_json::Value::Null => "--".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One-line status text, e.g. `🟡 87 ↑ Moderate | 21.5°C | 40% humidity`.
pub fn render(payload: &IndicatorPayload, obs: Option<&Observation>) -> String {
    // ---
    let details = format!(
        "{}°C | {}% humidity",
        show(&payload.temperature_celsius),
        show(&payload.humidity)
    );
    match obs {
        Some(o) => format!(
            "{} {} {} {} | {}",
            o.severity.badge(),
            o.aqi,
            o.trend.map_or("·", Trend::arrow),
            o.severity,
            details
        ),
        None => format!("AQI: {} | {}", show(&payload.aqi_us), details),
    }
}
