//! External source client for the IQAir (AirVisual) `/city` endpoint.
//!
//! One request per call, bounded by a timeout, no retry and no caching: the
//! scheduler's next tick is the retry mechanism.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Location;
use crate::error::{Error, Result};
use crate::models::{IqAirData, IqAirResponse};

// ---

/// Anything that can produce the current conditions for a location.
#[async_trait]
pub trait AirQualitySource: Send + Sync {
    async fn fetch_current(&self, location: &Location) -> Result<IqAirResponse>;
}

/// Top-level response shape; `data` is only meaningful on success.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    data: serde_json::Value,
}

/// Parse a `/city` response body.
///
/// Any status other than `"success"`, or a body that does not match the
/// expected shape, is a [`Error::SourceUnavailable`].
pub fn parse_city_response(body: &str) -> Result<IqAirResponse> {
    // ---
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| Error::SourceUnavailable(format!("malformed response: {e}")))?;

    if envelope.status != "success" {
        let detail = envelope
            .data
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("no message");
        return Err(Error::SourceUnavailable(format!(
            "API returned status '{}': {}",
            envelope.status, detail
        )));
    }

    let data: IqAirData = serde_json::from_value(envelope.data)
        .map_err(|e| Error::SourceUnavailable(format!("unexpected payload shape: {e}")))?;

    Ok(IqAirResponse {
        data,
        raw: body.to_string(),
    })
}

/// HTTP client for `https://api.airvisual.com/v2/city`.
pub struct IqAirClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl IqAirClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        // ---
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::SourceUnavailable(format!("failed to build client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl AirQualitySource for IqAirClient {
    async fn fetch_current(&self, location: &Location) -> Result<IqAirResponse> {
        // ---
        let url = format!("{}/city", self.base_url);
        tracing::debug!("Fetching {} for {}", url, location.city);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("city", location.city.as_str()),
                ("state", location.state.as_str()),
                ("country", location.country.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            // IQAir reports errors as `{status: "fail", data: {message}}` too
            return match parse_city_response(&body) {
                Err(e) => Err(e),
                Ok(_) => Err(Error::SourceUnavailable(format!("HTTP {status}"))),
            };
        }

        parse_city_response(&body)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const OK_BODY: &str = r#"{
        "status": "success",
        "data": {
            "city": "Tashkent",
            "state": "Toshkent Shahri",
            "country": "Uzbekistan",
            "location": { "type": "Point", "coordinates": [69.2401, 41.2995] },
            "current": {
                "weather": { "ts": "2025-03-26T18:00:00.000Z", "tp": 18, "pr": 1012, "hu": 55, "ws": 1.5, "wd": 90 },
                "pollution": { "ts": "2025-03-26T18:00:00.000Z", "aqius": 153, "mainus": "p2", "aqicn": 85, "maincn": "p2" }
            }
        }
    }"#;

    #[test]
    fn test_parse_success() {
        // ---
        let parsed = parse_city_response(OK_BODY).unwrap();
        assert_eq!(parsed.data.city, "Tashkent");
        assert_eq!(parsed.data.current.pollution.aqius, 153);
        // integer temperatures are accepted as floats
        assert_eq!(parsed.data.current.weather.tp, Some(18.0));
        assert_eq!(parsed.raw, OK_BODY);
    }

    #[test]
    fn test_parse_fail_status() {
        // ---
        let body = r#"{"status":"fail","data":{"message":"call_limit_reached"}}"#;
        match parse_city_response(body) {
            Err(Error::SourceUnavailable(msg)) => assert!(msg.contains("call_limit_reached")),
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed() {
        // ---
        assert!(matches!(
            parse_city_response("<html>bad gateway</html>"),
            Err(Error::SourceUnavailable(_))
        ));
        assert!(matches!(
            parse_city_response(r#"{"status":"success","data":{"city":"Tashkent"}}"#),
            Err(Error::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_source_unavailable() {
        // ---
        let client = IqAirClient::new("http://127.0.0.1:9", "key", 1).unwrap();
        let location = Location {
            city: "Tashkent".into(),
            state: "Toshkent Shahri".into(),
            country: "Uzbekistan".into(),
        };
        assert!(matches!(
            client.fetch_current(&location).await,
            Err(Error::SourceUnavailable(_))
        ));
    }
}
