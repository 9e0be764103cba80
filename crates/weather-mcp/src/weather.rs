//! Current-temperature lookups.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Public Open-Meteo API.
pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that knows the current temperature at a coordinate.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Current temperature in degrees Celsius.
    async fn fetch_temperature(&self, latitude: f64, longitude: f64) -> Result<f64>;
}

#[derive(Debug, Deserialize)]
struct Forecast {
    current: Current,
}

#[derive(Debug, Deserialize)]
struct Current {
    temperature_2m: f64,
}

/// Open-Meteo forecast client.
#[derive(Debug, Clone)]
pub struct OpenMeteo {
    client: reqwest::Client,
    endpoint: Url,
}

impl OpenMeteo {
    /// Client for the public API.
    pub fn new() -> Result<Self> {
        Self::with_base_url(OPEN_METEO_URL)
    }

    /// Client for an Open-Meteo compatible API rooted at `base`.
    pub fn with_base_url(base: &str) -> Result<Self> {
        let endpoint = crate::join_url(base, "v1/forecast")?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, endpoint })
    }

    /// The forecast URL queried for each lookup.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl WeatherSource for OpenMeteo {
    async fn fetch_temperature(&self, latitude: f64, longitude: f64) -> Result<f64> {
        tracing::debug!(
            "Fetching forecast for {}, {} from {}",
            latitude,
            longitude,
            self.endpoint
        );
        let forecast: Forecast = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", "temperature_2m".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| Error::Network(format!("unexpected forecast payload: {e}")))?;
        Ok(forecast.current.temperature_2m)
    }
}

/// A source that always reports the same temperature.
#[derive(Debug, Clone, Copy)]
pub struct FixedTemperature(pub f64);

#[async_trait]
impl WeatherSource for FixedTemperature {
    async fn fetch_temperature(&self, _latitude: f64, _longitude: f64) -> Result<f64> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        let source = OpenMeteo::with_base_url("http://127.0.0.1:9999").unwrap();
        assert_eq!(
            source.endpoint().as_str(),
            "http://127.0.0.1:9999/v1/forecast"
        );
        let source = OpenMeteo::with_base_url("http://127.0.0.1:9999/proxy").unwrap();
        assert_eq!(
            source.endpoint().as_str(),
            "http://127.0.0.1:9999/proxy/v1/forecast"
        );
    }

    #[test]
    fn test_bad_base_url() {
        assert!(matches!(
            OpenMeteo::with_base_url("not a url"),
            Err(Error::Mcp(mcplink::Error::InvalidConfiguration(_)))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        // Port 9 (discard) is not listening in test environments.
        let source = OpenMeteo::with_base_url("http://127.0.0.1:9").unwrap();
        let err = source.fetch_temperature(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
