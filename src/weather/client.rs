use super::types::CityMatch;
use crate::config::WeatherConfig;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("Weather API key is not configured")]
    Config,
    #[error("Weather API error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },
    #[error("Weather API request timed out after {0:?}")]
    Timeout(Duration),
}

impl WeatherError {
    fn malformed(err: impl std::fmt::Display) -> Self {
        WeatherError::Upstream {
            status: None,
            message: format!("malformed response: {}", err),
        }
    }
}

/// Thin HTTP client for the OpenWeatherMap endpoints this service proxies.
///
/// Every call is a single attempt bounded by the configured timeout.
pub struct OpenWeatherClient {
    client: Client,
    weather_base_url: String,
    geo_base_url: String,
    timeout: Duration,
}

impl OpenWeatherClient {
    pub fn new(config: &WeatherConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent("WeatherDashboard/1.0")
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            weather_base_url: config.weather_base_url.trim_end_matches('/').to_string(),
            geo_base_url: config.geo_base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        })
    }

    pub async fn current(&self, api_key: &str, lat: f64, lon: f64) -> Result<Value, WeatherError> {
        let url = format!("{}/weather", self.weather_base_url);
        self.coordinate_request(&url, api_key, lat, lon).await
    }

    pub async fn forecast(&self, api_key: &str, lat: f64, lon: f64) -> Result<Value, WeatherError> {
        let url = format!("{}/forecast", self.weather_base_url);
        self.coordinate_request(&url, api_key, lat, lon).await
    }

    pub async fn geocode_direct(
        &self,
        api_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CityMatch>, WeatherError> {
        let url = format!("{}/direct", self.geo_base_url);
        let limit = limit.to_string();

        let response = self
            .get_json(&url, &[("q", query), ("limit", &limit), ("appid", api_key)])
            .await?;

        serde_json::from_value(response).map_err(WeatherError::malformed)
    }

    async fn coordinate_request(
        &self,
        url: &str,
        api_key: &str,
        lat: f64,
        lon: f64,
    ) -> Result<Value, WeatherError> {
        let response = self
            .get_json(url, &[
                ("lat", &lat.to_string()),
                ("lon", &lon.to_string()),
                ("appid", api_key),
                ("units", "metric"),
            ])
            .await?;

        if !response.is_object() {
            return Err(WeatherError::malformed("expected a JSON object"));
        }
        Ok(response)
    }

    async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, WeatherError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = provider_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
            tracing::warn!("Weather API returned HTTP {}: {}", status.as_u16(), message);
            return Err(WeatherError::Upstream {
                status: Some(status.as_u16()),
                message,
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                WeatherError::Timeout(self.timeout)
            } else {
                WeatherError::malformed(e)
            }
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> WeatherError {
        if err.is_timeout() {
            WeatherError::Timeout(self.timeout)
        } else {
            WeatherError::Upstream {
                status: None,
                message: format!("request failed: {}", err),
            }
        }
    }
}

/// Pulls the provider's `message` field out of an error body, if there is one.
fn provider_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
