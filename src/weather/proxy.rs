use super::cache::{Clock, SystemClock, TtlCache};
use super::client::{OpenWeatherClient, WeatherError};
use super::types::{CityMatch, CombinedWeather, SearchKey, WeatherKey, WeatherKind};
use crate::config::WeatherConfig;
use serde_json::Value;
use std::sync::Arc;

const MIN_SEARCH_CHARS: usize = 2;

/// Caching front for the upstream weather provider.
///
/// Only successful fetches are cached. Two concurrent misses for the same key
/// may both reach upstream; whichever finishes last wins the cache slot.
pub struct WeatherProxy {
    client: OpenWeatherClient,
    config: WeatherConfig,
    clock: Arc<dyn Clock>,
    weather: TtlCache<Value>,
    cities: TtlCache<Vec<CityMatch>>,
}

impl WeatherProxy {
    pub fn new(config: WeatherConfig) -> Result<Self, reqwest::Error> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: WeatherConfig, clock: Arc<dyn Clock>) -> Result<Self, reqwest::Error> {
        let client = OpenWeatherClient::new(&config)?;
        Ok(Self {
            client,
            weather: TtlCache::new(config.cache_capacity, clock.clone()),
            cities: TtlCache::new(config.cache_capacity, clock.clone()),
            clock,
            config,
        })
    }

    pub async fn get_current_weather(&self, lat: f64, lon: f64) -> Result<Value, WeatherError> {
        self.get_weather(WeatherKey::new(WeatherKind::Current, lat, lon))
            .await
    }

    pub async fn get_forecast(&self, lat: f64, lon: f64) -> Result<Value, WeatherError> {
        self.get_weather(WeatherKey::new(WeatherKind::Forecast, lat, lon))
            .await
    }

    /// Fetches current weather and forecast concurrently. Either failure fails the whole call.
    pub async fn get_all(&self, lat: f64, lon: f64) -> Result<CombinedWeather, WeatherError> {
        let (current, forecast) =
            tokio::try_join!(self.get_current_weather(lat, lon), self.get_forecast(lat, lon))?;
        Ok(CombinedWeather { current, forecast })
    }

    pub async fn search_cities(&self, query: &str) -> Result<Vec<CityMatch>, WeatherError> {
        let key = SearchKey::new(query);
        if key.query().chars().count() < MIN_SEARCH_CHARS {
            return Ok(Vec::new());
        }

        let api_key = self.api_key()?;
        let cache_key = key.to_string();
        if let Some(cached) = self.cities.get(&cache_key) {
            tracing::debug!(key = %cache_key, "serving city search from cache");
            return Ok(cached);
        }

        let mut cities = self
            .client
            .geocode_direct(api_key, key.query(), self.config.search_limit)
            .await
            .map_err(|e| {
                tracing::error!("City search for {:?} failed: {}", key.query(), e);
                e
            })?;
        cities.truncate(self.config.search_limit);

        self.cities
            .insert(cache_key.clone(), cities.clone(), self.config.search_ttl);
        tracing::debug!(key = %cache_key, matches = cities.len(), "fetched city search from upstream");
        Ok(cities)
    }

    /// Drops expired entries from both caches, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.weather.purge_expired() + self.cities.purge_expired()
    }

    /// Live entries across both caches.
    pub fn cached_entries(&self) -> usize {
        self.weather.len() + self.cities.len()
    }

    async fn get_weather(&self, key: WeatherKey) -> Result<Value, WeatherError> {
        let api_key = self.api_key()?;
        let cache_key = key.to_string();
        if let Some(cached) = self.weather.get(&cache_key) {
            tracing::debug!(key = %cache_key, "serving weather from cache");
            return Ok(cached);
        }

        let result = match key.kind {
            WeatherKind::Current => self.client.current(api_key, key.lat, key.lon).await,
            WeatherKind::Forecast => self.client.forecast(api_key, key.lat, key.lon).await,
        };
        let mut payload = result.map_err(|e| {
            tracing::error!("Fetching {} weather failed: {}", key.kind.as_str(), e);
            e
        })?;

        if let Value::Object(map) = &mut payload {
            map.insert(
                "fetchedAt".to_string(),
                Value::String(self.clock.now().to_rfc3339()),
            );
        }

        let ttl = match key.kind {
            WeatherKind::Current => self.config.current_ttl,
            WeatherKind::Forecast => self.config.forecast_ttl,
        };
        self.weather.insert(cache_key.clone(), payload.clone(), ttl);
        tracing::debug!(key = %cache_key, "fetched weather from upstream");
        Ok(payload)
    }

    fn api_key(&self) -> Result<&str, WeatherError> {
        self.config.api_key.as_deref().ok_or(WeatherError::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::cache::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> WeatherConfig {
        WeatherConfig {
            api_key: Some("test-key".to_string()),
            weather_base_url: format!("{}/data/2.5", server.uri()),
            geo_base_url: format!("{}/geo/1.0", server.uri()),
            request_timeout: Duration::from_secs(5),
            ..WeatherConfig::default()
        }
    }

    fn proxy_for(server: &MockServer) -> (WeatherProxy, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap());
        let proxy = WeatherProxy::with_clock(config_for(server), Arc::new(clock.clone())).unwrap();
        (proxy, clock)
    }

    async fn mount_current(server: &MockServer, temp: f64, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Paris",
                "main": { "temp": temp }
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_is_cache_hit() {
        let server = MockServer::start().await;
        mount_current(&server, 18.0, 1).await;
        let (proxy, clock) = proxy_for(&server);

        let first = proxy.get_current_weather(48.8566, 2.3522).await.unwrap();
        clock.advance(Duration::from_secs(59));
        let second = proxy.get_current_weather(48.8566, 2.3522).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first["fetchedAt"], "2024-06-01T09:00:00+00:00");
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_fresh_fetch() {
        let server = MockServer::start().await;
        mount_current(&server, 18.0, 2).await;
        let (proxy, clock) = proxy_for(&server);

        proxy.get_current_weather(1.0, 2.0).await.unwrap();
        proxy.get_current_weather(1.0, 2.0).await.unwrap();
        clock.advance(Duration::from_secs(60));
        let third = proxy.get_current_weather(1.0, 2.0).await.unwrap();

        assert_eq!(third["fetchedAt"], "2024-06-01T09:01:00+00:00");
    }

    #[tokio::test]
    async fn test_current_and_forecast_cached_separately() {
        let server = MockServer::start().await;
        mount_current(&server, 18.0, 1).await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cnt": 40,
                "list": []
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (proxy, _clock) = proxy_for(&server);

        let current = proxy.get_current_weather(1.0, 2.0).await.unwrap();
        let forecast = proxy.get_forecast(1.0, 2.0).await.unwrap();
        proxy.get_forecast(1.0, 2.0).await.unwrap();

        assert_eq!(current["name"], "Paris");
        assert_eq!(forecast["cnt"], 40);
    }

    #[tokio::test]
    async fn test_short_search_never_reaches_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geo/1.0/direct"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(0)
            .mount(&server)
            .await;
        let (proxy, _clock) = proxy_for(&server);

        assert!(proxy.search_cities("a").await.unwrap().is_empty());
        assert!(proxy.search_cities("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_limited() {
        let server = MockServer::start().await;
        let matches: Vec<_> = (0..7)
            .map(|i| serde_json::json!({ "name": "Paris", "lat": i as f64, "lon": 2.0, "country": "FR" }))
            .collect();
        Mock::given(method("GET"))
            .and(path("/geo/1.0/direct"))
            .and(query_param("q", "paris"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches))
            .expect(1)
            .mount(&server)
            .await;
        let (proxy, clock) = proxy_for(&server);

        let upper = proxy.search_cities("Paris").await.unwrap();
        clock.advance(Duration::from_secs(3599));
        let lower = proxy.search_cities("paris").await.unwrap();

        assert_eq!(upper.len(), 5);
        assert_eq!(upper, lower);
    }

    #[tokio::test]
    async fn test_get_all_fails_when_forecast_fails() {
        let server = MockServer::start().await;
        mount_current(&server, 18.0, 1).await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "message": "Internal error"
            })))
            .mount(&server)
            .await;
        let (proxy, _clock) = proxy_for(&server);

        let err = proxy.get_all(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, WeatherError::Upstream { status: Some(500), .. }));
    }

    #[tokio::test]
    async fn test_get_all_combines_both_payloads() {
        let server = MockServer::start().await;
        mount_current(&server, 21.5, 1).await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "cnt": 40 })))
            .expect(1)
            .mount(&server)
            .await;
        let (proxy, _clock) = proxy_for(&server);

        let all = proxy.get_all(1.0, 2.0).await.unwrap();
        assert_eq!(all.current["main"]["temp"], 21.5);
        assert_eq!(all.forecast["cnt"], 40);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_current(&server, 18.0, 1).await;
        let (proxy, _clock) = proxy_for(&server);

        assert!(proxy.get_current_weather(1.0, 2.0).await.is_err());
        let retried = proxy.get_current_weather(1.0, 2.0).await.unwrap();
        assert_eq!(retried["main"]["temp"], 18.0);
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(0)
            .mount(&server)
            .await;
        let config = WeatherConfig {
            api_key: None,
            ..config_for(&server)
        };
        let proxy = WeatherProxy::new(config).unwrap();

        assert!(matches!(proxy.get_current_weather(1.0, 2.0).await, Err(WeatherError::Config)));
        assert!(matches!(proxy.get_forecast(1.0, 2.0).await, Err(WeatherError::Config)));
        assert!(matches!(proxy.search_cities("Paris").await, Err(WeatherError::Config)));
    }

    #[tokio::test]
    async fn test_purge_expired_clears_both_caches() {
        let server = MockServer::start().await;
        mount_current(&server, 18.0, 1).await;
        Mock::given(method("GET"))
            .and(path("/geo/1.0/direct"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        let (proxy, clock) = proxy_for(&server);

        proxy.get_current_weather(1.0, 2.0).await.unwrap();
        proxy.search_cities("Oslo").await.unwrap();
        clock.advance(Duration::from_secs(61));

        assert_eq!(proxy.purge_expired(), 1);
        assert_eq!(proxy.cached_entries(), 1);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(proxy.purge_expired(), 1);
        assert_eq!(proxy.cached_entries(), 0);
    }
}
