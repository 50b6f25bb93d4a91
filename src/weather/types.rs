use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeatherKind {
    Current,
    Forecast,
}

impl WeatherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherKind::Current => "current",
            WeatherKind::Forecast => "forecast",
        }
    }
}

/// Cache key for coordinate-based lookups, e.g. `current:48.8566:2.3522`.
///
/// Coordinates are rounded to 4 decimal places (~11 m) so that the same
/// point formatted slightly differently by clients shares an entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherKey {
    pub lat: f64,
    pub lon: f64,
    pub kind: WeatherKind,
}

impl WeatherKey {
    pub fn new(kind: WeatherKind, lat: f64, lon: f64) -> Self {
        Self { lat, lon, kind }
    }
}

impl fmt::Display for WeatherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:.4}:{:.4}",
            self.kind.as_str(),
            key_coordinate(self.lat),
            key_coordinate(self.lon)
        )
    }
}

/// Rounds to 4 decimals, then folds any negative zero into 0.0 so values that
/// round to zero from either side share a key.
fn key_coordinate(value: f64) -> f64 {
    (value * 1e4).round() / 1e4 + 0.0
}

/// Cache key for city searches; case-insensitive on the query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchKey(String);

impl SearchKey {
    pub fn new(query: &str) -> Self {
        Self(query.trim().to_lowercase())
    }

    pub fn query(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "search:{}", self.0)
    }
}

/// One geocoding match from the provider's direct geocoding endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityMatch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_names: Option<HashMap<String, String>>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedWeather {
    pub current: Value,
    pub forecast: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weather_key_format() {
        let key = WeatherKey::new(WeatherKind::Current, 48.8566, 2.3522);
        assert_eq!(key.to_string(), "current:48.8566:2.3522");

        let key = WeatherKey::new(WeatherKind::Forecast, -33.8688, 151.2093);
        assert_eq!(key.to_string(), "forecast:-33.8688:151.2093");
    }

    #[test]
    fn test_weather_key_rounding_is_stable() {
        let a = WeatherKey::new(WeatherKind::Current, 51.50741, -0.12776);
        let b = WeatherKey::new(WeatherKind::Current, 51.507412, -0.127761);
        assert_eq!(a.to_string(), b.to_string());

        let zero = WeatherKey::new(WeatherKind::Current, -0.0, 0.0);
        assert_eq!(zero.to_string(), "current:0.0000:0.0000");
    }

    #[test]
    fn test_near_zero_coordinates_share_a_key() {
        let below = WeatherKey::new(WeatherKind::Current, -0.00001, -0.00004);
        let above = WeatherKey::new(WeatherKind::Current, 0.00001, 0.00004);
        assert_eq!(below.to_string(), "current:0.0000:0.0000");
        assert_eq!(below.to_string(), above.to_string());
    }

    #[test]
    fn test_search_key_is_case_insensitive() {
        assert_eq!(SearchKey::new("Paris"), SearchKey::new("paris"));
        assert_eq!(SearchKey::new("  New York ").to_string(), "search:new york");
    }

    #[test]
    fn test_city_match_tolerates_missing_optional_fields() {
        let city: CityMatch = serde_json::from_value(serde_json::json!({
            "name": "Paris",
            "lat": 48.8589,
            "lon": 2.32,
            "country": "FR"
        }))
        .unwrap();
        assert_eq!(city.state, None);
        assert_eq!(city.country, "FR");
    }
}
