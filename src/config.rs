use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub weather: WeatherConfig,
    pub auth: AuthConfig,
}

/// Settings for the upstream weather provider and the proxy cache in front of it.
#[derive(Clone, Debug)]
pub struct WeatherConfig {
    /// `None` makes every upstream fetch fail with a configuration error.
    pub api_key: Option<String>,
    pub weather_base_url: String,
    pub geo_base_url: String,
    pub request_timeout: Duration,
    pub current_ttl: Duration,
    pub forecast_ttl: Duration,
    pub search_ttl: Duration,
    pub search_limit: usize,
    pub cache_capacity: usize,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            weather_base_url: "https://api.openweathermap.org/data/2.5".to_string(),
            geo_base_url: "https://api.openweathermap.org/geo/1.0".to_string(),
            request_timeout: Duration::from_secs(10),
            current_ttl: Duration::from_secs(60),
            forecast_ttl: Duration::from_secs(60),
            search_ttl: Duration::from_secs(3600),
            search_limit: 5,
            cache_capacity: 1000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub google_client_id: String,
    pub google_client_secret: String,
    /// Where Google sends the user back to; must match the OAuth client registration.
    pub oauth_redirect_url: String,
    /// Browser client origin, used for CORS and post-login redirects.
    pub client_url: String,
    pub cookie_secure: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "5001".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid port number"))?;

        let defaults = WeatherConfig::default();
        let weather = WeatherConfig {
            api_key: env::var("WEATHER_API_KEY").ok().filter(|key| !key.trim().is_empty()),
            weather_base_url: env::var("WEATHER_BASE_URL").unwrap_or(defaults.weather_base_url),
            geo_base_url: env::var("GEO_BASE_URL").unwrap_or(defaults.geo_base_url),
            request_timeout: match env::var("WEATHER_TIMEOUT_SECS") {
                Ok(raw) => Duration::from_secs(
                    raw.parse()
                        .map_err(|_| anyhow::anyhow!("WEATHER_TIMEOUT_SECS must be an integer"))?,
                ),
                Err(_) => defaults.request_timeout,
            },
            cache_capacity: match env::var("WEATHER_CACHE_CAPACITY") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| anyhow::anyhow!("WEATHER_CACHE_CAPACITY must be an integer"))?,
                Err(_) => defaults.cache_capacity,
            },
            ..defaults
        };

        let auth = AuthConfig {
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET not set"))?,
            token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            google_client_id: env::var("GOOGLE_CLIENT_ID").unwrap_or_default(),
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            oauth_redirect_url: env::var("OAUTH_REDIRECT_URL").unwrap_or_else(|_| {
                format!("http://localhost:{}/api/auth/google/callback", port)
            }),
            client_url: env::var("CLIENT_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string())
                .trim_end_matches('/')
                .to_string(),
            cookie_secure: env::var("COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        if weather.api_key.is_none() {
            tracing::warn!("WEATHER_API_KEY is not set; weather requests will fail");
        }

        Ok(Config {
            port,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./weather_dashboard.db?mode=rwc".to_string()),
            weather,
            auth,
        })
    }
}
