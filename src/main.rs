use axum::http::{header, HeaderValue, Method};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod config;
mod database;
mod error;
mod routes;
mod weather;

use auth::{GoogleOAuth, SessionKeys};
use config::Config;
use database::Database;
use routes::{create_router, AppState};
use weather::WeatherProxy;

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_dashboard_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = sqlx::SqlitePool::connect(&config.database_url).await?;
    let database = Arc::new(Database::new(pool));
    database.init_tables().await?;

    let weather = Arc::new(WeatherProxy::new(config.weather.clone())?);
    let sessions = Arc::new(SessionKeys::new(&config.auth));
    let google = Arc::new(GoogleOAuth::new(&config.auth)?);

    // Expired entries are otherwise only dropped when read again.
    let sweeper = weather.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let purged = sweeper.purge_expired();
            if purged > 0 {
                tracing::debug!(
                    "Purged {} expired cache entries, {} still live",
                    purged,
                    sweeper.cached_entries()
                );
            }
        }
    });

    let cors = cors_layer(&config.auth.client_url)?;
    let addr = format!("0.0.0.0:{}", config.port);

    let state = AppState {
        config: Arc::new(config),
        database,
        weather,
        sessions,
        google,
    };

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server starting on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(client_url: &str) -> anyhow::Result<CorsLayer> {
    let mut origins = vec![
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://localhost:3001"),
    ];
    let configured: HeaderValue = client_url.parse()?;
    if !origins.contains(&configured) {
        origins.push(configured);
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}
