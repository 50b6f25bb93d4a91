use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap},
    response::{AppendHeaders, IntoResponse, Json, Redirect, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::{cookie_value, AuthError, AuthUser, GoogleOAuth, SessionKeys, STATE_COOKIE},
    config::Config,
    database::{
        Coordinates, Database, Favorite, NewFavorite, NewGoogleUser, Preferences, TemperatureUnit,
    },
    error::ApiError,
    weather::{CityMatch, CombinedWeather, WeatherProxy},
};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Arc<Database>,
    pub weather: Arc<WeatherProxy>,
    pub sessions: Arc<SessionKeys>,
    pub google: Arc<GoogleOAuth>,
}

// Request/Response types
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CoordinatesQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CoordinatesBody {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AddFavoriteRequest {
    pub city: Option<String>,
    pub country: Option<String>,
    pub coordinates: Option<CoordinatesBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesRequest {
    pub temperature_unit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub database: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub preferences: Preferences,
    pub favorites: Vec<Favorite>,
}

/// Parses and range-checks the `lat`/`lon` query pair.
fn parse_coordinates(query: &CoordinatesQuery) -> Result<(f64, f64), ApiError> {
    let parse = |raw: &Option<String>| {
        raw.as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };
    let (Some(lat), Some(lon)) = (parse(&query.lat), parse(&query.lon)) else {
        return Err(ApiError::bad_request("Latitude and longitude are required"));
    };

    if !(-90.0..=90.0).contains(&lat) {
        return Err(ApiError::bad_request(format!(
            "Invalid latitude: {}. Must be between -90 and 90",
            lat
        )));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(ApiError::bad_request(format!(
            "Invalid longitude: {}. Must be between -180 and 180",
            lon
        )));
    }
    Ok((lat, lon))
}

// Route handlers
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.database.health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("Database health check failed: {}", e);
            "unavailable"
        }
    };

    Json(HealthResponse {
        status: "OK".to_string(),
        message: "Weather dashboard API is running".to_string(),
        database: database.to_string(),
        timestamp: chrono::Utc::now(),
    })
}

pub async fn search_cities(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<CityMatch>>, ApiError> {
    let Some(query) = params.q else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(state.weather.search_cities(&query).await?))
}

pub async fn current_weather(
    State(state): State<AppState>,
    Query(params): Query<CoordinatesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (lat, lon) = parse_coordinates(&params)?;
    Ok(Json(state.weather.get_current_weather(lat, lon).await?))
}

pub async fn forecast(
    State(state): State<AppState>,
    Query(params): Query<CoordinatesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (lat, lon) = parse_coordinates(&params)?;
    Ok(Json(state.weather.get_forecast(lat, lon).await?))
}

pub async fn all_weather(
    State(state): State<AppState>,
    Query(params): Query<CoordinatesQuery>,
) -> Result<Json<CombinedWeather>, ApiError> {
    let (lat, lon) = parse_coordinates(&params)?;
    Ok(Json(state.weather.get_all(lat, lon).await?))
}

pub async fn google_login(State(state): State<AppState>) -> impl IntoResponse {
    let oauth_state = Uuid::new_v4().to_string();
    let url = state.google.authorization_url(&oauth_state);
    (
        AppendHeaders([(header::SET_COOKIE, state.sessions.state_cookie(&oauth_state))]),
        Redirect::to(&url),
    )
}

async fn complete_login(
    state: &AppState,
    params: OAuthCallbackQuery,
    headers: &HeaderMap,
) -> Result<String, AuthError> {
    if let Some(error) = params.error {
        return Err(AuthError::OAuth(error));
    }
    let code = params
        .code
        .ok_or_else(|| AuthError::OAuth("missing authorization code".to_string()))?;

    let expected = cookie_value(headers, STATE_COOKIE);
    if expected.is_none() || expected != params.state {
        return Err(AuthError::StateMismatch);
    }

    let profile = state.google.fetch_profile(&code).await?;
    let user = state
        .database
        .upsert_google_user(NewGoogleUser {
            google_id: profile.id,
            email: profile.email,
            name: profile.name,
            picture: profile.picture,
        })
        .await
        .map_err(|e| AuthError::OAuth(e.to_string()))?;

    state.sessions.issue_token(user.id)
}

pub async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<OAuthCallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let client_url = &state.config.auth.client_url;
    match complete_login(&state, params, &headers).await {
        Ok(token) => (
            AppendHeaders([
                (header::SET_COOKIE, state.sessions.session_cookie(&token)),
                (header::SET_COOKIE, state.sessions.clear_state_cookie()),
            ]),
            Redirect::to(&format!("{}/dashboard", client_url)),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("OAuth callback failed: {}", e);
            (
                AppendHeaders([(header::SET_COOKIE, state.sessions.clear_state_cookie())]),
                Redirect::to(&format!("{}/login", client_url)),
            )
                .into_response()
        }
    }
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        AppendHeaders([(header::SET_COOKIE, state.sessions.clear_session_cookie())]),
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    )
}

pub async fn me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    let favorites = state.database.list_favorites(user.id).await?;
    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        picture: user.picture,
        preferences: user.preferences,
        favorites,
    }))
}

pub async fn list_favorites(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Favorite>>, ApiError> {
    Ok(Json(state.database.list_favorites(user.id).await?))
}

pub async fn add_favorite(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<AddFavoriteRequest>, JsonRejection>,
) -> Result<Json<Vec<Favorite>>, ApiError> {
    const INVALID: &str = "City and valid coordinates (lat, lon) are required";

    let Json(request) = payload.map_err(|_| ApiError::bad_request(INVALID))?;
    let city = request
        .city
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request(INVALID))?;
    let coordinates = match request.coordinates {
        Some(CoordinatesBody {
            lat: Some(lat),
            lon: Some(lon),
        }) if lat.is_finite() && lon.is_finite() => Coordinates { lat, lon },
        _ => return Err(ApiError::bad_request(INVALID)),
    };

    let favorites = state
        .database
        .add_favorite(
            user.id,
            NewFavorite {
                city,
                country: request.country.unwrap_or_default(),
                coordinates,
            },
        )
        .await?;
    Ok(Json(favorites))
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(favorite_id): Path<String>,
) -> Result<Json<Vec<Favorite>>, ApiError> {
    let favorite_id = Uuid::parse_str(&favorite_id)
        .map_err(|_| ApiError::NotFound("Favorite not found".to_string()))?;
    Ok(Json(state.database.remove_favorite(user.id, favorite_id).await?))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<PreferencesRequest>, JsonRejection>,
) -> Result<Json<Preferences>, ApiError> {
    let temperature_unit = payload
        .ok()
        .and_then(|Json(request)| request.temperature_unit)
        .and_then(|unit| unit.parse::<TemperatureUnit>().ok())
        .ok_or_else(|| ApiError::bad_request("Invalid temperature unit"))?;

    let preferences = state
        .database
        .update_preferences(user.id, Preferences { temperature_unit })
        .await?;
    Ok(Json(preferences))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("Route not found".to_string())
}

// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/weather/search", get(search_cities))
        .route("/api/weather/current", get(current_weather))
        .route("/api/weather/forecast", get(forecast))
        .route("/api/weather/all", get(all_weather))
        .route("/api/auth/google", get(google_login))
        .route("/api/auth/google/callback", get(google_callback))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/favorites", get(list_favorites).post(add_favorite))
        .route("/api/favorites/preferences", put(update_preferences))
        .route("/api/favorites/:id", delete(remove_favorite))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .with_state(state)
}
