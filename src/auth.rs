use crate::config::AuthConfig;
use crate::database::{DatabaseError, User};
use crate::error::ApiError;
use crate::routes::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::{errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "token";
pub const STATE_COOKIE: &str = "oauth_state";

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const GOOGLE_SCOPES: &str = "profile email";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token")]
    InvalidToken,
    #[error("User not found")]
    UnknownUser,
    #[error("Failed to sign session token: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("OAuth state mismatch")]
    StateMismatch,
    #[error("Google OAuth failed: {0}")]
    OAuth(String),
    #[error("Google OAuth request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: Uuid,
    iat: i64,
    exp: i64,
}

/// Signs and verifies the HS256 session tokens handed to the browser.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    secure_cookie: bool,
}

impl SessionKeys {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            ttl: config.token_ttl,
            secure_cookie: config.cookie_secure,
        }
    }

    pub fn issue_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        self.sign(&Claims {
            user_id,
            iat: now,
            exp: now.saturating_add(ttl),
        })
    }

    pub fn verify_token(&self, token: &str) -> Result<Uuid, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.user_id)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })
    }

    pub fn session_cookie(&self, token: &str) -> String {
        build_cookie(SESSION_COOKIE, token, self.ttl.as_secs(), self.secure_cookie)
    }

    pub fn clear_session_cookie(&self) -> String {
        build_cookie(SESSION_COOKIE, "", 0, self.secure_cookie)
    }

    pub fn state_cookie(&self, state: &str) -> String {
        build_cookie(STATE_COOKIE, state, 10 * 60, self.secure_cookie)
    }

    pub fn clear_state_cookie(&self) -> String {
        build_cookie(STATE_COOKIE, "", 0, self.secure_cookie)
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::default(), claims, &self.encoding).map_err(AuthError::Signing)
    }
}

fn build_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        name, value, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Reads a cookie value from the request's `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Session token from the cookie, falling back to an `Authorization: Bearer` header.
fn session_token(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// The signed-in user, resolved from the session token.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let user_id = state.sessions.verify_token(&token)?;

        match state.database.get_user(user_id).await {
            Ok(user) => Ok(AuthUser(user)),
            Err(DatabaseError::UserNotFound) => Err(AuthError::UnknownUser.into()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Google authorization-code flow against a fixed, configured redirect URL.
pub struct GoogleOAuth {
    client: Client,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

impl GoogleOAuth {
    pub fn new(config: &AuthConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent("WeatherDashboard/1.0")
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            redirect_url: config.oauth_redirect_url.clone(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_endpoints(mut self, base: &str) -> Self {
        self.auth_url = format!("{}/o/oauth2/v2/auth", base);
        self.token_url = format!("{}/token", base);
        self.userinfo_url = format!("{}/oauth2/v2/userinfo", base);
        self
    }

    pub fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode(GOOGLE_SCOPES),
            urlencoding::encode(state),
        )
    }

    /// Trades an authorization code for the signed-in account's profile.
    #[tracing::instrument(skip(self, code), level = "info")]
    pub async fn fetch_profile(&self, code: &str) -> Result<GoogleUserInfo, AuthError> {
        let token = self.exchange_code(code).await?;
        self.user_info(&token.access_token).await
    }

    async fn exchange_code(&self, code: &str) -> Result<GoogleTokenResponse, AuthError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_url.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthError::OAuth(format!("token exchange failed: {}", error_text)));
        }

        Ok(response.json::<GoogleTokenResponse>().await?)
    }

    async fn user_info(&self, access_token: &str) -> Result<GoogleUserInfo, AuthError> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthError::OAuth(format!("userinfo request failed: {}", error_text)));
        }

        let profile = response.json::<GoogleUserInfo>().await?;
        if profile.id.is_empty() {
            return Err(AuthError::OAuth("invalid profile data".to_string()));
        }
        Ok(profile)
    }
}
