use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),
    #[error("User not found")]
    UserNotFound,
    #[error("Favorite not found")]
    FavoriteNotFound,
    #[error("City already in favorites")]
    DuplicateFavorite,
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "celsius",
            TemperatureUnit::Fahrenheit => "fahrenheit",
        }
    }
}

impl FromStr for TemperatureUnit {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "celsius" => Ok(TemperatureUnit::Celsius),
            "fahrenheit" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(DatabaseError::InvalidData(format!(
                "unknown temperature unit: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub temperature_unit: TemperatureUnit,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub preferences: Preferences,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub city: String,
    pub country: String,
    pub coordinates: Coordinates,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGoogleUser {
    pub google_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewFavorite {
    pub city: String,
    pub country: String,
    pub coordinates: Coordinates,
}

const USER_COLUMNS: &str =
    "SELECT id, email, name, picture, temperature_unit, created_at, updated_at FROM users";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    picture: Option<String>,
    temperature_unit: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            picture: row.picture,
            preferences: Preferences {
                temperature_unit: row.temperature_unit.parse()?,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FavoriteRow {
    id: Uuid,
    city: String,
    country: String,
    lat: f64,
    lon: f64,
    added_at: chrono::DateTime<chrono::Utc>,
}

impl From<FavoriteRow> for Favorite {
    fn from(row: FavoriteRow) -> Self {
        Favorite {
            id: row.id,
            city: row.city,
            country: row.country,
            coordinates: Coordinates {
                lat: row.lat,
                lon: row.lon,
            },
            added_at: row.added_at,
        }
    }
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BLOB PRIMARY KEY,
                google_id TEXT UNIQUE,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                picture TEXT,
                temperature_unit TEXT NOT NULL DEFAULT 'celsius'
                    CHECK (temperature_unit IN ('celsius', 'fahrenheit')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS favorites (
                id BLOB PRIMARY KEY,
                user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                city TEXT NOT NULL,
                country TEXT NOT NULL DEFAULT '',
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                added_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_favorites_user_id ON favorites(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Returns the user linked to `google_id`, creating it on first login.
    pub async fn upsert_google_user(&self, profile: NewGoogleUser) -> Result<User, DatabaseError> {
        let existing = sqlx::query_as::<_, UserRow>(&format!("{} WHERE google_id = ?1", USER_COLUMNS))
            .bind(&profile.google_id)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = existing {
            return row.try_into();
        }

        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (id, google_id, email, name, picture, temperature_unit, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(id)
        .bind(&profile.google_id)
        .bind(profile.email.unwrap_or_else(|| "unknown@example.com".to_string()))
        .bind(profile.name.unwrap_or_else(|| "User".to_string()))
        .bind(profile.picture.unwrap_or_default())
        .bind(TemperatureUnit::default().as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!("Created user {} for Google account", id);
        self.get_user(id).await
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, UserRow>(&format!("{} WHERE id = ?1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DatabaseError::UserNotFound)?
            .try_into()
    }

    pub async fn list_favorites(&self, user_id: Uuid) -> Result<Vec<Favorite>, DatabaseError> {
        let rows = sqlx::query_as::<_, FavoriteRow>(
            "SELECT id, city, country, lat, lon, added_at FROM favorites WHERE user_id = ?1 ORDER BY added_at, rowid",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Favorite::from).collect())
    }

    /// Adds a favorite and returns the user's full list.
    pub async fn add_favorite(
        &self,
        user_id: Uuid,
        favorite: NewFavorite,
    ) -> Result<Vec<Favorite>, DatabaseError> {
        let duplicates: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM favorites WHERE user_id = ?1 AND city = ?2 AND lat = ?3 AND lon = ?4",
        )
        .bind(user_id)
        .bind(&favorite.city)
        .bind(favorite.coordinates.lat)
        .bind(favorite.coordinates.lon)
        .fetch_one(&self.pool)
        .await?;
        if duplicates > 0 {
            return Err(DatabaseError::DuplicateFavorite);
        }

        sqlx::query(
            r#"
            INSERT INTO favorites (id, user_id, city, country, lat, lon, added_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&favorite.city)
        .bind(&favorite.country)
        .bind(favorite.coordinates.lat)
        .bind(favorite.coordinates.lon)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        self.list_favorites(user_id).await
    }

    /// Removes one of the user's favorites and returns what is left.
    pub async fn remove_favorite(
        &self,
        user_id: Uuid,
        favorite_id: Uuid,
    ) -> Result<Vec<Favorite>, DatabaseError> {
        let result = sqlx::query("DELETE FROM favorites WHERE id = ?1 AND user_id = ?2")
            .bind(favorite_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::FavoriteNotFound);
        }

        self.list_favorites(user_id).await
    }

    pub async fn update_preferences(
        &self,
        user_id: Uuid,
        preferences: Preferences,
    ) -> Result<Preferences, DatabaseError> {
        let result = sqlx::query(
            "UPDATE users SET temperature_unit = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(preferences.temperature_unit.as_str())
        .bind(chrono::Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::UserNotFound);
        }

        Ok(preferences)
    }

    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_database() -> Database {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let database = Database::new(pool);
    database.init_tables().await.unwrap();
    database
}
