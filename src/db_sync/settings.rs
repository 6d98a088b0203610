// =====================================================
// SYNC SETTINGS
// cPanel credentials, production URL and operation timestamps
// =====================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::db::crypto::{decrypt_password_with_key, encrypt_password_with_key};
use crate::db_types::{default_mysql_port, ConnectionProfile};
use crate::error::SyncError;

pub const CPANEL_HOST: &str = "db_sync_cpanel_host";
pub const CPANEL_DATABASE: &str = "db_sync_cpanel_database";
pub const CPANEL_USERNAME: &str = "db_sync_cpanel_username";
pub const CPANEL_PASSWORD: &str = "db_sync_cpanel_password";
pub const CPANEL_PORT: &str = "db_sync_cpanel_port";
pub const PRODUCTION_URL: &str = "db_sync_production_url";
pub const LAST_PULL: &str = "db_sync_last_pull";
pub const LAST_PUSH: &str = "db_sync_last_push";
pub const LAST_IMPORT: &str = "db_sync_last_import";

/// Flat key-value settings storage.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, String>;
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;
}

// =====================================================
// SQLITE STORE
// =====================================================

pub struct SqliteSettingsStore {
    pool: Pool<Sqlite>,
}

impl SqliteSettingsStore {
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self, String> {
        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }
}

async fn ensure_schema(pool: &Pool<Sqlite>) -> Result<(), String> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to initialize settings storage: {}", e))?;

    Ok(())
}

#[async_trait::async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ? LIMIT 1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| format!("Failed to read setting '{}': {}", key, e))?;

        match row {
            Some(row) => row
                .try_get::<String, _>("value")
                .map(Some)
                .map_err(|e| format!("Failed to decode setting '{}': {}", key, e)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to save setting '{}': {}", key, e))?;

        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.values.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// =====================================================
// TYPED VIEW
// =====================================================

/// Settings snapshot taken once per request.
#[derive(Debug, Clone, Default)]
pub struct SyncSettings {
    pub cpanel: ConnectionProfile,
    pub production_url: Option<String>,
    pub last_pull: Option<String>,
    pub last_push: Option<String>,
    pub last_import: Option<String>,
}

async fn read(store: &dyn SettingsStore, key: &str) -> Result<Option<String>, SyncError> {
    let value = store.get(key).await.map_err(SyncError::Settings)?;
    Ok(value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
}

impl SyncSettings {
    pub async fn load(store: &dyn SettingsStore, encryption_key: &[u8]) -> Result<Self, SyncError> {
        let port = match read(store, CPANEL_PORT).await? {
            Some(raw) => raw.parse::<u16>().unwrap_or_else(|_| {
                log::warn!("Ignoring invalid stored cPanel port '{}'", raw);
                default_mysql_port()
            }),
            None => default_mysql_port(),
        };

        let password = match store.get(CPANEL_PASSWORD).await.map_err(SyncError::Settings)? {
            Some(encrypted) => decrypt_password_with_key(&encrypted, encryption_key).unwrap_or_else(|e| {
                log::warn!("Stored cPanel password could not be decrypted, re-enter it: {}", e);
                String::new()
            }),
            None => String::new(),
        };

        Ok(Self {
            cpanel: ConnectionProfile {
                host: read(store, CPANEL_HOST).await?.unwrap_or_default(),
                port,
                database: read(store, CPANEL_DATABASE).await?.unwrap_or_default(),
                username: read(store, CPANEL_USERNAME).await?.unwrap_or_default(),
                password,
                driver: Default::default(),
            },
            production_url: read(store, PRODUCTION_URL).await?,
            last_pull: read(store, LAST_PULL).await?,
            last_push: read(store, LAST_PUSH).await?,
            last_import: read(store, LAST_IMPORT).await?,
        })
    }

    /// Rejects requests that need the cPanel side before anything connects.
    pub fn require_cpanel(&self) -> Result<&ConnectionProfile, SyncError> {
        let missing = self.cpanel.missing_fields();
        if missing.is_empty() {
            Ok(&self.cpanel)
        } else {
            Err(SyncError::Validation(format!(
                "cPanel database settings are incomplete (missing {})",
                missing.join(", ")
            )))
        }
    }
}

pub async fn record_timestamp(
    store: &dyn SettingsStore,
    key: &str,
    at: DateTime<Utc>,
) -> Result<(), SyncError> {
    store
        .set(key, &at.format("%Y-%m-%d %H:%M:%S").to_string())
        .await
        .map_err(SyncError::Settings)
}

// =====================================================
// UPDATES AND STATUS
// =====================================================

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub host: String,
    pub database: String,
    pub username: String,
    /// `None` keeps the stored password.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub production_url: Option<String>,
}

pub async fn save_settings(
    store: &dyn SettingsStore,
    encryption_key: &[u8],
    update: &SettingsUpdate,
) -> Result<(), SyncError> {
    let mut missing = Vec::new();
    for (name, value) in [
        ("host", &update.host),
        ("database", &update.database),
        ("username", &update.username),
    ] {
        if value.trim().is_empty() {
            missing.push(name);
        }
    }
    if !missing.is_empty() {
        return Err(SyncError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    let production_url = update
        .production_url
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if !production_url.is_empty()
        && !(production_url.starts_with("http://") || production_url.starts_with("https://"))
    {
        return Err(SyncError::Validation(
            "Production URL must start with http:// or https://".to_string(),
        ));
    }

    let port = update.port.unwrap_or_else(default_mysql_port).to_string();
    for (key, value) in [
        (CPANEL_HOST, update.host.trim()),
        (CPANEL_DATABASE, update.database.trim()),
        (CPANEL_USERNAME, update.username.trim()),
        (CPANEL_PORT, port.as_str()),
        (PRODUCTION_URL, production_url),
    ] {
        store.set(key, value).await.map_err(SyncError::Settings)?;
    }

    if let Some(password) = &update.password {
        let encrypted =
            encrypt_password_with_key(password, encryption_key).map_err(SyncError::Settings)?;
        store
            .set(CPANEL_PASSWORD, &encrypted)
            .await
            .map_err(SyncError::Settings)?;
    }

    log::info!(
        "Saved cPanel settings for {}:{}/{}",
        update.host.trim(),
        port,
        update.database.trim()
    );
    Ok(())
}

#[derive(Serialize, Debug, Clone)]
pub struct SyncStatus {
    pub configured: bool,
    pub cpanel_host: String,
    pub cpanel_port: u16,
    pub cpanel_database: String,
    pub cpanel_username: String,
    pub production_url: Option<String>,
    pub last_pull: Option<String>,
    pub last_push: Option<String>,
    pub last_import: Option<String>,
}

impl From<&SyncSettings> for SyncStatus {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            configured: settings.cpanel.missing_fields().is_empty(),
            cpanel_host: settings.cpanel.host.clone(),
            cpanel_port: settings.cpanel.port,
            cpanel_database: settings.cpanel.database.clone(),
            cpanel_username: settings.cpanel.username.clone(),
            production_url: settings.production_url.clone(),
            last_pull: settings.last_pull.clone(),
            last_push: settings.last_push.clone(),
            last_import: settings.last_import.clone(),
        }
    }
}
