// =====================================================
// CONNECTION MANAGEMENT MODULE
// Opens local/cPanel handles, classifies failures, probes servers
// =====================================================

use sqlx::mysql::MySqlDatabaseError;
use std::sync::Arc;
use std::time::Duration;

use super::SyncDatabase;
use crate::db_types::{ConnectionProfile, ServerProbe};
use crate::error::{ConnectionError, ConnectionErrorKind, SyncError};
use crate::mysql::{self, MySqlDatabase};

pub const LOCAL_LABEL: &str = "local";
pub const REMOTE_LABEL: &str = "cpanel";

/// Turns a profile into a live handle. The HTTP layer holds one of these so
/// tests can swap in in-memory databases.
#[async_trait::async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
        label: &str,
    ) -> Result<Arc<dyn SyncDatabase>, ConnectionError>;
}

pub struct MySqlConnector {
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait::async_trait]
impl DatabaseConnector for MySqlConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
        label: &str,
    ) -> Result<Arc<dyn SyncDatabase>, ConnectionError> {
        let database = connect(profile, label, self.connect_timeout).await?;
        Ok(Arc::new(database))
    }
}

// =====================================================
// ERROR CLASSIFICATION
// =====================================================

/// Maps a MySQL error number and/or driver message to a failure class.
pub fn classify_connection_failure(error_number: Option<u16>, message: &str) -> ConnectionErrorKind {
    match error_number {
        Some(1044) | Some(1045) | Some(1698) | Some(1251) => return ConnectionErrorKind::AuthFailed,
        Some(1049) => return ConnectionErrorKind::DatabaseMissing,
        Some(1129) | Some(1130) => return ConnectionErrorKind::AuthFailed,
        Some(2002) | Some(2003) | Some(2005) | Some(2006) | Some(2013) => {
            return ConnectionErrorKind::HostUnreachable
        }
        _ => {}
    }

    let lowered = message.to_ascii_lowercase();
    if lowered.contains("access denied") {
        ConnectionErrorKind::AuthFailed
    } else if lowered.contains("unknown database") {
        ConnectionErrorKind::DatabaseMissing
    } else if lowered.contains("os error 111")
        || lowered.contains("connection refused")
        || lowered.contains("timed out")
        || lowered.contains("failed to lookup address")
        || lowered.contains("name or service not known")
        || lowered.contains("no route to host")
        || lowered.contains("network is unreachable")
    {
        ConnectionErrorKind::HostUnreachable
    } else {
        ConnectionErrorKind::Unknown
    }
}

pub fn classify_sqlx_error(err: &sqlx::Error) -> ConnectionErrorKind {
    match err {
        sqlx::Error::Database(db_err) => {
            let number = db_err
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|mysql_err| mysql_err.number());
            classify_connection_failure(number, db_err.message())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => ConnectionErrorKind::HostUnreachable,
        other => classify_connection_failure(None, &other.to_string()),
    }
}

// =====================================================
// CONNECT / PROBE
// =====================================================

pub async fn connect(
    profile: &ConnectionProfile,
    label: &str,
    connect_timeout: Duration,
) -> Result<MySqlDatabase, ConnectionError> {
    let missing = profile.missing_fields();
    if !missing.is_empty() {
        return Err(ConnectionError::new(
            ConnectionErrorKind::Unknown,
            label,
            format!("missing {}", missing.join(", ")),
        ));
    }

    log::debug!(
        "Connecting to {} database {}:{}/{}",
        label,
        profile.host,
        profile.port,
        profile.database
    );

    let pool = match tokio::time::timeout(connect_timeout, mysql::create_pool(profile, connect_timeout)).await {
        Ok(Ok(pool)) => pool,
        Ok(Err(e)) => {
            let kind = classify_sqlx_error(&e);
            log::warn!("Connection to {} database failed ({}): {}", label, kind.as_str(), e);
            return Err(ConnectionError::new(kind, label, e.to_string()));
        }
        Err(_) => {
            log::warn!("Connection to {} database timed out", label);
            return Err(ConnectionError::new(
                ConnectionErrorKind::HostUnreachable,
                label,
                format!(
                    "The server at {}:{} did not respond within {} seconds",
                    profile.host,
                    profile.port,
                    connect_timeout.as_secs()
                ),
            ));
        }
    };

    Ok(MySqlDatabase::new(pool, label, profile.database.trim()))
}

/// Read-only connectivity check.
pub async fn probe(database: &dyn SyncDatabase) -> Result<ServerProbe, ConnectionError> {
    database.probe().await.map_err(|message| {
        let kind = classify_connection_failure(None, &message);
        ConnectionError::new(kind, database.label(), message)
    })
}

/// Backs the "test connection" operation: validate, connect, probe.
pub async fn test_connection(
    connector: &dyn DatabaseConnector,
    profile: &ConnectionProfile,
) -> Result<ServerProbe, SyncError> {
    let missing = profile.missing_fields();
    if !missing.is_empty() {
        return Err(SyncError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    let database = connector.connect(profile, REMOTE_LABEL).await?;
    let result = probe(database.as_ref()).await?;
    log::info!(
        "Connection test to {}:{}/{} succeeded ({} tables, server {})",
        profile.host,
        profile.port,
        profile.database,
        result.table_count,
        result.server_version
    );
    Ok(result)
}
