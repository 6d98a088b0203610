// =====================================================
// ERROR TAXONOMY
// Classified failures surfaced by compare/pull/push/import/export
// =====================================================

use serde::Serialize;
use thiserror::Error;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    AuthFailed,
    HostUnreachable,
    DatabaseMissing,
    Unknown,
}

impl ConnectionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionErrorKind::AuthFailed => "auth_failed",
            ConnectionErrorKind::HostUnreachable => "host_unreachable",
            ConnectionErrorKind::DatabaseMissing => "database_missing",
            ConnectionErrorKind::Unknown => "unknown",
        }
    }

    pub fn suggestions(&self) -> Vec<String> {
        let items: &[&str] = match self {
            ConnectionErrorKind::AuthFailed => &[
                "Check the username and password",
                "Make sure the user is assigned to the database in cPanel",
                "Add this server's IP address under Remote MySQL in cPanel",
            ],
            ConnectionErrorKind::HostUnreachable => &[
                "Check the host name and port",
                "Make sure the MySQL server is running and accepts remote connections",
                "Check firewall rules between this machine and the server",
            ],
            ConnectionErrorKind::DatabaseMissing => &[
                "Check the database name (cPanel prefixes it with the account name)",
                "Create the database before syncing",
            ],
            ConnectionErrorKind::Unknown => &[
                "Check the host, port, database name and credentials",
                "Look at the server log for more details",
            ],
        };
        items.iter().map(|item| item.to_string()).collect()
    }
}

#[derive(Error, Debug, Clone)]
#[error("Could not connect to {side} database: {message}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub side: String,
    pub message: String,
}

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind, side: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            side: side.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("Failed to inspect {scope}: {message}")]
    Schema { scope: String, message: String },
    #[error("Backup failed: {0}")]
    Backup(String),
    #[error("Settings error: {0}")]
    Settings(String),
    #[error("Extraction failed: {0}")]
    Extraction(String),
    #[error("Replay failed: {0}")]
    Replay(String),
}

impl SyncError {
    pub fn schema(scope: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Schema {
            scope: scope.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Validation(_) => "validation_error",
            SyncError::Connection(_) => "connection_error",
            SyncError::Schema { .. } => "schema_error",
            SyncError::Backup(_) => "backup_error",
            SyncError::Settings(_) => "settings_error",
            SyncError::Extraction(_) => "extraction_error",
            SyncError::Replay(_) => "statement_error",
        }
    }

    pub fn suggestions(&self) -> Vec<String> {
        match self {
            SyncError::Connection(err) => err.kind.suggestions(),
            SyncError::Backup(_) => vec![
                "Check free disk space and permissions of the backups directory".to_string(),
                "Disable the backup option only if you already have a recent copy".to_string(),
            ],
            _ => Vec::new(),
        }
    }
}
