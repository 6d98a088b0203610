// =====================================================
// CONFIGURATION
// Command line / environment options and the derived runtime config
// =====================================================

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::db_types::{ConnectionProfile, DatabaseDriver};

#[derive(Parser, Debug, Clone)]
#[command(name = "sitesync", about = "Compare and sync a local MySQL database with its cPanel copy")]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    #[arg(long, default_value = "127.0.0.1:8787", env = "SITESYNC_BIND")]
    pub bind: SocketAddr,

    /// Directory for settings, the encryption key and backups
    #[arg(long, env = "SITESYNC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Where backups are written (defaults to <data dir>/backups)
    #[arg(long, env = "SITESYNC_BACKUPS_DIR")]
    pub backups_dir: Option<PathBuf>,

    /// Local MySQL host
    #[arg(long, default_value = "127.0.0.1", env = "SITESYNC_LOCAL_HOST")]
    pub local_host: String,

    #[arg(long, default_value = "3306", env = "SITESYNC_LOCAL_PORT")]
    pub local_port: u16,

    #[arg(long, default_value = "", env = "SITESYNC_LOCAL_DATABASE")]
    pub local_database: String,

    #[arg(long, default_value = "root", env = "SITESYNC_LOCAL_USERNAME")]
    pub local_username: String,

    #[arg(long, default_value = "", env = "SITESYNC_LOCAL_PASSWORD", hide_env_values = true)]
    pub local_password: String,

    /// Seconds to wait for a database connection
    #[arg(long, default_value = "10", env = "SITESYNC_CONNECT_TIMEOUT")]
    pub connect_timeout_secs: u64,

    /// Local URL prefixes replaced by the production URL on push
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost:8080,http://localhost:8000",
        env = "SITESYNC_LOCALHOST_PATTERNS"
    )]
    pub localhost_patterns: Vec<String>,
}

impl ServerConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sitesync")
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            local: ConnectionProfile {
                host: self.local_host.clone(),
                port: self.local_port,
                database: self.local_database.clone(),
                username: self.local_username.clone(),
                password: self.local_password.clone(),
                driver: DatabaseDriver::MySQL,
            },
            backups_dir: self
                .backups_dir
                .clone()
                .unwrap_or_else(|| self.data_dir().join("backups")),
            localhost_patterns: self
                .localhost_patterns
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
        }
    }
}

/// Settings fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub local: ConnectionProfile,
    pub backups_dir: PathBuf,
    pub localhost_patterns: Vec<String>,
    pub connect_timeout: Duration,
}
