use std::fs;
use std::path::{Path, PathBuf};

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

pub fn local_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("storage").join("local.db")
}

/// Opens (creating on first run) the SQLite file that holds sync settings.
pub async fn init_local_db(data_dir: &Path) -> Result<Pool<Sqlite>, String> {
    let db_path = local_db_path(data_dir);
    if let Some(storage_dir) = db_path.parent() {
        fs::create_dir_all(storage_dir)
            .map_err(|e| format!("Failed to create storage directory: {}", e))?;
    }

    if !db_path.exists() {
        fs::File::create(&db_path).map_err(|e| format!("Failed to create local DB: {}", e))?;
    }
    let db_url = format!("sqlite:{}", db_path.to_string_lossy());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .map_err(|e| format!("Failed to connect to local DB: {}", e))?;

    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await
        .map_err(|e| format!("Failed to set WAL mode: {}", e))?;

    log::debug!("Local settings database at {}", db_path.display());
    Ok(pool)
}
