// =====================================================
// BACKUP SNAPSHOTTER
// Timestamped full dumps written before destructive operations
// =====================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use super::data_transfer::{dump_database, render_sql_script, DumpOptions};
use super::sql_utils::write_text_file;
use super::SyncDatabase;
use crate::error::SyncError;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub source_database: String,
    pub size_bytes: u64,
    pub sha256: String,
}

pub struct BackupSnapshotter {
    dir: PathBuf,
}

fn sanitize_file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Writes through a `.partial` sibling so a failed write never leaves a
/// truncated snapshot under the final name.
fn write_snapshot_file(path: &Path, script: &str) -> Result<(), String> {
    let partial = path.with_extension("sql.partial");
    let result = write_text_file(&partial, script).and_then(|_| {
        fs::rename(&partial, path).map_err(|e| format!("Failed to move backup into place: {}", e))
    });
    if result.is_err() && partial.exists() {
        if let Err(e) = fs::remove_file(&partial) {
            log::warn!("Could not remove partial backup {}: {}", partial.display(), e);
        }
    }
    result
}

impl BackupSnapshotter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_name_for(label: &str, database: &str, at: DateTime<Utc>) -> String {
        format!(
            "backup_{}_{}_{}.sql",
            sanitize_file_component(label),
            sanitize_file_component(database),
            at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Dumps structure and data of `db` into a new file under the backups directory.
    pub async fn snapshot(&self, db: &dyn SyncDatabase, label: &str) -> Result<BackupArtifact, SyncError> {
        let created_at = Utc::now();
        let options = DumpOptions::backup();
        let statements = dump_database(db, None, options)
            .await
            .map_err(|e| SyncError::Backup(e.to_string()))?;
        let script = render_sql_script(db.database_name(), &statements, options);

        let path = self
            .dir
            .join(Self::file_name_for(label, db.database_name(), created_at));
        write_snapshot_file(&path, &script)
            .map_err(|e| SyncError::Backup(format!("{}: {}", path.display(), e)))?;

        let artifact = BackupArtifact {
            sha256: hex::encode(Sha256::digest(script.as_bytes())),
            size_bytes: script.len() as u64,
            source_database: db.database_name().to_string(),
            created_at,
            path,
        };
        log::info!(
            "Backup of {} database '{}' written to {} ({} bytes)",
            label,
            artifact.source_database,
            artifact.path.display(),
            artifact.size_bytes
        );
        Ok(artifact)
    }
}
