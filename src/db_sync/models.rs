use serde::{Deserialize, Serialize};

use crate::db::backup::BackupArtifact;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// cPanel into local.
    Pull,
    /// Local into cPanel.
    Push,
    /// Uploaded script into local.
    Import,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Pull => "pull",
            SyncDirection::Push => "push",
            SyncDirection::Import => "import",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Full,
    StructureOnly,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Validating,
    BackingUp,
    Extracting,
    UrlRewriting,
    Applying,
    Finalizing,
    Done,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Validating => "validating",
            SyncPhase::BackingUp => "backing_up",
            SyncPhase::Extracting => "extracting",
            SyncPhase::UrlRewriting => "url_rewriting",
            SyncPhase::Applying => "applying",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        }
    }

}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Warning,
    Error,
    Info,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// 1-based position in the operation log.
    pub step: usize,
    pub phase: String,
    pub status: LogStatus,
    pub message: String,
}

/// Ordered step log returned with every pull/push/import, also on failure.
///
/// Entries are mirrored to the `log` facade tagged with the operation id.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct SyncOperationLog {
    #[serde(skip)]
    operation_id: String,
    entries: Vec<LogEntry>,
}

impl SyncOperationLog {
    pub fn new(operation_id: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, phase: &str, status: LogStatus, message: impl Into<String>) {
        let message = message.into();
        let step = self.entries.len() + 1;
        match status {
            LogStatus::Error | LogStatus::Warning => {
                log::warn!("[{}] #{} {}: {}", self.operation_id, step, phase, message)
            }
            LogStatus::Info => log::info!("[{}] #{} {}: {}", self.operation_id, step, phase, message),
            LogStatus::Success => {
                log::debug!("[{}] #{} {}: {}", self.operation_id, step, phase, message)
            }
        }
        self.entries.push(LogEntry {
            step,
            phase: phase.to_string(),
            status,
            message,
        });
    }

    pub fn info(&mut self, phase: &str, message: impl Into<String>) {
        self.push(phase, LogStatus::Info, message);
    }

    pub fn success(&mut self, phase: &str, message: impl Into<String>) {
        self.push(phase, LogStatus::Success, message);
    }

    pub fn warning(&mut self, phase: &str, message: impl Into<String>) {
        self.push(phase, LogStatus::Warning, message);
    }

    pub fn error(&mut self, phase: &str, message: impl Into<String>) {
        self.push(phase, LogStatus::Error, message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    CompletedWithErrors,
    #[serde(rename = "error")]
    Failed,
}

/// Result of a pull, push or import, whatever phase it ended in.
#[derive(Serialize, Debug, Clone)]
pub struct SyncOutcome {
    pub operation_id: String,
    pub direction: SyncDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SyncMode>,
    pub status: OutcomeStatus,
    /// Phase the operation finished in: `done` or `failed`.
    pub phase: SyncPhase,
    /// Phase that failed, when `phase` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<SyncPhase>,
    pub message: String,
    pub executed: usize,
    pub errors: usize,
    pub log: SyncOperationLog,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupArtifact>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PullRequest {
    #[serde(default)]
    pub pull_mode: SyncMode,
    #[serde(default)]
    pub create_backup: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PushRequest {
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub create_backup: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone)]
pub struct ExportRequest {
    #[serde(default = "default_true")]
    pub structure: bool,
    #[serde(default = "default_true")]
    pub data: bool,
    #[serde(default = "default_true")]
    pub drop_tables: bool,
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self {
            structure: true,
            data: true,
            drop_tables: true,
        }
    }
}

impl ExportRequest {
    pub fn validate(&self) -> Result<(), String> {
        if !self.structure && !self.data {
            return Err("Select at least one of structure or data to export".to_string());
        }
        Ok(())
    }
}
