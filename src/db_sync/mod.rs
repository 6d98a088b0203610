// =====================================================
// SYNC ORCHESTRATOR
// compare / pull / push / import / export between local and cPanel
// =====================================================

pub mod commands;
pub mod locks;
pub mod models;
pub mod settings;

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::backup::{BackupArtifact, BackupSnapshotter};
use crate::db::connections::{self, LOCAL_LABEL, REMOTE_LABEL};
use crate::db::data_compare::{self, ComparisonReport};
use crate::db::data_transfer::{
    dump_database, render_sql_script, replay_statements, rewrite_urls, statements_from_script,
    DumpOptions, ReplayStats, SqlStatement, StatementPhase,
};
use crate::db::SyncDatabase;
use crate::db_types::{AppState, ConnectionProfile};
use crate::error::SyncError;
use models::{
    ExportRequest, OutcomeStatus, SyncDirection, SyncMode, SyncOperationLog, SyncOutcome,
    SyncPhase,
};
use settings::{SyncSettings, SyncStatus};

// =====================================================
// OPERATION STATE
// =====================================================

/// One pull/push/import walking through the phase state machine.
struct Operation {
    id: String,
    direction: SyncDirection,
    mode: Option<SyncMode>,
    phase: SyncPhase,
    log: SyncOperationLog,
    backup: Option<BackupArtifact>,
}

impl Operation {
    fn new(direction: SyncDirection, mode: Option<SyncMode>) -> Self {
        let id = Uuid::new_v4().to_string();
        log::info!("[{}] Starting {} ({:?})", id, direction.as_str(), mode.unwrap_or_default());
        Self {
            log: SyncOperationLog::new(&id),
            id,
            direction,
            mode,
            phase: SyncPhase::Idle,
            backup: None,
        }
    }

    fn enter(&mut self, phase: SyncPhase) {
        log::debug!("[{}] {} -> {}", self.id, self.phase.as_str(), phase.as_str());
        self.phase = phase;
    }

    fn phase_name(&self) -> &'static str {
        self.phase.as_str()
    }

    fn title(&self) -> &'static str {
        match self.direction {
            SyncDirection::Pull => "Pull",
            SyncDirection::Push => "Push",
            SyncDirection::Import => "Import",
        }
    }

    fn fail(mut self, message: String, stats: ReplayStats) -> SyncOutcome {
        let step = self.phase_name();
        self.log.error(step, message.clone());
        log::error!("[{}] {} failed during {}: {}", self.id, self.title(), step, message);
        SyncOutcome {
            operation_id: self.id,
            direction: self.direction,
            mode: self.mode,
            status: OutcomeStatus::Failed,
            phase: SyncPhase::Failed,
            failed_phase: Some(self.phase),
            message,
            executed: stats.executed,
            errors: stats.errors,
            log: self.log,
            backup: self.backup,
        }
    }

    fn finish(mut self, stats: ReplayStats) -> SyncOutcome {
        self.enter(SyncPhase::Done);
        let (status, message) = if stats.errors == 0 {
            (
                OutcomeStatus::Success,
                format!(
                    "{} completed successfully ({} statements executed)",
                    self.title(),
                    stats.executed
                ),
            )
        } else {
            (
                OutcomeStatus::CompletedWithErrors,
                format!(
                    "{} completed with {} errors ({} statements executed)",
                    self.title(),
                    stats.errors,
                    stats.executed
                ),
            )
        };
        log::info!("[{}] {}", self.id, message);
        SyncOutcome {
            operation_id: self.id,
            direction: self.direction,
            mode: self.mode,
            status,
            phase: self.phase,
            failed_phase: None,
            message,
            executed: stats.executed,
            errors: stats.errors,
            log: self.log,
            backup: self.backup,
        }
    }
}

fn count_phases(statements: &[SqlStatement]) -> (usize, usize) {
    let structure = statements
        .iter()
        .filter(|s| s.phase == StatementPhase::Structure)
        .count();
    (structure, statements.len() - structure)
}

// =====================================================
// SHARED STEPS
// =====================================================

fn local_profile(state: &AppState) -> Result<&ConnectionProfile, SyncError> {
    let missing = state.config.local.missing_fields();
    if missing.is_empty() {
        Ok(&state.config.local)
    } else {
        Err(SyncError::Validation(format!(
            "Local database is not configured (missing {})",
            missing.join(", ")
        )))
    }
}

async fn load_settings(state: &AppState) -> Result<SyncSettings, SyncError> {
    SyncSettings::load(state.settings.as_ref(), &state.encryption_key).await
}

async fn connect_pair(
    state: &AppState,
    settings: &SyncSettings,
) -> Result<(Arc<dyn SyncDatabase>, Arc<dyn SyncDatabase>), SyncError> {
    let local_profile = local_profile(state)?;
    let cpanel_profile = settings.require_cpanel()?;
    let (local, cpanel) = futures::try_join!(
        state.connector.connect(local_profile, LOCAL_LABEL),
        state.connector.connect(cpanel_profile, REMOTE_LABEL),
    )?;
    Ok((local, cpanel))
}

async fn take_backup(op: &mut Operation, state: &AppState, target: &dyn SyncDatabase) -> Result<(), String> {
    op.enter(SyncPhase::BackingUp);
    let snapshotter = BackupSnapshotter::new(&state.config.backups_dir);
    let artifact = snapshotter
        .snapshot(target, target.label())
        .await
        .map_err(|e| e.to_string())?;
    op.log.success(
        op.phase_name(),
        format!(
            "Backup of {} database saved to {} ({} bytes)",
            target.label(),
            artifact.path.display(),
            artifact.size_bytes
        ),
    );
    op.backup = Some(artifact);
    Ok(())
}

// =====================================================
// COMPARE / STATUS / EXPORT
// =====================================================

/// Read-only; bypasses the operation state machine.
pub async fn compare(state: &AppState) -> Result<ComparisonReport, SyncError> {
    let settings = load_settings(state).await?;
    let (local, cpanel) = connect_pair(state, &settings).await?;
    data_compare::diff_database(local.as_ref(), cpanel.as_ref()).await
}

pub async fn status(state: &AppState) -> Result<SyncStatus, SyncError> {
    let settings = load_settings(state).await?;
    Ok(SyncStatus::from(&settings))
}

pub struct ExportArtifact {
    pub file_name: String,
    pub script: String,
}

/// Dumps the local database as a downloadable script.
pub async fn export(state: &AppState, request: &ExportRequest) -> Result<ExportArtifact, SyncError> {
    request.validate().map_err(SyncError::Validation)?;
    let profile = local_profile(state)?;
    let local = state.connector.connect(profile, LOCAL_LABEL).await?;

    let options = DumpOptions {
        include_structure: request.structure,
        include_data: request.data,
        add_drop_statements: request.structure && request.drop_tables,
    };
    let statements = dump_database(local.as_ref(), None, options).await?;
    let script = render_sql_script(local.database_name(), &statements, options);
    let file_name = format!(
        "{}_{}.sql",
        local.database_name(),
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    log::info!("Exported {} statements from local database as {}", statements.len(), file_name);
    Ok(ExportArtifact { file_name, script })
}

// =====================================================
// PULL / PUSH
// =====================================================

/// Pull (cPanel into local) or push (local into cPanel).
///
/// Problems found while validating are returned as `Err` and nothing has been
/// touched. Anything later comes back as an outcome carrying the partial log.
pub async fn run_sync(
    state: &AppState,
    direction: SyncDirection,
    mode: SyncMode,
    create_backup: bool,
    cancel: CancellationToken,
) -> Result<SyncOutcome, SyncError> {
    if direction == SyncDirection::Import {
        return Err(SyncError::Validation("Use the import operation for SQL files".to_string()));
    }

    let mut op = Operation::new(direction, Some(mode));
    op.enter(SyncPhase::Validating);
    let settings = load_settings(state).await?;
    let (local, cpanel) = connect_pair(state, &settings).await?;
    let (local_probe, cpanel_probe) = futures::try_join!(
        connections::probe(local.as_ref()),
        connections::probe(cpanel.as_ref()),
    )?;
    op.log.success(
        op.phase_name(),
        format!(
            "Connected to local ({} tables, MySQL {}) and cPanel ({} tables, MySQL {})",
            local_probe.table_count,
            local_probe.server_version,
            cpanel_probe.table_count,
            cpanel_probe.server_version
        ),
    );

    let (source, target, target_profile) = match direction {
        SyncDirection::Pull => (cpanel, local, local_profile(state)?.clone()),
        _ => (local, cpanel, settings.cpanel.clone()),
    };

    let _destination = state.locks.acquire(&target_profile.destination_key()).await;
    if cancel.is_cancelled() {
        return Ok(op.fail("Cancelled before any change was made".to_string(), ReplayStats::default()));
    }

    if create_backup {
        if let Err(e) = take_backup(&mut op, state, target.as_ref()).await {
            return Ok(op.fail(e, ReplayStats::default()));
        }
    } else {
        op.log.info("backing_up", "Backup skipped");
    }

    op.enter(SyncPhase::Extracting);
    let mut statements = match dump_database(source.as_ref(), None, DumpOptions::for_sync(mode)).await {
        Ok(statements) => statements,
        Err(e) => return Ok(op.fail(e.to_string(), ReplayStats::default())),
    };
    let (structure, data) = count_phases(&statements);
    op.log.success(
        op.phase_name(),
        format!(
            "Extracted {} statements from {} ({} structure, {} data)",
            statements.len(),
            source.label(),
            structure,
            data
        ),
    );

    if direction == SyncDirection::Push {
        op.enter(SyncPhase::UrlRewriting);
        match settings.production_url.as_deref() {
            Some(url) if data > 0 => {
                let changed = rewrite_urls(&mut statements, &state.config.localhost_patterns, url);
                op.log.info(op.phase_name(), format!("Rewrote local URLs to {} in {} statements", url, changed));
            }
            Some(_) => op.log.info(op.phase_name(), "No data statements to rewrite"),
            None => op.log.warning(op.phase_name(), "No production URL configured; URLs left unchanged"),
        }
    }

    op.enter(SyncPhase::Applying);
    let stats = match replay_statements(target.as_ref(), &statements, &mut op.log, &cancel).await {
        Ok(stats) => stats,
        Err(e) => return Ok(op.fail(e.to_string(), ReplayStats::default())),
    };
    if stats.cancelled {
        return Ok(op.fail("Cancelled by client; statements already applied were kept".to_string(), stats));
    }

    op.enter(SyncPhase::Finalizing);
    let key = match direction {
        SyncDirection::Pull => settings::LAST_PULL,
        _ => settings::LAST_PUSH,
    };
    if let Err(e) = settings::record_timestamp(state.settings.as_ref(), key, Utc::now()).await {
        op.log.warning(op.phase_name(), format!("Could not record {}: {}", key, e));
    }

    Ok(op.finish(stats))
}

// =====================================================
// IMPORT
// =====================================================

/// Replays an uploaded script into the local database.
pub async fn run_import(
    state: &AppState,
    script: &str,
    create_backup: bool,
    cancel: CancellationToken,
) -> Result<SyncOutcome, SyncError> {
    let mut op = Operation::new(SyncDirection::Import, None);
    op.enter(SyncPhase::Validating);
    if script.trim().is_empty() {
        return Err(SyncError::Validation("The uploaded SQL file is empty".to_string()));
    }
    let statements = statements_from_script(script);
    if statements.is_empty() {
        return Err(SyncError::Validation("No SQL statements found in the uploaded file".to_string()));
    }

    let profile = local_profile(state)?.clone();
    let local = state.connector.connect(&profile, LOCAL_LABEL).await?;
    connections::probe(local.as_ref()).await?;
    op.log.success(op.phase_name(), format!("Connected to local database '{}'", profile.database));

    let _destination = state.locks.acquire(&profile.destination_key()).await;

    if create_backup {
        if let Err(e) = take_backup(&mut op, state, local.as_ref()).await {
            return Ok(op.fail(e, ReplayStats::default()));
        }
    } else {
        op.log.info("backing_up", "Backup skipped");
    }

    op.enter(SyncPhase::Extracting);
    let (structure, data) = count_phases(&statements);
    op.log.success(
        op.phase_name(),
        format!(
            "Parsed {} statements ({} structure, {} data)",
            statements.len(),
            structure,
            data
        ),
    );

    op.enter(SyncPhase::Applying);
    let stats = match replay_statements(local.as_ref(), &statements, &mut op.log, &cancel).await {
        Ok(stats) => stats,
        Err(e) => return Ok(op.fail(e.to_string(), ReplayStats::default())),
    };
    if stats.cancelled {
        return Ok(op.fail("Cancelled by client; statements already applied were kept".to_string(), stats));
    }

    op.enter(SyncPhase::Finalizing);
    if let Err(e) = settings::record_timestamp(state.settings.as_ref(), settings::LAST_IMPORT, Utc::now()).await {
        op.log.warning(op.phase_name(), format!("Could not record {}: {}", settings::LAST_IMPORT, e));
    }

    Ok(op.finish(stats))
}
