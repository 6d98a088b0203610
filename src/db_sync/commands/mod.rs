// =====================================================
// HTTP COMMANDS
// JSON endpoints under /api/db-sync/
// =====================================================

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::models::{
    ExportRequest, OutcomeStatus, PullRequest, PushRequest, SyncDirection, SyncOutcome,
};
use super::settings::{self as sync_settings, SettingsUpdate, SyncSettings};
use crate::db::connections;
use crate::db_types::{AppState, ConnectionProfile};
use crate::error::SyncError;

const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/db-sync/test-connection", post(test_connection))
        .route("/api/db-sync/compare", post(compare))
        .route("/api/db-sync/pull", post(pull))
        .route("/api/db-sync/sync", post(push))
        .route("/api/db-sync/export", post(export))
        .route("/api/db-sync/import", post(import))
        .route("/api/db-sync/status", get(status))
        .route("/api/db-sync/settings", post(save_settings))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

// =====================================================
// RESPONSES
// =====================================================

impl SyncError {
    fn status_code(&self) -> StatusCode {
        match self {
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::Connection(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "message": self.to_string(),
            "error_type": self.kind(),
            "suggestions": self.suggestions(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

fn outcome_response(outcome: SyncOutcome, mode_field: &str) -> Response {
    let mut data = json!({
        "operation_id": outcome.operation_id,
        "message": outcome.message,
        "executed": outcome.executed,
        "errors": outcome.errors,
        "phase": outcome.phase,
        "log": outcome.log,
    });
    if let Some(mode) = outcome.mode {
        data[mode_field] = json!(mode);
    }
    if let Some(failed_phase) = outcome.failed_phase {
        data["failed_phase"] = json!(failed_phase);
    }
    if let Some(backup) = &outcome.backup {
        data["backup"] = json!(backup);
    }

    let code = match outcome.status {
        OutcomeStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    let body = json!({
        "status": outcome.status,
        "message": outcome.message,
        "data": data,
    });
    (code, Json(body)).into_response()
}

/// Empty bodies fall back to the defaults.
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, SyncError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| SyncError::Validation(format!("Invalid request body: {}", e)))
}

/// Runs an operation on its own task; dropping the request (client gone)
/// cancels it through the token.
async fn run_cancellable<F, Fut>(operation: F) -> Result<SyncOutcome, SyncError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<SyncOutcome, SyncError>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let task = tokio::spawn(operation(cancel));
    let result = task
        .await
        .map_err(|e| SyncError::Replay(format!("Operation task failed: {}", e)));
    guard.disarm();
    result?
}

// =====================================================
// HANDLERS
// =====================================================

async fn test_connection(State(state): State<AppState>, body: Bytes) -> Response {
    let mut profile = match parse_body::<ConnectionProfile>(&body) {
        Ok(profile) => profile,
        Err(e) => return e.into_response(),
    };
    if profile.password.is_empty() {
        if let Ok(stored) = SyncSettings::load(state.settings.as_ref(), &state.encryption_key).await {
            profile.password = stored.cpanel.password;
        }
    }

    match connections::test_connection(state.connector.as_ref(), &profile).await {
        Ok(probe) => Json(json!({
            "status": "success",
            "message": format!("Connected to {} ({} tables)", profile.database, probe.table_count),
            "table_count": probe.table_count,
            "mysql_version": probe.server_version,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn compare(State(state): State<AppState>) -> Response {
    match super::compare(&state).await {
        Ok(report) => Json(json!({"status": "success", "data": report})).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn pull(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_body::<PullRequest>(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    let result = run_cancellable(move |cancel| async move {
        super::run_sync(
            &state,
            SyncDirection::Pull,
            request.pull_mode,
            request.create_backup,
            cancel,
        )
        .await
    })
    .await;

    match result {
        Ok(outcome) => outcome_response(outcome, "pull_mode"),
        Err(e) => e.into_response(),
    }
}

async fn push(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_body::<PushRequest>(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    let result = run_cancellable(move |cancel| async move {
        super::run_sync(
            &state,
            SyncDirection::Push,
            request.sync_mode,
            request.create_backup,
            cancel,
        )
        .await
    })
    .await;

    match result {
        Ok(outcome) => outcome_response(outcome, "sync_mode"),
        Err(e) => e.into_response(),
    }
}

async fn export(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_body::<ExportRequest>(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    match super::export(&state, &request).await {
        Ok(artifact) => (
            [
                (header::CONTENT_TYPE, "application/sql".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", artifact.file_name),
                ),
            ],
            artifact.script,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

async fn read_import_form(mut multipart: Multipart) -> Result<(String, bool), SyncError> {
    let mut script = None;
    let mut create_backup = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SyncError::Validation(format!("Invalid upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "sql_file" => {
                if let Some(file_name) = field.file_name() {
                    if !file_name.to_ascii_lowercase().ends_with(".sql") {
                        return Err(SyncError::Validation(format!(
                            "'{}' is not a .sql file",
                            file_name
                        )));
                    }
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| SyncError::Validation(format!("Failed to read upload: {}", e)))?;
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|_| SyncError::Validation("SQL file must be UTF-8 encoded".to_string()))?;
                script = Some(text);
            }
            "create_backup" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| SyncError::Validation(format!("Invalid upload: {}", e)))?;
                create_backup = parse_flag(&value);
            }
            _ => {}
        }
    }

    let script = script.ok_or_else(|| SyncError::Validation("No SQL file uploaded".to_string()))?;
    Ok((script, create_backup))
}

async fn import(State(state): State<AppState>, multipart: Multipart) -> Response {
    let (script, create_backup) = match read_import_form(multipart).await {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };
    let result = run_cancellable(move |cancel| async move {
        super::run_import(&state, &script, create_backup, cancel).await
    })
    .await;

    match result {
        Ok(outcome) => outcome_response(outcome, "mode"),
        Err(e) => e.into_response(),
    }
}

async fn status(State(state): State<AppState>) -> Response {
    match super::status(&state).await {
        Ok(status) => Json(json!({"status": "success", "data": status})).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn save_settings(State(state): State<AppState>, body: Bytes) -> Response {
    let update = match parse_body::<SettingsUpdate>(&body) {
        Ok(update) => update,
        Err(e) => return e.into_response(),
    };
    match sync_settings::save_settings(state.settings.as_ref(), &state.encryption_key, &update).await {
        Ok(()) => Json(json!({"status": "success", "message": "Settings saved"})).into_response(),
        Err(e) => e.into_response(),
    }
}
