// =====================================================
// DUMP / REPLAY ENGINE
// Statement extraction, export scripts, URL rewriting and ordered replay
// =====================================================

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::schema_compare;
use super::sql_utils::{
    build_insert_statement, ensure_sql_terminated, is_structure_statement, quote_identifier_mysql,
    split_sql_statements, statement_preview, statement_table_name,
};
use super::SyncDatabase;
use crate::db_sync::models::{SyncMode, SyncOperationLog};
use crate::error::SyncError;

pub const INSERT_BATCH_ROWS: usize = 500;
const APPLY_STEP: &str = "applying";

/// Literals are written with backslash escapes, so a server default of
/// NO_BACKSLASH_ESCAPES has to be cleared for the session.
pub const SET_SQL_MODE: &str = "SET @OLD_SQL_MODE=@@SQL_MODE, SQL_MODE='NO_AUTO_VALUE_ON_ZERO'";
pub const RESTORE_SQL_MODE: &str = "SET SQL_MODE=@OLD_SQL_MODE";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatementPhase {
    Structure,
    Data,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub phase: StatementPhase,
    pub table: Option<String>,
    pub sql: String,
}

impl SqlStatement {
    pub fn structure(table: &str, sql: String) -> Self {
        Self {
            phase: StatementPhase::Structure,
            table: Some(table.to_string()),
            sql,
        }
    }

    pub fn data(table: &str, sql: String) -> Self {
        Self {
            phase: StatementPhase::Data,
            table: Some(table.to_string()),
            sql,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpOptions {
    pub include_structure: bool,
    pub include_data: bool,
    pub add_drop_statements: bool,
}

impl DumpOptions {
    /// Pull/push: drop and recreate every table, with rows unless structure-only.
    pub fn for_sync(mode: SyncMode) -> Self {
        Self {
            include_structure: true,
            include_data: mode == SyncMode::Full,
            add_drop_statements: true,
        }
    }

    /// Snapshot of the current state: structure and data, no drops.
    pub fn backup() -> Self {
        Self {
            include_structure: true,
            include_data: true,
            add_drop_statements: false,
        }
    }
}

// =====================================================
// DUMP
// =====================================================

/// Dumps `tables` (all base tables when `None`) as an ordered statement list:
/// every structure statement for every table first, then the data.
pub async fn dump_database(
    db: &dyn SyncDatabase,
    tables: Option<&[String]>,
    options: DumpOptions,
) -> Result<Vec<SqlStatement>, SyncError> {
    let tables = match tables {
        Some(tables) => tables.to_vec(),
        None => schema_compare::list_tables(db).await?,
    };

    let mut structure = Vec::new();
    let mut data = Vec::new();

    for table in &tables {
        if options.include_structure {
            if options.add_drop_statements {
                structure.push(SqlStatement::structure(
                    table,
                    format!("DROP TABLE IF EXISTS {};", quote_identifier_mysql(table)),
                ));
            }
            let ddl = db
                .table_ddl(table)
                .await
                .map_err(|e| SyncError::Extraction(format!("{} ({}): {}", table, db.label(), e)))?;
            structure.push(SqlStatement::structure(table, ensure_sql_terminated(&ddl)));
        }

        if options.include_data {
            let descriptor = schema_compare::describe_table(db, table)
                .await
                .map_err(|e| SyncError::Extraction(e.to_string()))?;
            let columns = descriptor.insertable_columns();
            let rows = db
                .fetch_rows(table, &columns, &descriptor.primary_key)
                .await
                .map_err(|e| SyncError::Extraction(format!("{} ({}): {}", table, db.label(), e)))?;
            for chunk in rows.chunks(INSERT_BATCH_ROWS) {
                if let Some(sql) = build_insert_statement(table, &columns, chunk) {
                    data.push(SqlStatement::data(table, sql));
                }
            }
        }
    }

    log::debug!(
        "Dumped {} tables from {}: {} structure, {} data statements",
        tables.len(),
        db.label(),
        structure.len(),
        data.len()
    );

    structure.extend(data);
    Ok(structure)
}

/// Self-contained script for download or backup files.
pub fn render_sql_script(database: &str, statements: &[SqlStatement], options: DumpOptions) -> String {
    let mut output = String::new();
    output.push_str("-- sitesync SQL dump\n");
    output.push_str(&format!("-- Database: {}\n", database));
    output.push_str(&format!("-- Generated at: {}\n", chrono::Utc::now().to_rfc3339()));
    output.push_str(&format!(
        "-- Options: structure={}, data={}, drop_tables={}\n\n",
        options.include_structure, options.include_data, options.add_drop_statements
    ));
    output.push_str("SET FOREIGN_KEY_CHECKS=0;\n");
    output.push_str(&format!("{};\n\n", SET_SQL_MODE));

    let mut current_table: Option<&str> = None;
    for statement in statements {
        let table = statement.table.as_deref();
        if table.is_some() && table != current_table {
            output.push_str(&format!("-- Table: {}\n", table.unwrap_or_default()));
            current_table = table;
        }
        output.push_str(&ensure_sql_terminated(&statement.sql));
        output.push_str("\n\n");
    }

    output.push_str(&format!("{};\n", RESTORE_SQL_MODE));
    output.push_str("SET FOREIGN_KEY_CHECKS=1;\n");
    output
}

/// Statements of an uploaded script, in script order.
pub fn statements_from_script(script: &str) -> Vec<SqlStatement> {
    split_sql_statements(script)
        .into_iter()
        .map(|sql| SqlStatement {
            phase: if is_structure_statement(&sql) {
                StatementPhase::Structure
            } else {
                StatementPhase::Data
            },
            table: statement_table_name(&sql),
            sql,
        })
        .collect()
}

// =====================================================
// URL REWRITING
// =====================================================

/// Replaces every localhost pattern with `to_url` inside data statements.
/// Returns the number of statements changed.
pub fn rewrite_urls(statements: &mut [SqlStatement], from_patterns: &[String], to_url: &str) -> usize {
    let to_url = to_url.trim().trim_end_matches('/');
    let patterns = from_patterns
        .iter()
        .map(|p| p.trim().trim_end_matches('/'))
        .filter(|p| !p.is_empty() && *p != to_url)
        .collect::<Vec<&str>>();
    if to_url.is_empty() || patterns.is_empty() {
        return 0;
    }

    let mut changed = 0;
    for statement in statements.iter_mut().filter(|s| s.phase == StatementPhase::Data) {
        let mut sql = statement.sql.clone();
        for pattern in &patterns {
            if sql.contains(pattern) {
                sql = sql.replace(pattern, to_url);
            }
        }
        if sql != statement.sql {
            statement.sql = sql;
            changed += 1;
        }
    }
    changed
}

// =====================================================
// REPLAY
// =====================================================

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub executed: usize,
    pub errors: usize,
    pub cancelled: bool,
}

fn describe_statement(index: usize, total: usize, statement: &SqlStatement) -> String {
    match &statement.table {
        Some(table) => format!("Statement {}/{} ({})", index, total, table),
        None => format!("Statement {}/{}", index, total),
    }
}

/// Runs `statements` in order on one session of `db`.
///
/// Foreign-key checks are off for the duration and switched back on whatever
/// happens. A failing statement is logged and the rest still run. Only failing
/// to open a session is an `Err`.
pub async fn replay_statements(
    db: &dyn SyncDatabase,
    statements: &[SqlStatement],
    log: &mut SyncOperationLog,
    cancel: &CancellationToken,
) -> Result<ReplayStats, SyncError> {
    let mut executor = db
        .open_executor()
        .await
        .map_err(|e| SyncError::Replay(format!("Failed to open {} session: {}", db.label(), e)))?;

    if let Err(e) = executor.execute("SET FOREIGN_KEY_CHECKS=0").await {
        log.warning(APPLY_STEP, format!("Could not disable foreign key checks: {}", e));
    }
    if let Err(e) = executor.execute(SET_SQL_MODE).await {
        log.warning(APPLY_STEP, format!("Could not set session SQL mode: {}", e));
    }

    let mut in_transaction = executor.supports_transactions();
    if in_transaction {
        if let Err(e) = executor.execute("START TRANSACTION").await {
            log.warning(APPLY_STEP, format!("Running without a transaction: {}", e));
            in_transaction = false;
        }
    }

    let total = statements.len();
    let mut stats = ReplayStats::default();
    log.info(APPLY_STEP, format!("Applying {} statements to {}", total, db.label()));

    for (idx, statement) in statements.iter().enumerate() {
        let label = describe_statement(idx + 1, total, statement);
        if cancel.is_cancelled() {
            stats.cancelled = true;
            log.warning(APPLY_STEP, format!("Cancelled before {}", label));
            break;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = executor.execute(&statement.sql) => Some(result),
        };

        match result {
            Some(Ok(_)) => {
                stats.executed += 1;
                log.success(APPLY_STEP, format!("{}: {}", label, statement_preview(&statement.sql)));
            }
            Some(Err(e)) => {
                stats.errors += 1;
                log.error(
                    APPLY_STEP,
                    format!("{} failed: {} [{}]", label, e, statement_preview(&statement.sql)),
                );
            }
            None => {
                stats.cancelled = true;
                match executor.interrupt().await {
                    Ok(()) => log.warning(
                        APPLY_STEP,
                        format!(
                            "Cancelled during {}; statement interrupted (it is kept only if it finished before the interrupt reached the server)",
                            label
                        ),
                    ),
                    Err(e) => log.error(
                        APPLY_STEP,
                        format!("Cancelled during {}; statement may still be applied: {}", label, e),
                    ),
                }
                break;
            }
        }
    }

    if in_transaction {
        if let Err(e) = executor.execute("COMMIT").await {
            log.warning(APPLY_STEP, format!("Commit failed: {}", e));
        }
    }

    if let Err(e) = executor.execute(RESTORE_SQL_MODE).await {
        log.warning(APPLY_STEP, format!("Could not restore session SQL mode: {}", e));
    }
    match executor.execute("SET FOREIGN_KEY_CHECKS=1").await {
        Ok(_) => log.info(APPLY_STEP, "Foreign key checks re-enabled"),
        Err(e) => log.warning(APPLY_STEP, format!("Could not re-enable foreign key checks: {}", e)),
    }

    Ok(stats)
}

#[cfg(test)]
mod tests;
