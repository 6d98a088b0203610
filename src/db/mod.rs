// =====================================================
// DATABASE MODULE
// Backend-neutral access used by compare, dump and replay
// =====================================================

pub mod backup;
pub mod connections;
pub mod crypto;
pub mod data_compare;
pub mod data_transfer;
pub mod schema_compare;
pub mod sql_utils;

use crate::db_types::{ColumnSchema, PrimaryKey, ServerProbe, SqlRow};

/// Read side of a database taking part in a sync, plus a way to open a
/// dedicated session for replaying statements.
///
/// The MySQL implementation lives in `crate::mysql`; tests use an in-memory one.
#[async_trait::async_trait]
pub trait SyncDatabase: Send + Sync {
    /// "local" or "cpanel".
    fn label(&self) -> &str;
    fn database_name(&self) -> &str;

    async fn probe(&self) -> Result<ServerProbe, String>;
    async fn list_tables(&self) -> Result<Vec<String>, String>;
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnSchema>, String>;
    async fn table_primary_keys(&self, table: &str) -> Result<Vec<PrimaryKey>, String>;
    async fn table_ddl(&self, table: &str) -> Result<String, String>;
    /// Full scan of `columns`, ordered by `order_by` when given.
    async fn fetch_rows(
        &self,
        table: &str,
        columns: &[String],
        order_by: &[String],
    ) -> Result<Vec<SqlRow>, String>;
    async fn open_executor(&self) -> Result<Box<dyn StatementExecutor>, String>;
}

/// A single session statements are replayed on, in order.
#[async_trait::async_trait]
pub trait StatementExecutor: Send {
    async fn execute(&mut self, sql: &str) -> Result<u64, String>;

    /// Stops the statement the server is still running for this session after
    /// the future driving `execute` was dropped.
    async fn interrupt(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        true
    }
}
