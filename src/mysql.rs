// =====================================================
// MySQL SPECIFIC DATABASE OPERATIONS
// =====================================================

use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{Column, ConnectOptions, MySql, Pool, Row, TypeInfo, ValueRef};
use std::time::Duration;

use crate::db::sql_utils::quote_identifier_mysql;
use crate::db::{StatementExecutor, SyncDatabase};
use crate::db_types::*;

// --- Connection ---

pub fn build_connect_options(profile: &ConnectionProfile) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(&profile.host)
        .port(profile.port)
        .username(&profile.username)
        .charset("utf8mb4");

    if !profile.password.is_empty() {
        options = options.password(&profile.password);
    }

    if !profile.database.trim().is_empty() {
        options = options.database(profile.database.trim());
    }

    options.log_statements(log::LevelFilter::Debug)
}

pub async fn create_pool(
    profile: &ConnectionProfile,
    connect_timeout: Duration,
) -> Result<Pool<MySql>, sqlx::Error> {
    MySqlPoolOptions::new()
        .max_connections(4)
        .min_connections(0)
        .acquire_timeout(connect_timeout)
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(build_connect_options(profile))
        .await
}

fn row_string(row: &MySqlRow, column: &str) -> String {
    row.try_get::<String, _>(column).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(column)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    })
}

fn row_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(value) => value,
        Err(_) => row
            .try_get::<Option<Vec<u8>>, _>(column)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()),
    }
}

pub async fn probe(pool: &Pool<MySql>) -> Result<ServerProbe, String> {
    let row = sqlx::query(
        r#"
        SELECT
            CAST(VERSION() AS CHAR) AS server_version,
            (SELECT COUNT(*) FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE()) AS table_count
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(|e| format!("Failed to probe server: {}", e))?;

    let table_count: i64 = row.try_get("table_count").unwrap_or(0);

    Ok(ServerProbe {
        table_count: usize::try_from(table_count.max(0)).unwrap_or(usize::MAX),
        server_version: row_string(&row, "server_version"),
    })
}

// --- Database/Table Operations ---

pub async fn get_tables(pool: &Pool<MySql>) -> Result<Vec<String>, String> {
    let rows = sqlx::query(
        r#"
        SELECT CAST(TABLE_NAME AS CHAR) AS table_name
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to fetch tables: {}", e))?;

    let mut tables: Vec<String> = rows
        .iter()
        .map(|row| row_string(row, "table_name"))
        .filter(|name| !name.is_empty())
        .collect();
    tables.sort();
    tables.dedup();

    Ok(tables)
}

pub async fn get_table_schema(pool: &Pool<MySql>, table: &str) -> Result<Vec<ColumnSchema>, String> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(COLUMN_NAME AS CHAR) AS column_name,
            CAST(DATA_TYPE AS CHAR) AS data_type,
            CAST(COLUMN_TYPE AS CHAR) AS column_type,
            CAST(IS_NULLABLE AS CHAR) AS is_nullable,
            CAST(COLUMN_KEY AS CHAR) AS column_key,
            CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
            CAST(EXTRA AS CHAR) AS extra
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to fetch table schema: {}", e))?;

    let columns = rows
        .iter()
        .map(|row| ColumnSchema {
            name: row_string(row, "column_name"),
            data_type: row_string(row, "data_type"),
            column_type: row_string(row, "column_type"),
            is_nullable: row_string(row, "is_nullable") == "YES",
            column_key: row_string(row, "column_key"),
            column_default: row_optional_string(row, "column_default"),
            extra: row_string(row, "extra"),
        })
        .collect::<Vec<ColumnSchema>>();

    if columns.is_empty() {
        return Err(format!("Table '{}' has no readable columns", table));
    }

    Ok(columns)
}

pub async fn get_table_primary_keys(pool: &Pool<MySql>, table: &str) -> Result<Vec<PrimaryKey>, String> {
    let rows = sqlx::query(
        r#"
        SELECT
            CAST(COLUMN_NAME AS CHAR) AS column_name,
            CAST(ORDINAL_POSITION AS SIGNED) AS ordinal_position
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_NAME = ?
            AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| format!("Failed to fetch primary keys: {}", e))?;

    Ok(rows
        .iter()
        .map(|row| PrimaryKey {
            column_name: row_string(row, "column_name"),
            ordinal_position: row
                .try_get::<i64, _>("ordinal_position")
                .ok()
                .and_then(|pos| i32::try_from(pos).ok())
                .unwrap_or(0),
        })
        .collect())
}

// --- Table DDL ---

pub async fn get_table_ddl(pool: &Pool<MySql>, table: &str) -> Result<String, String> {
    let query = format!("SHOW CREATE TABLE {}", quote_identifier_mysql(table));

    let row = sqlx::query(&query)
        .fetch_one(pool)
        .await
        .map_err(|e| format!("Failed to fetch DDL: {}", e))?;

    let ddl: String = row.try_get("Create Table").unwrap_or_else(|_| {
        row.try_get::<String, _>(1).unwrap_or_else(|_| {
            row.try_get::<Vec<u8>, _>(1)
                .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
                .unwrap_or_default()
        })
    });

    if ddl.trim().is_empty() {
        return Err(format!("SHOW CREATE TABLE returned nothing for '{}'", table));
    }

    Ok(ddl)
}

// --- Row Loading ---

/// Converts a text-protocol cell into a typed value using the column's type name.
pub fn decode_text_value(type_name: &str, bytes: Vec<u8>) -> SqlValue {
    let upper = type_name.to_ascii_uppercase();
    let base = upper.split_whitespace().next().unwrap_or("");
    let unsigned = upper.contains("UNSIGNED");

    match base {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR"
        | "BOOLEAN" => {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            let parsed = if unsigned {
                text.parse::<u64>().ok().map(SqlValue::UInt)
            } else {
                text.parse::<i64>().ok().map(SqlValue::Int)
            };
            parsed.unwrap_or(SqlValue::Text(text))
        }
        "FLOAT" | "DOUBLE" | "REAL" => {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            match text.parse::<f64>() {
                Ok(value) => SqlValue::Float(value),
                Err(_) => SqlValue::Text(text),
            }
        }
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT"
        | "GEOMETRY" => SqlValue::Bytes(bytes),
        _ => match String::from_utf8(bytes) {
            Ok(text) => SqlValue::Text(text),
            Err(err) => SqlValue::Bytes(err.into_bytes()),
        },
    }
}

fn decode_row(row: &MySqlRow, columns: &[String]) -> SqlRow {
    let mut decoded = SqlRow::new();
    for (idx, name) in columns.iter().enumerate() {
        let is_null = row
            .try_get_raw(idx)
            .map(|raw| raw.is_null())
            .unwrap_or(true);
        let value = if is_null {
            SqlValue::Null
        } else {
            let type_name = row.column(idx).type_info().name().to_string();
            row.try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|bytes| decode_text_value(&type_name, bytes))
                .unwrap_or(SqlValue::Null)
        };
        decoded.insert(name.clone(), value);
    }
    decoded
}

pub fn build_select_query(table: &str, columns: &[String], order_by: &[String]) -> String {
    let select_list = columns
        .iter()
        .map(|column| quote_identifier_mysql(column))
        .collect::<Vec<String>>()
        .join(", ");
    let mut query = format!("SELECT {} FROM {}", select_list, quote_identifier_mysql(table));
    if !order_by.is_empty() {
        let order_list = order_by
            .iter()
            .map(|column| quote_identifier_mysql(column))
            .collect::<Vec<String>>()
            .join(", ");
        query.push_str(&format!(" ORDER BY {}", order_list));
    }
    query
}

/// Loads every row of `table`. Uses the text protocol so DECIMAL, DATE and
/// friends arrive exactly as the server prints them.
pub async fn fetch_table_rows(
    pool: &Pool<MySql>,
    table: &str,
    columns: &[String],
    order_by: &[String],
) -> Result<Vec<SqlRow>, String> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let query = build_select_query(table, columns, order_by);
    let rows = sqlx::raw_sql(&query)
        .fetch_all(pool)
        .await
        .map_err(|e| format!("Failed to read rows from '{}': {}", table, e))?;

    Ok(rows.iter().map(|row| decode_row(row, columns)).collect())
}

// --- Sync Handle ---

pub struct MySqlDatabase {
    pool: Pool<MySql>,
    label: String,
    database: String,
}

impl MySqlDatabase {
    pub fn new(pool: Pool<MySql>, label: &str, database: &str) -> Self {
        Self {
            pool,
            label: label.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl SyncDatabase for MySqlDatabase {
    fn label(&self) -> &str {
        &self.label
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn probe(&self) -> Result<ServerProbe, String> {
        probe(&self.pool).await
    }

    async fn list_tables(&self) -> Result<Vec<String>, String> {
        get_tables(&self.pool).await
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnSchema>, String> {
        get_table_schema(&self.pool, table).await
    }

    async fn table_primary_keys(&self, table: &str) -> Result<Vec<PrimaryKey>, String> {
        get_table_primary_keys(&self.pool, table).await
    }

    async fn table_ddl(&self, table: &str) -> Result<String, String> {
        get_table_ddl(&self.pool, table).await
    }

    async fn fetch_rows(
        &self,
        table: &str,
        columns: &[String],
        order_by: &[String],
    ) -> Result<Vec<SqlRow>, String> {
        fetch_table_rows(&self.pool, table, columns, order_by).await
    }

    async fn open_executor(&self) -> Result<Box<dyn StatementExecutor>, String> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| format!("Failed to acquire {} connection: {}", self.label, e))?;
        let connection_id: u64 = sqlx::query_scalar("SELECT CONNECTION_ID()")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| format!("Failed to read {} session id: {}", self.label, e))?;
        Ok(Box::new(MySqlStatementExecutor {
            conn,
            pool: self.pool.clone(),
            connection_id,
        }))
    }
}

pub struct MySqlStatementExecutor {
    conn: PoolConnection<MySql>,
    /// Used to reach the session from another connection.
    pool: Pool<MySql>,
    connection_id: u64,
}

#[async_trait::async_trait]
impl StatementExecutor for MySqlStatementExecutor {
    async fn execute(&mut self, sql: &str) -> Result<u64, String> {
        let conn: &mut sqlx::MySqlConnection = &mut self.conn;
        sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
            .await
            .map(|done| done.rows_affected())
            .map_err(|e| e.to_string())
    }

    async fn interrupt(&mut self) -> Result<(), String> {
        log::debug!("Interrupting statement on session {}", self.connection_id);
        sqlx::raw_sql(&format!("KILL QUERY {}", self.connection_id))
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to interrupt session {}: {}", self.connection_id, e))
    }
}
