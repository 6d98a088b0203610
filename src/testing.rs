//! In-memory database used by unit tests.
//!
//! It understands the statements the dump engine itself produces (DROP TABLE,
//! CREATE TABLE in `SHOW CREATE TABLE` layout, multi-row INSERT) and records
//! every statement it is asked to run.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::db::sql_utils::quote_identifier_mysql;
use crate::db::{StatementExecutor, SyncDatabase};
use crate::db_types::{ColumnSchema, PrimaryKey, ServerProbe, SqlRow, SqlValue};

#[derive(Clone, Default)]
struct MemoryTable {
    columns: Vec<ColumnSchema>,
    primary_key: Vec<String>,
    rows: Vec<SqlRow>,
}

#[derive(Default)]
struct MemoryInner {
    tables: BTreeMap<String, MemoryTable>,
    executed: Vec<String>,
    failing_fragments: Vec<String>,
    blocking_fragments: Vec<String>,
    interrupts: usize,
    broken_tables: HashSet<String>,
    probe_error: Option<String>,
}

#[derive(Clone)]
pub(crate) struct MemoryDatabase {
    label: String,
    database: String,
    inner: Arc<Mutex<MemoryInner>>,
}

fn column(name: &str, column_type: &str, primary: bool) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        data_type: column_type.split('(').next().unwrap_or(column_type).to_string(),
        column_type: column_type.to_string(),
        is_nullable: !primary,
        column_key: if primary { "PRI".to_string() } else { String::new() },
        column_default: None,
        extra: String::new(),
    }
}

impl MemoryDatabase {
    pub(crate) fn new(label: &str, database: &str) -> Self {
        Self {
            label: label.to_string(),
            database: database.to_string(),
            inner: Arc::new(Mutex::new(MemoryInner::default())),
        }
    }

    pub(crate) fn with_table(self, name: &str, columns: &[(&str, &str)], primary_key: &[&str]) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.tables.insert(
                name.to_string(),
                MemoryTable {
                    columns: columns
                        .iter()
                        .map(|(col, ty)| column(col, ty, primary_key.contains(col)))
                        .collect(),
                    primary_key: primary_key.iter().map(|pk| pk.to_string()).collect(),
                    rows: Vec::new(),
                },
            );
        }
        self
    }

    pub(crate) fn with_row(self, table: &str, cells: &[(&str, SqlValue)]) -> Self {
        self.insert_row(table, cells);
        self
    }

    pub(crate) fn insert_row(&self, table: &str, cells: &[(&str, SqlValue)]) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.tables.get_mut(table).expect("table exists");
        let row = cells
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect::<SqlRow>();
        entry.rows.push(row);
    }

    /// Adds a `STORED GENERATED` column to an existing table.
    pub(crate) fn with_generated_column(self, table: &str, name: &str, column_type: &str) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.tables.get_mut(table).expect("table exists");
            let mut generated = column(name, column_type, false);
            generated.extra = "STORED GENERATED".to_string();
            entry.columns.push(generated);
        }
        self
    }

    /// Matching statements never complete until the caller gives up on them.
    pub(crate) fn block_statements_containing(&self, fragment: &str) {
        self.inner.lock().unwrap().blocking_fragments.push(fragment.to_string());
    }

    pub(crate) fn interrupt_count(&self) -> usize {
        self.inner.lock().unwrap().interrupts
    }

    pub(crate) fn fail_statements_containing(&self, fragment: &str) {
        self.inner.lock().unwrap().failing_fragments.push(fragment.to_string());
    }

    pub(crate) fn break_table(&self, table: &str) {
        self.inner.lock().unwrap().broken_tables.insert(table.to_string());
    }

    pub(crate) fn fail_probe(&self, message: &str) {
        self.inner.lock().unwrap().probe_error = Some(message.to_string());
    }

    pub(crate) fn executed_statements(&self) -> Vec<String> {
        self.inner.lock().unwrap().executed.clone()
    }

    pub(crate) fn table_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().tables.keys().cloned().collect()
    }

    pub(crate) fn row_count(&self, table: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub(crate) fn rows(&self, table: &str) -> Vec<SqlRow> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SyncDatabase for MemoryDatabase {
    fn label(&self) -> &str {
        &self.label
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn probe(&self) -> Result<ServerProbe, String> {
        let inner = self.inner.lock().unwrap();
        if let Some(message) = &inner.probe_error {
            return Err(message.clone());
        }
        Ok(ServerProbe {
            table_count: inner.tables.len(),
            server_version: "8.0.36-memory".to_string(),
        })
    }

    async fn list_tables(&self) -> Result<Vec<String>, String> {
        Ok(self.table_names())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnSchema>, String> {
        let inner = self.inner.lock().unwrap();
        if inner.broken_tables.contains(table) {
            return Err(format!("SELECT command denied for table '{}'", table));
        }
        inner
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| format!("Table '{}' doesn't exist", table))
    }

    async fn table_primary_keys(&self, table: &str) -> Result<Vec<PrimaryKey>, String> {
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .tables
            .get(table)
            .ok_or_else(|| format!("Table '{}' doesn't exist", table))?;
        Ok(entry
            .primary_key
            .iter()
            .enumerate()
            .map(|(idx, name)| PrimaryKey {
                column_name: name.clone(),
                ordinal_position: idx as i32 + 1,
            })
            .collect())
    }

    async fn table_ddl(&self, table: &str) -> Result<String, String> {
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .tables
            .get(table)
            .ok_or_else(|| format!("Table '{}' doesn't exist", table))?;
        let mut lines = entry
            .columns
            .iter()
            .map(|c| {
                let null = if c.is_nullable { "DEFAULT NULL" } else { "NOT NULL" };
                format!("  {} {} {}", quote_identifier_mysql(&c.name), c.column_type, null)
            })
            .collect::<Vec<String>>();
        if !entry.primary_key.is_empty() {
            let keys = entry
                .primary_key
                .iter()
                .map(|k| quote_identifier_mysql(k))
                .collect::<Vec<String>>()
                .join(",");
            lines.push(format!("  PRIMARY KEY ({})", keys));
        }
        Ok(format!(
            "CREATE TABLE {} (\n{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            quote_identifier_mysql(table),
            lines.join(",\n")
        ))
    }

    async fn fetch_rows(
        &self,
        table: &str,
        columns: &[String],
        order_by: &[String],
    ) -> Result<Vec<SqlRow>, String> {
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .tables
            .get(table)
            .ok_or_else(|| format!("Table '{}' doesn't exist", table))?;
        let mut rows = entry
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
                    .collect::<SqlRow>()
            })
            .collect::<Vec<SqlRow>>();
        if !order_by.is_empty() {
            rows.sort_by(|a, b| {
                let left = order_by.iter().map(|c| a.get(c).cloned()).collect::<Vec<_>>();
                let right = order_by.iter().map(|c| b.get(c).cloned()).collect::<Vec<_>>();
                left.cmp(&right)
            });
        }
        Ok(rows)
    }

    async fn open_executor(&self) -> Result<Box<dyn StatementExecutor>, String> {
        Ok(Box::new(MemoryExecutor {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryExecutor {
    inner: Arc<Mutex<MemoryInner>>,
}

#[async_trait::async_trait]
impl StatementExecutor for MemoryExecutor {
    async fn execute(&mut self, sql: &str) -> Result<u64, String> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.executed.push(sql.to_string());
            if !inner.blocking_fragments.iter().any(|f| sql.contains(f.as_str())) {
                if inner.failing_fragments.iter().any(|f| sql.contains(f.as_str())) {
                    return Err("Duplicate entry for key 'PRIMARY'".to_string());
                }
                return apply_statement(&mut inner, sql);
            }
        }
        std::future::pending().await
    }

    async fn interrupt(&mut self) -> Result<(), String> {
        self.inner.lock().unwrap().interrupts += 1;
        Ok(())
    }
}

fn read_identifier(text: &str) -> Option<(String, &str)> {
    let text = text.trim_start();
    let rest = text.strip_prefix('`')?;
    let end = rest.find('`')?;
    Some((rest[..end].to_string(), &rest[end + 1..]))
}

fn apply_statement(inner: &mut MemoryInner, sql: &str) -> Result<u64, String> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_ascii_uppercase();

    if upper.starts_with("SET ")
        || upper.starts_with("START TRANSACTION")
        || upper == "COMMIT"
        || upper == "ROLLBACK"
        || upper.starts_with("/*!")
    {
        return Ok(0);
    }

    if let Some(rest) = strip_prefix_ci(trimmed, "DROP TABLE IF EXISTS") {
        let (name, _) = read_identifier(rest).ok_or("bad DROP")?;
        inner.tables.remove(&name);
        return Ok(0);
    }

    if let Some(rest) = strip_prefix_ci(trimmed, "CREATE TABLE") {
        let (name, body) = read_identifier(rest).ok_or("bad CREATE")?;
        if inner.tables.contains_key(&name) {
            return Err(format!("Table '{}' already exists", name));
        }
        let mut table = MemoryTable::default();
        let mut parsed_columns = Vec::new();
        for line in body.lines().map(str::trim) {
            if line.starts_with('`') {
                let (col, after) = read_identifier(line).ok_or("bad column")?;
                let ty = after.split_whitespace().next().unwrap_or("text").to_string();
                parsed_columns.push((col, ty));
            } else if let Some(keys) = line.strip_prefix("PRIMARY KEY (") {
                let keys = keys.trim_end_matches(',').trim_end_matches(')');
                table.primary_key = keys
                    .split(',')
                    .map(|k| k.trim().trim_matches('`').to_string())
                    .collect();
            }
        }
        table.columns = parsed_columns
            .iter()
            .map(|(col, ty)| column(col, ty, table.primary_key.contains(col)))
            .collect();
        inner.tables.insert(name, table);
        return Ok(0);
    }

    if let Some(rest) = strip_prefix_ci(trimmed, "INSERT INTO") {
        let (name, after) = read_identifier(rest).ok_or("bad INSERT")?;
        let after = after.trim_start();
        let close = after.find(')').ok_or("bad column list")?;
        let columns = after[1..close]
            .split(',')
            .map(|c| c.trim().trim_matches('`').to_string())
            .collect::<Vec<String>>();
        let values_part = strip_prefix_ci(after[close + 1..].trim_start(), "VALUES")
            .ok_or("missing VALUES")?;
        let tuples = parse_tuples(values_part)?;

        let table = inner
            .tables
            .get_mut(&name)
            .ok_or_else(|| format!("Table '{}' doesn't exist", name))?;
        let mut inserted = 0;
        for tuple in tuples {
            let row = columns.iter().cloned().zip(tuple).collect::<SqlRow>();
            if !table.primary_key.is_empty() {
                let key = |r: &SqlRow| table.primary_key.iter().map(|k| r.get(k).cloned()).collect::<Vec<_>>();
                let new_key = key(&row);
                if table.rows.iter().any(|existing| key(existing) == new_key) {
                    return Err("Duplicate entry for key 'PRIMARY'".to_string());
                }
            }
            table.rows.push(row);
            inserted += 1;
        }
        return Ok(inserted);
    }

    Err(format!("Unsupported statement: {}", trimmed))
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

fn parse_tuples(text: &str) -> Result<Vec<Vec<SqlValue>>, String> {
    let chars = text.chars().collect::<Vec<char>>();
    let mut idx = 0;
    let mut tuples = Vec::new();
    let mut current: Option<Vec<SqlValue>> = None;

    while idx < chars.len() {
        let ch = chars[idx];
        match ch {
            '(' => current = Some(Vec::new()),
            ')' => tuples.push(current.take().ok_or("unbalanced tuple")?),
            ',' | ' ' | '\n' | '\t' | '\r' => {}
            '\'' => {
                let mut value = String::new();
                idx += 1;
                while idx < chars.len() {
                    let c = chars[idx];
                    if c == '\\' && idx + 1 < chars.len() {
                        let escaped = chars[idx + 1];
                        value.push(if escaped == '0' { '\0' } else { escaped });
                        idx += 2;
                        continue;
                    }
                    if c == '\'' {
                        if chars.get(idx + 1) == Some(&'\'') {
                            value.push('\'');
                            idx += 2;
                            continue;
                        }
                        break;
                    }
                    value.push(c);
                    idx += 1;
                }
                current.as_mut().ok_or("value outside tuple")?.push(SqlValue::Text(value));
            }
            _ => {
                let start = idx;
                while idx < chars.len() && !matches!(chars[idx], ',' | ')') {
                    idx += 1;
                }
                let token = chars[start..idx].iter().collect::<String>().trim().to_string();
                let value = parse_bare_literal(&token)?;
                current.as_mut().ok_or("value outside tuple")?.push(value);
                continue;
            }
        }
        idx += 1;
    }

    Ok(tuples)
}

fn parse_bare_literal(token: &str) -> Result<SqlValue, String> {
    if token.eq_ignore_ascii_case("NULL") {
        return Ok(SqlValue::Null);
    }
    if let Some(hex_digits) = token.strip_prefix("0x") {
        return hex::decode(hex_digits)
            .map(SqlValue::Bytes)
            .map_err(|e| e.to_string());
    }
    if let Ok(v) = token.parse::<i64>() {
        return Ok(SqlValue::Int(v));
    }
    if let Ok(v) = token.parse::<u64>() {
        return Ok(SqlValue::UInt(v));
    }
    token
        .parse::<f64>()
        .map(SqlValue::Float)
        .map_err(|_| format!("Unrecognised literal '{}'", token))
}

/// Hands out fixed in-memory databases by label.
pub(crate) struct MemoryConnector {
    pub(crate) local: MemoryDatabase,
    pub(crate) remote: MemoryDatabase,
    failures: Mutex<BTreeMap<String, crate::error::ConnectionError>>,
}

impl MemoryConnector {
    pub(crate) fn new(local: MemoryDatabase, remote: MemoryDatabase) -> Self {
        Self {
            local,
            remote,
            failures: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn refuse(&self, label: &str, kind: crate::error::ConnectionErrorKind) {
        self.failures.lock().unwrap().insert(
            label.to_string(),
            crate::error::ConnectionError::new(kind, label, "Access denied for user 'shop'@'10.0.0.1'"),
        );
    }
}

#[async_trait::async_trait]
impl crate::db::connections::DatabaseConnector for MemoryConnector {
    async fn connect(
        &self,
        _profile: &crate::db_types::ConnectionProfile,
        label: &str,
    ) -> Result<Arc<dyn SyncDatabase>, crate::error::ConnectionError> {
        if let Some(err) = self.failures.lock().unwrap().get(label) {
            return Err(err.clone());
        }
        if label == crate::db::connections::LOCAL_LABEL {
            Ok(Arc::new(self.local.clone()))
        } else {
            Ok(Arc::new(self.remote.clone()))
        }
    }
}

pub(crate) fn profile(host: &str, database: &str) -> crate::db_types::ConnectionProfile {
    crate::db_types::ConnectionProfile {
        host: host.to_string(),
        port: 3306,
        database: database.to_string(),
        username: "shop".to_string(),
        password: "secret".to_string(),
        driver: Default::default(),
    }
}

/// App state over in-memory databases with cPanel settings already saved.
pub(crate) async fn app_state(
    connector: MemoryConnector,
    backups_dir: &std::path::Path,
) -> crate::db_types::AppState {
    use crate::db_sync::settings::{save_settings, MemorySettingsStore, SettingsUpdate};

    let key = crate::db::crypto::generate_new_key();
    let store = MemorySettingsStore::default();
    save_settings(
        &store,
        &key,
        &SettingsUpdate {
            host: "db.example.com".to_string(),
            database: "acct_shop".to_string(),
            username: "acct_user".to_string(),
            password: Some("secret".to_string()),
            port: None,
            production_url: Some("https://example.com".to_string()),
        },
    )
    .await
    .unwrap();

    crate::db_types::AppState {
        config: Arc::new(crate::config::SyncConfig {
            local: profile("127.0.0.1", "shop_dev"),
            backups_dir: backups_dir.to_path_buf(),
            localhost_patterns: vec![
                "http://localhost:8080".to_string(),
                "http://localhost:8000".to_string(),
            ],
            connect_timeout: std::time::Duration::from_secs(1),
        }),
        settings: Arc::new(store),
        connector: Arc::new(connector),
        encryption_key: Arc::new(key),
        locks: crate::db_sync::locks::DestinationLocks::new(),
    }
}
