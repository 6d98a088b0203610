// =====================================================
// DATA COMPARE MODULE
// Primary-key row diffing between the local and cPanel databases
// =====================================================

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::schema_compare::{self, ColumnDifference, TableSetDiff};
use super::SyncDatabase;
use crate::db_types::{ColumnSchema, RowKey, SqlRow, SqlValue, TableDescriptor};
use crate::error::SyncError;

// =====================================================
// TYPES AND STRUCTS
// =====================================================

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowDiffKind {
    NewInLocal,
    NewInRemote,
    Updated,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// cPanel value.
    pub old: SqlValue,
    /// Local value.
    pub new: SqlValue,
}

#[derive(Debug, Clone)]
pub struct RowDiffEntry {
    pub table: String,
    pub key_columns: Vec<String>,
    pub key: RowKey,
    pub kind: RowDiffKind,
    /// The whole row for one-sided entries.
    pub record: Option<SqlRow>,
    pub changes: BTreeMap<String, FieldChange>,
}

/// A column present on both sides, matched case-insensitively.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub canonical: String,
    pub local_name: String,
    pub cpanel_name: String,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct ComparisonSummary {
    pub local_tables: usize,
    pub cpanel_tables: usize,
    pub common_tables: usize,
    pub total_updated_records: usize,
    pub total_new_records_local: usize,
    pub total_new_records_cpanel: usize,
}

#[derive(Serialize, Debug, Clone)]
pub struct RecordEntry {
    pub table: String,
    pub key: serde_json::Value,
    pub record: SqlRow,
}

#[derive(Serialize, Debug, Clone)]
pub struct UpdatedEntry {
    pub table: String,
    pub key: serde_json::Value,
    pub changes: BTreeMap<String, FieldChange>,
}

#[derive(Serialize, Debug, Clone)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct DataDiffSection {
    pub new_in_local: Vec<RecordEntry>,
    pub new_in_cpanel: Vec<RecordEntry>,
    pub updated: Vec<UpdatedEntry>,
    pub skipped: Vec<SkippedTable>,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct SchemaDiffSection {
    pub column_differences: Vec<ColumnDifference>,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct ComparisonReport {
    pub summary: ComparisonSummary,
    pub tables: TableSetDiff,
    pub data: DataDiffSection,
    pub schema: SchemaDiffSection,
    pub warnings: Vec<String>,
}

impl ComparisonReport {
    fn absorb(&mut self, entries: Vec<RowDiffEntry>) {
        for entry in entries {
            let key = entry.key.to_json(&entry.key_columns);
            match entry.kind {
                RowDiffKind::NewInLocal => self.data.new_in_local.push(RecordEntry {
                    table: entry.table,
                    key,
                    record: entry.record.unwrap_or_default(),
                }),
                RowDiffKind::NewInRemote => self.data.new_in_cpanel.push(RecordEntry {
                    table: entry.table,
                    key,
                    record: entry.record.unwrap_or_default(),
                }),
                RowDiffKind::Updated => self.data.updated.push(UpdatedEntry {
                    table: entry.table,
                    key,
                    changes: entry.changes,
                }),
            }
        }
        self.summary.total_new_records_local = self.data.new_in_local.len();
        self.summary.total_new_records_cpanel = self.data.new_in_cpanel.len();
        self.summary.total_updated_records = self.data.updated.len();
    }

    fn skip(&mut self, table: &str, reason: String, warn: bool) {
        if warn {
            self.warnings.push(format!("{}: {}", table, reason));
        }
        self.data.skipped.push(SkippedTable {
            table: table.to_string(),
            reason,
        });
    }
}

// =====================================================
// COLUMN AND KEY RESOLUTION
// =====================================================

pub fn normalize_identifier_token(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Columns present on both sides, in local column order.
pub fn map_common_columns(local: &[ColumnSchema], cpanel: &[ColumnSchema]) -> Vec<ColumnMapping> {
    let mut cpanel_lookup: HashMap<String, String> = HashMap::new();
    for column in cpanel {
        let canonical = normalize_identifier_token(&column.name);
        if !canonical.is_empty() {
            cpanel_lookup.entry(canonical).or_insert_with(|| column.name.clone());
        }
    }

    let mut seen = BTreeSet::new();
    let mut mappings = Vec::new();
    for column in local {
        let canonical = normalize_identifier_token(&column.name);
        if canonical.is_empty() || !seen.insert(canonical.clone()) {
            continue;
        }
        if let Some(cpanel_name) = cpanel_lookup.get(&canonical) {
            mappings.push(ColumnMapping {
                canonical,
                local_name: column.name.clone(),
                cpanel_name: cpanel_name.clone(),
            });
        }
    }
    mappings
}

/// Key mappings for a table, or the reason it cannot be row-diffed.
///
/// Both sides must declare the same primary key and every key column must be shared.
pub fn resolve_key_columns(
    mappings: &[ColumnMapping],
    local: &TableDescriptor,
    cpanel: &TableDescriptor,
) -> Result<Vec<ColumnMapping>, String> {
    if local.keyless || cpanel.keyless {
        return Err("table has no primary key".to_string());
    }

    let local_pk = local
        .primary_key
        .iter()
        .map(|c| normalize_identifier_token(c))
        .collect::<Vec<String>>();
    let cpanel_pk = cpanel
        .primary_key
        .iter()
        .map(|c| normalize_identifier_token(c))
        .collect::<BTreeSet<String>>();
    if local_pk.len() != cpanel_pk.len() || !local_pk.iter().all(|c| cpanel_pk.contains(c)) {
        return Err(format!(
            "primary keys differ (local: {}, cpanel: {})",
            local.primary_key.join(", "),
            cpanel.primary_key.join(", ")
        ));
    }

    local_pk
        .iter()
        .map(|canonical| {
            mappings
                .iter()
                .find(|m| &m.canonical == canonical)
                .cloned()
                .ok_or_else(|| format!("key column '{}' is not present on both sides", canonical))
        })
        .collect()
}

pub fn build_row_key(row: &SqlRow, key_names: &[String]) -> RowKey {
    RowKey(
        key_names
            .iter()
            .map(|name| row.get(name).cloned().unwrap_or(SqlValue::Null))
            .collect(),
    )
}

pub fn index_rows(
    rows: Vec<SqlRow>,
    key_names: &[String],
    side_label: &str,
) -> Result<BTreeMap<RowKey, SqlRow>, String> {
    let mut indexed = BTreeMap::new();
    let mut duplicate_keys = Vec::new();

    for row in rows {
        let key = build_row_key(&row, key_names);
        if indexed.contains_key(&key) {
            duplicate_keys.push(format!("{:?}", key.0));
            if duplicate_keys.len() >= 5 {
                break;
            }
            continue;
        }
        indexed.insert(key, row);
    }

    if !duplicate_keys.is_empty() {
        return Err(format!(
            "Duplicate key values detected in {} table. Sample keys: {}",
            side_label,
            duplicate_keys.join(", ")
        ));
    }

    Ok(indexed)
}

// =====================================================
// DIFFING
// =====================================================

/// Merges two key-indexed row sets into diff entries, in key order.
///
/// Only shared columns are compared; a column present on one side only never
/// produces an update on its own.
pub fn diff_indexed_rows(
    table: &str,
    key_columns: &[String],
    mappings: &[ColumnMapping],
    local: &BTreeMap<RowKey, SqlRow>,
    cpanel: &BTreeMap<RowKey, SqlRow>,
) -> Vec<RowDiffEntry> {
    let keys = local.keys().chain(cpanel.keys()).collect::<BTreeSet<&RowKey>>();
    let mut entries = Vec::new();

    for key in keys {
        let entry = |kind, record, changes| RowDiffEntry {
            table: table.to_string(),
            key_columns: key_columns.to_vec(),
            key: key.clone(),
            kind,
            record,
            changes,
        };
        match (local.get(key), cpanel.get(key)) {
            (Some(row), None) => entries.push(entry(RowDiffKind::NewInLocal, Some(row.clone()), BTreeMap::new())),
            (None, Some(row)) => entries.push(entry(RowDiffKind::NewInRemote, Some(row.clone()), BTreeMap::new())),
            (Some(local_row), Some(cpanel_row)) => {
                let changes = changed_fields(local_row, cpanel_row, mappings);
                if !changes.is_empty() {
                    entries.push(entry(RowDiffKind::Updated, None, changes));
                }
            }
            (None, None) => {}
        }
    }

    entries
}

fn changed_fields(
    local_row: &SqlRow,
    cpanel_row: &SqlRow,
    mappings: &[ColumnMapping],
) -> BTreeMap<String, FieldChange> {
    let mut changes = BTreeMap::new();
    for mapping in mappings {
        let local_value = local_row.get(&mapping.local_name).cloned().unwrap_or(SqlValue::Null);
        let cpanel_value = cpanel_row.get(&mapping.cpanel_name).cloned().unwrap_or(SqlValue::Null);
        if local_value != cpanel_value {
            changes.insert(
                mapping.local_name.clone(),
                FieldChange {
                    old: cpanel_value,
                    new: local_value,
                },
            );
        }
    }
    changes
}

/// Full-scan diff of one table present on both sides.
pub async fn diff_table(
    local_db: &dyn SyncDatabase,
    cpanel_db: &dyn SyncDatabase,
    local: &TableDescriptor,
    cpanel: &TableDescriptor,
) -> Result<Vec<RowDiffEntry>, String> {
    let mappings = map_common_columns(&local.columns, &cpanel.columns);
    let keys = resolve_key_columns(&mappings, local, cpanel)?;
    let local_keys = keys.iter().map(|k| k.local_name.clone()).collect::<Vec<String>>();
    let cpanel_keys = keys.iter().map(|k| k.cpanel_name.clone()).collect::<Vec<String>>();

    let local_columns = local.column_names();
    let cpanel_columns = cpanel.column_names();
    let (local_rows, cpanel_rows) = futures::try_join!(
        local_db.fetch_rows(&local.name, &local_columns, &local_keys),
        cpanel_db.fetch_rows(&cpanel.name, &cpanel_columns, &cpanel_keys),
    )?;

    log::debug!(
        "Comparing {}: {} local rows, {} cpanel rows",
        local.name,
        local_rows.len(),
        cpanel_rows.len()
    );

    let local_index = index_rows(local_rows, &local_keys, "local")?;
    let cpanel_index = index_rows(cpanel_rows, &cpanel_keys, "cpanel")?;
    Ok(diff_indexed_rows(
        &local.name,
        &local_keys,
        &mappings,
        &local_index,
        &cpanel_index,
    ))
}

/// Table-set diff plus row diffs of every common table with a usable key.
///
/// Per-table failures become warnings; only failing to list tables aborts.
pub async fn diff_database(
    local_db: &dyn SyncDatabase,
    cpanel_db: &dyn SyncDatabase,
) -> Result<ComparisonReport, SyncError> {
    let (local_tables, cpanel_tables) = futures::try_join!(
        schema_compare::list_tables(local_db),
        schema_compare::list_tables(cpanel_db),
    )?;

    let mut report = ComparisonReport {
        tables: schema_compare::diff_table_sets(&local_tables, &cpanel_tables),
        ..Default::default()
    };
    report.summary.local_tables = local_tables.len();
    report.summary.cpanel_tables = cpanel_tables.len();
    report.summary.common_tables = report.tables.common.len();

    let common = report.tables.common.clone();
    for table in &common {
        let described = futures::try_join!(
            schema_compare::describe_table(local_db, table),
            schema_compare::describe_table(cpanel_db, table),
        );
        let (local_desc, cpanel_desc) = match described {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("Skipping {} during compare: {}", table, err);
                report.skip(table, err.to_string(), true);
                continue;
            }
        };

        report
            .schema
            .column_differences
            .extend(schema_compare::diff_table_columns(&local_desc, &cpanel_desc));

        match diff_table(local_db, cpanel_db, &local_desc, &cpanel_desc).await {
            Ok(entries) => report.absorb(entries),
            Err(reason) => {
                let warn = !(local_desc.keyless || cpanel_desc.keyless);
                log::info!("Row diff skipped for {}: {}", table, reason);
                report.skip(table, reason, warn);
            }
        }
    }

    log::info!(
        "Compare finished: {} new local, {} new cpanel, {} updated, {} skipped",
        report.summary.total_new_records_local,
        report.summary.total_new_records_cpanel,
        report.summary.total_updated_records,
        report.data.skipped.len()
    );
    Ok(report)
}
