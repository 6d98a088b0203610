// =====================================================
// SCHEMA INTROSPECTION
// Table listing, table descriptors and table/column set diffs
// =====================================================

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::SyncDatabase;
use crate::db_types::TableDescriptor;
use crate::error::SyncError;

/// Base tables in alphabetical order.
pub async fn list_tables(db: &dyn SyncDatabase) -> Result<Vec<String>, SyncError> {
    let mut tables = db
        .list_tables()
        .await
        .map_err(|e| SyncError::schema(format!("{} database", db.label()), e))?;
    tables.sort();
    tables.dedup();
    Ok(tables)
}

pub async fn describe_table(db: &dyn SyncDatabase, table: &str) -> Result<TableDescriptor, SyncError> {
    let scope = || format!("{}.{}", db.label(), table);
    let columns = db
        .table_columns(table)
        .await
        .map_err(|e| SyncError::schema(scope(), e))?;
    if columns.is_empty() {
        return Err(SyncError::schema(scope(), "table has no visible columns"));
    }
    let primary_keys = db
        .table_primary_keys(table)
        .await
        .map_err(|e| SyncError::schema(scope(), e))?;
    Ok(TableDescriptor::new(table, columns, primary_keys))
}

// =====================================================
// TABLE SET DIFF
// =====================================================

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct TableSetDiff {
    pub new_in_local: Vec<String>,
    pub new_in_cpanel: Vec<String>,
    pub common: Vec<String>,
}

/// Exact (case-sensitive) name matching, each list alphabetical.
pub fn diff_table_sets(local: &[String], cpanel: &[String]) -> TableSetDiff {
    let local_set = local.iter().collect::<BTreeSet<_>>();
    let cpanel_set = cpanel.iter().collect::<BTreeSet<_>>();

    TableSetDiff {
        new_in_local: local_set.difference(&cpanel_set).map(|t| t.to_string()).collect(),
        new_in_cpanel: cpanel_set.difference(&local_set).map(|t| t.to_string()).collect(),
        common: local_set.intersection(&cpanel_set).map(|t| t.to_string()).collect(),
    }
}

// =====================================================
// COLUMN DRIFT
// =====================================================

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDiffType {
    OnlyInLocal,
    OnlyInCpanel,
    TypeChanged,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ColumnDifference {
    pub table: String,
    pub column: String,
    pub diff_type: ColumnDiffType,
    pub local_type: Option<String>,
    pub cpanel_type: Option<String>,
}

/// Column names match case-insensitively; declared types compare ignoring case.
pub fn diff_table_columns(local: &TableDescriptor, cpanel: &TableDescriptor) -> Vec<ColumnDifference> {
    let local_map = local
        .columns
        .iter()
        .map(|c| (c.name.to_lowercase(), c))
        .collect::<BTreeMap<_, _>>();
    let cpanel_map = cpanel
        .columns
        .iter()
        .map(|c| (c.name.to_lowercase(), c))
        .collect::<BTreeMap<_, _>>();

    let mut diffs = Vec::new();
    for column in &local.columns {
        match cpanel_map.get(&column.name.to_lowercase()) {
            Some(other) => {
                if !column.column_type.eq_ignore_ascii_case(&other.column_type) {
                    diffs.push(ColumnDifference {
                        table: local.name.clone(),
                        column: column.name.clone(),
                        diff_type: ColumnDiffType::TypeChanged,
                        local_type: Some(column.column_type.clone()),
                        cpanel_type: Some(other.column_type.clone()),
                    });
                }
            }
            None => diffs.push(ColumnDifference {
                table: local.name.clone(),
                column: column.name.clone(),
                diff_type: ColumnDiffType::OnlyInLocal,
                local_type: Some(column.column_type.clone()),
                cpanel_type: None,
            }),
        }
    }

    for column in &cpanel.columns {
        if !local_map.contains_key(&column.name.to_lowercase()) {
            diffs.push(ColumnDifference {
                table: local.name.clone(),
                column: column.name.clone(),
                diff_type: ColumnDiffType::OnlyInCpanel,
                local_type: None,
                cpanel_type: Some(column.column_type.clone()),
            });
        }
    }

    diffs
}
