// =====================================================
// COMMON DATABASE TYPES AND STRUCTURES
// =====================================================

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::db::connections::DatabaseConnector;
use crate::db_sync::locks::DestinationLocks;
use crate::db_sync::settings::SettingsStore;

// --- Database Driver Enum ---
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    #[default]
    MySQL,
}

// --- Connection Profile ---
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct ConnectionProfile {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub driver: DatabaseDriver,
}

pub fn default_mysql_port() -> u16 {
    3306
}

impl ConnectionProfile {
    /// Names of the required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.database.trim().is_empty() {
            missing.push("database");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        missing
    }

    /// Identity of the database this profile points at, used to key destination locks.
    pub fn destination_key(&self) -> String {
        format!(
            "{}:{}/{}",
            self.host.trim().to_ascii_lowercase(),
            self.port,
            self.database.trim()
        )
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("driver", &self.driver)
            .finish()
    }
}

// --- State Management ---
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<crate::config::SyncConfig>,
    pub settings: Arc<dyn SettingsStore>,
    pub connector: Arc<dyn DatabaseConnector>,
    pub encryption_key: Arc<Vec<u8>>,
    pub locks: DestinationLocks,
}

// --- Column Schema ---
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub column_type: String,
    pub is_nullable: bool,
    pub column_key: String,
    pub column_default: Option<String>,
    pub extra: String,
}

impl ColumnSchema {
    /// Generated columns reject explicit values on INSERT.
    pub fn is_generated(&self) -> bool {
        let extra = self.extra.to_ascii_uppercase();
        extra.contains("VIRTUAL GENERATED") || extra.contains("STORED GENERATED")
    }
}

// --- Primary Key ---
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PrimaryKey {
    pub column_name: String,
    pub ordinal_position: i32,
}

// --- Table Descriptor ---
#[derive(Serialize, Debug, Clone, Default)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub primary_key: Vec<String>,
    pub keyless: bool,
}

impl TableDescriptor {
    pub fn new(name: &str, columns: Vec<ColumnSchema>, mut primary_keys: Vec<PrimaryKey>) -> Self {
        primary_keys.sort_by_key(|pk| pk.ordinal_position);
        let primary_key = primary_keys
            .into_iter()
            .map(|pk| pk.column_name)
            .collect::<Vec<String>>();
        Self {
            name: name.to_string(),
            keyless: primary_key.is_empty(),
            columns,
            primary_key,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn insertable_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|column| !column.is_generated())
            .map(|column| column.name.clone())
            .collect()
    }
}

// --- Server Probe ---
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ServerProbe {
    pub table_count: usize,
    pub server_version: String,
}

// --- Cell Value ---
/// A single cell read from either database.
///
/// Integers of different signedness and floats compare by numeric value, so
/// an `INT` on one server and an `INT UNSIGNED` on the other holding the same
/// number are equal.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    fn rank(&self) -> u8 {
        match self {
            SqlValue::Null => 0,
            SqlValue::Int(_) | SqlValue::UInt(_) | SqlValue::Float(_) => 1,
            SqlValue::Text(_) => 2,
            SqlValue::Bytes(_) => 3,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Int(v) => serde_json::json!(v),
            SqlValue::UInt(v) => serde_json::json!(v),
            SqlValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SqlValue::Text(v) => serde_json::Value::String(v.clone()),
            SqlValue::Bytes(v) => serde_json::Value::String(format!("0x{}", hex::encode(v))),
        }
    }
}

fn compare_numbers(left: &SqlValue, right: &SqlValue) -> Ordering {
    match (integer_value(left), integer_value(right)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(a), None) => compare_integer_float(a, float_value(right)),
        (None, Some(b)) => compare_integer_float(b, float_value(left)).reverse(),
        (None, None) => float_value(left).total_cmp(&float_value(right)),
    }
}

fn integer_value(value: &SqlValue) -> Option<i128> {
    match value {
        SqlValue::Int(v) => Some(i128::from(*v)),
        SqlValue::UInt(v) => Some(i128::from(*v)),
        _ => None,
    }
}

fn float_value(value: &SqlValue) -> f64 {
    match value {
        SqlValue::Float(v) => *v,
        _ => 0.0,
    }
}

/// Exact comparison; never rounds the integer through `f64`.
fn compare_integer_float(integer: i128, float: f64) -> Ordering {
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    let floor = float.floor();
    if floor >= i128::MAX as f64 {
        return Ordering::Less;
    }
    if floor < i128::MIN as f64 {
        return Ordering::Greater;
    }
    match integer.cmp(&(floor as i128)) {
        Ordering::Equal if float > floor => Ordering::Less,
        other => other,
    }
}

impl Ord for SqlValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
            (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
            (SqlValue::Bytes(a), SqlValue::Bytes(b)) => a.cmp(b),
            _ => compare_numbers(self, other),
        }
    }
}

impl PartialOrd for SqlValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SqlValue {}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

/// A row keyed by column name.
pub type SqlRow = BTreeMap<String, SqlValue>;

/// Primary-key values of a row in key-column order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowKey(pub Vec<SqlValue>);

impl RowKey {
    /// A scalar for single-column keys, an object for composite keys.
    pub fn to_json(&self, key_columns: &[String]) -> serde_json::Value {
        if self.0.len() == 1 {
            return self.0[0].to_json();
        }
        let mut object = serde_json::Map::new();
        for (column, value) in key_columns.iter().zip(self.0.iter()) {
            object.insert(column.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }
}
