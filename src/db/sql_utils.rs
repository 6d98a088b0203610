// =====================================================
// SQL UTILITIES MODULE
// SQL formatting, statement splitting and file helpers
// =====================================================

use crate::db_types::{SqlRow, SqlValue};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

pub fn quote_identifier_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn escape_sql_string(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\'', "''")
        .replace('\0', "\\0")
}

pub fn value_to_sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::UInt(v) => v.to_string(),
        SqlValue::Float(v) => {
            if v.is_finite() {
                v.to_string()
            } else {
                "NULL".to_string()
            }
        }
        SqlValue::Text(s) => format!("'{}'", escape_sql_string(s)),
        SqlValue::Bytes(bytes) => {
            if bytes.is_empty() {
                "''".to_string()
            } else {
                format!("0x{}", hex::encode(bytes))
            }
        }
    }
}

pub fn ensure_sql_terminated(statement: &str) -> String {
    let trimmed = statement.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.ends_with(';') {
        trimmed.to_string()
    } else {
        format!("{};", trimmed)
    }
}

pub fn write_text_file(file_path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create parent directory: {}", e))?;
        }
    }
    fs::write(file_path, content).map_err(|e| format!("Failed to write file: {}", e))
}

/// Builds one multi-row INSERT covering `rows`, in `columns` order.
pub fn build_insert_statement(table: &str, columns: &[String], rows: &[SqlRow]) -> Option<String> {
    if columns.is_empty() || rows.is_empty() {
        return None;
    }

    let quoted_columns = columns
        .iter()
        .map(|col| quote_identifier_mysql(col))
        .collect::<Vec<String>>()
        .join(", ");

    let tuples = rows
        .iter()
        .map(|row| {
            let values = columns
                .iter()
                .map(|col| value_to_sql_literal(row.get(col).unwrap_or(&SqlValue::Null)))
                .collect::<Vec<String>>()
                .join(", ");
            format!("({})", values)
        })
        .collect::<Vec<String>>()
        .join(",\n");

    Some(format!(
        "INSERT INTO {} ({}) VALUES\n{};",
        quote_identifier_mysql(table),
        quoted_columns,
        tuples
    ))
}

/// Truncate string to max_chars, adding "..." if truncated
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for (idx, ch) in value.chars().enumerate() {
        if idx >= max_chars {
            out.push_str("...");
            break;
        }
        out.push(ch);
    }
    out
}

/// Single-line preview of a statement for log messages.
pub fn statement_preview(statement: &str) -> String {
    let collapsed = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, 120)
}

#[derive(Clone, Copy, PartialEq)]
enum SplitState {
    Normal,
    SingleQuote,
    DoubleQuote,
    Backtick,
    LineComment,
    BlockComment { keep: bool },
}

/// Splits a dump script into individual statements.
///
/// Quoted strings, backtick identifiers and comments are honoured. Plain
/// comments are dropped; MySQL executable comments (`/*! ... */`) are kept.
/// `DELIMITER` blocks are not supported.
pub fn split_sql_statements(script: &str) -> Vec<String> {
    let chars = script.chars().collect::<Vec<char>>();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = SplitState::Normal;
    let mut idx = 0;

    while idx < chars.len() {
        let ch = chars[idx];
        let next = chars.get(idx + 1).copied();

        match state {
            SplitState::Normal => match ch {
                '\'' => {
                    state = SplitState::SingleQuote;
                    current.push(ch);
                }
                '"' => {
                    state = SplitState::DoubleQuote;
                    current.push(ch);
                }
                '`' => {
                    state = SplitState::Backtick;
                    current.push(ch);
                }
                '#' => state = SplitState::LineComment,
                '-' if next == Some('-')
                    && chars.get(idx + 2).map_or(true, |c| c.is_whitespace()) =>
                {
                    state = SplitState::LineComment;
                    idx += 1;
                }
                '/' if next == Some('*') => {
                    let keep = chars.get(idx + 2) == Some(&'!');
                    state = SplitState::BlockComment { keep };
                    if keep {
                        current.push_str("/*");
                    }
                    idx += 1;
                }
                ';' => {
                    let statement = current.trim();
                    if !statement.is_empty() {
                        statements.push(statement.to_string());
                    }
                    current.clear();
                }
                _ => current.push(ch),
            },
            SplitState::SingleQuote | SplitState::DoubleQuote => {
                let quote = if state == SplitState::SingleQuote { '\'' } else { '"' };
                current.push(ch);
                if ch == '\\' {
                    if let Some(escaped) = next {
                        current.push(escaped);
                        idx += 1;
                    }
                } else if ch == quote {
                    if next == Some(quote) {
                        current.push(quote);
                        idx += 1;
                    } else {
                        state = SplitState::Normal;
                    }
                }
            }
            SplitState::Backtick => {
                current.push(ch);
                if ch == '`' {
                    if next == Some('`') {
                        current.push('`');
                        idx += 1;
                    } else {
                        state = SplitState::Normal;
                    }
                }
            }
            SplitState::LineComment => {
                if ch == '\n' {
                    state = SplitState::Normal;
                    current.push('\n');
                }
            }
            SplitState::BlockComment { keep } => {
                if ch == '*' && next == Some('/') {
                    if keep {
                        current.push_str("*/");
                    } else {
                        current.push(' ');
                    }
                    state = SplitState::Normal;
                    idx += 1;
                } else if keep {
                    current.push(ch);
                }
            }
        }
        idx += 1;
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}

fn structure_statement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(CREATE|DROP|ALTER|RENAME|TRUNCATE)\b").expect("valid regex")
    })
}

fn statement_table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:INSERT(?:\s+IGNORE)?\s+INTO|REPLACE\s+INTO|CREATE\s+TABLE(?:\s+IF\s+NOT\s+EXISTS)?|DROP\s+TABLE(?:\s+IF\s+EXISTS)?|ALTER\s+TABLE|TRUNCATE(?:\s+TABLE)?|UPDATE|DELETE\s+FROM|LOCK\s+TABLES)\s+(?:`((?:[^`]|``)+)`|([A-Za-z0-9_$]+))",
        )
        .expect("valid regex")
    })
}

pub fn is_structure_statement(statement: &str) -> bool {
    structure_statement_regex().is_match(statement)
}

/// Table a DDL/DML statement targets, when it can be read off the statement head.
pub fn statement_table_name(statement: &str) -> Option<String> {
    let captures = statement_table_regex().captures(statement)?;
    if let Some(quoted) = captures.get(1) {
        return Some(quoted.as_str().replace("``", "`"));
    }
    captures.get(2).map(|plain| plain.as_str().to_string())
}
