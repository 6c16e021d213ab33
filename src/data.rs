use std::fmt;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::registry::{ColumnSpec, ValueType};

/// A cleaned, typed cell of a canonical table. `None` at the row level means
/// "not tracked / unknown".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Eq for Value {}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Integer(_) => ValueType::Integer,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Date(_) => ValueType::Date,
            Value::DateTime(_) => ValueType::DateTime,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// A table in the canonical layout. `columns` is the layout the rows follow;
/// harmonized tables always carry the full registry layout.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTable {
    pub label: String,
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<Option<Value>>>,
}

impl CanonicalTable {
    pub fn empty(label: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            label: label.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_ref()
    }

    pub fn column_values<'a>(
        &'a self,
        column: &str,
    ) -> Option<impl Iterator<Item = Option<&'a Value>> + 'a> {
        let index = self.column_index(column)?;
        Some(self.rows.iter().map(move |row| row[index].as_ref()))
    }
}

pub fn render_cell(value: Option<&Value>) -> String {
    value.map(Value::as_display).unwrap_or_default()
}

/// Parses a cell previously written by [`render_cell`]. Only the strict
/// canonical renderings are accepted; historical encodings go through the
/// cleaner instead.
pub fn parse_stored_value(value: &str, ty: ValueType) -> Result<Option<Value>> {
    if value.is_empty() {
        return Ok(None);
    }
    let parsed = match ty {
        ValueType::String => Value::String(value.to_string()),
        ValueType::Integer => {
            let parsed: i64 = value
                .parse()
                .with_context(|| format!("Failed to parse '{value}' as integer"))?;
            Value::Integer(parsed)
        }
        ValueType::Boolean => match value {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => return Err(anyhow!("Failed to parse '{value}' as boolean")),
        },
        ValueType::Date => {
            let parsed = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .with_context(|| format!("Failed to parse '{value}' as date"))?;
            Value::Date(parsed)
        }
        ValueType::DateTime => {
            let parsed = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .with_context(|| format!("Failed to parse '{value}' as datetime"))?;
            Value::DateTime(parsed)
        }
    };
    Ok(Some(parsed))
}

pub fn normalize_header(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
