//! Union of per-year canonical tables into one multi-year table.
//!
//! Columns are matched by name against the registry's reference order, never
//! by position. A table with the same column set in a different order is
//! realigned and the realignment is reported; a table with a different column
//! set or a conflicting column type fails the union.

use std::collections::HashSet;

use log::{info, warn};
use serde::Serialize;

use crate::{
    data::CanonicalTable,
    error::UnionError,
    registry::{ColumnSpec, Registry},
};

pub const UNIFIED_LABEL: &str = "unified";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnionInput {
    pub label: String,
    pub rows: usize,
    pub realigned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnionReport {
    pub inputs: Vec<UnionInput>,
}

impl UnionReport {
    pub fn realigned(&self) -> impl Iterator<Item = &UnionInput> {
        self.inputs.iter().filter(|input| input.realigned)
    }

    pub fn total_rows(&self) -> usize {
        self.inputs.iter().map(|input| input.rows).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Unified {
    pub table: CanonicalTable,
    pub report: UnionReport,
}

/// Concatenates `tables` in the order given, each aligned to
/// [`Registry::columns`].
pub fn assemble(registry: &Registry, tables: Vec<CanonicalTable>) -> Result<Unified, UnionError> {
    let reference = registry.columns();
    let expected_rows: usize = tables.iter().map(CanonicalTable::row_count).sum();
    let mut rows = Vec::with_capacity(expected_rows);
    let mut report = UnionReport::default();

    for table in tables {
        let positions = alignment(&reference, &table)?;
        let realigned = positions.iter().enumerate().any(|(i, &p)| i != p);
        if realigned {
            warn!(
                "Table '{}' has a different column order than the canonical layout; realigned by name",
                table.label
            );
        }
        report.inputs.push(UnionInput {
            label: table.label.clone(),
            rows: table.row_count(),
            realigned,
        });
        for mut row in table.rows {
            if realigned {
                rows.push(
                    positions
                        .iter()
                        .map(|&p| row.get_mut(p).and_then(Option::take))
                        .collect(),
                );
            } else {
                row.resize(reference.len(), None);
                rows.push(row);
            }
        }
    }

    if rows.len() != expected_rows {
        return Err(UnionError::RowCount {
            expected: expected_rows,
            actual: rows.len(),
        });
    }
    info!(
        "Union assembled {} row(s) from {} table(s)",
        rows.len(),
        report.inputs.len()
    );
    Ok(Unified {
        table: CanonicalTable {
            label: UNIFIED_LABEL.to_string(),
            columns: reference,
            rows,
        },
        report,
    })
}

fn alignment(reference: &[ColumnSpec], table: &CanonicalTable) -> Result<Vec<usize>, UnionError> {
    let reference_names: HashSet<&str> = reference.iter().map(|c| c.name.as_str()).collect();
    let table_names: HashSet<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();

    let missing = reference
        .iter()
        .filter(|c| !table_names.contains(c.name.as_str()))
        .map(|c| c.name.clone())
        .collect::<Vec<_>>();
    let unexpected = table
        .columns
        .iter()
        .filter(|c| !reference_names.contains(c.name.as_str()))
        .map(|c| c.name.clone())
        .collect::<Vec<_>>();
    if !missing.is_empty() || !unexpected.is_empty() || table_names.len() != table.columns.len() {
        return Err(UnionError::Divergent {
            label: table.label.clone(),
            missing,
            unexpected,
        });
    }

    reference
        .iter()
        .map(|expected| {
            let Some(position) = table.column_index(&expected.name) else {
                return Err(UnionError::Divergent {
                    label: table.label.clone(),
                    missing: vec![expected.name.clone()],
                    unexpected: Vec::new(),
                });
            };
            let found = &table.columns[position];
            if found.value_type != expected.value_type {
                return Err(UnionError::TypeMismatch {
                    label: table.label.clone(),
                    column: expected.name.clone(),
                    expected: expected.value_type.to_string(),
                    found: found.value_type.to_string(),
                });
            }
            Ok(position)
        })
        .collect()
}
