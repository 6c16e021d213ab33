use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow};
use serde::{Serialize, Serializer};

use crate::{
    data::{CanonicalTable, Value},
    registry::{Category, ColumnRole, Registry, YEAR_COLUMN},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackingState {
    NeverExisted,
    PartiallyTracked,
    FullyTracked,
}

impl TrackingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::NeverExisted => "never-existed",
            TrackingState::PartiallyTracked => "partially-tracked",
            TrackingState::FullyTracked => "fully-tracked",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldCounts {
    pub null_count: usize,
    pub true_count: usize,
    pub false_count: usize,
    pub value_count: usize,
}

impl FieldCounts {
    fn record(&mut self, value: Option<&Value>) {
        match value {
            None => self.null_count += 1,
            Some(Value::Boolean(true)) => self.true_count += 1,
            Some(Value::Boolean(false)) => self.false_count += 1,
            Some(_) => self.value_count += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.null_count + self.populated()
    }

    pub fn populated(&self) -> usize {
        self.true_count + self.false_count + self.value_count
    }

    pub fn null_fraction(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.null_count as f64 / total as f64,
        }
    }

    pub fn tracking_state(&self) -> TrackingState {
        if self.populated() == 0 {
            TrackingState::NeverExisted
        } else if self.null_count == 0 {
            TrackingState::FullyTracked
        } else {
            TrackingState::PartiallyTracked
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingAudit {
    entries: BTreeMap<(i64, String), FieldCounts>,
}

impl TrackingAudit {
    pub fn get(&self, year: i64, field: &str) -> Option<&FieldCounts> {
        self.entries.get(&(year, field.to_string()))
    }

    pub fn state(&self, year: i64, field: &str) -> Option<TrackingState> {
        self.get(year, field).map(FieldCounts::tracking_state)
    }

    pub fn years(&self) -> BTreeSet<i64> {
        self.entries.keys().map(|(year, _)| *year).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &str, &FieldCounts)> {
        self.entries
            .iter()
            .map(|((year, field), counts)| (*year, field.as_str(), counts))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render_rows(&self, fields: &[String]) -> Vec<Vec<String>> {
        self.iter()
            .filter(|(_, field, _)| fields.is_empty() || fields.iter().any(|f| f == field))
            .map(|(year, field, counts)| {
                vec![
                    year.to_string(),
                    field.to_string(),
                    counts.total().to_string(),
                    counts.null_count.to_string(),
                    counts.true_count.to_string(),
                    counts.false_count.to_string(),
                    counts.value_count.to_string(),
                    format!("{:.1}%", counts.null_fraction() * 100.0),
                    counts.tracking_state().as_str().to_string(),
                ]
            })
            .collect()
    }

    pub fn render_headers() -> Vec<String> {
        [
            "year", "field", "rows", "null", "true", "false", "values", "null_pct", "state",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect()
    }
}

#[derive(Serialize)]
struct AuditEntry<'a> {
    year: i64,
    field: &'a str,
    #[serde(flatten)]
    counts: &'a FieldCounts,
    state: TrackingState,
}

/// Serialized as a list of entries; JSON maps cannot carry tuple keys.
impl Serialize for TrackingAudit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.iter().map(|(year, field, counts)| AuditEntry {
            year,
            field,
            counts,
            state: counts.tracking_state(),
        }))
    }
}

pub fn audit(table: &CanonicalTable) -> Result<TrackingAudit> {
    let year_index = table
        .column_index(YEAR_COLUMN)
        .ok_or_else(|| anyhow!("Table '{}' has no '{YEAR_COLUMN}' column", table.label))?;
    let audited = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, column)| matches!(column.role, ColumnRole::Canonical(_)))
        .map(|(index, column)| (index, column.name.as_str()))
        .collect::<Vec<_>>();

    let mut entries: BTreeMap<(i64, String), FieldCounts> = BTreeMap::new();
    for (row_index, row) in table.rows.iter().enumerate() {
        let year = match row.get(year_index).and_then(Option::as_ref) {
            Some(Value::Integer(year)) => *year,
            other => {
                return Err(anyhow!(
                    "Row {} of '{}' has no usable year ({other:?})",
                    row_index + 1,
                    table.label
                ));
            }
        };
        for (index, name) in &audited {
            entries
                .entry((year, (*name).to_string()))
                .or_default()
                .record(row.get(*index).and_then(Option::as_ref));
        }
    }
    Ok(TrackingAudit { entries })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Violation,
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditFinding {
    pub severity: Severity,
    pub year: i64,
    pub field: String,
    pub message: String,
}

/// Checks the harmonization guarantees against an audit.
///
/// Violations: a status field holding nulls. Advisories: a policy or intent
/// field that is entirely `false` in a year while some later year records
/// `true` values, which usually means a source defaulted an untracked flag.
pub fn check_invariants(registry: &Registry, audit: &TrackingAudit) -> Vec<AuditFinding> {
    let mut findings = Vec::new();
    for field in registry.fields() {
        let per_year = audit
            .iter()
            .filter(|(_, name, _)| *name == field.name)
            .collect::<Vec<_>>();
        match field.category {
            Category::Status => {
                for (year, _, counts) in &per_year {
                    if counts.null_count > 0 {
                        findings.push(AuditFinding {
                            severity: Severity::Violation,
                            year: *year,
                            field: field.name.clone(),
                            message: format!(
                                "status field has {} null value(s)",
                                counts.null_count
                            ),
                        });
                    }
                }
            }
            Category::PolicyCategory | Category::Intent => {
                for (position, (year, _, counts)) in per_year.iter().enumerate() {
                    let all_false = counts.total() > 0 && counts.false_count == counts.total();
                    let later_true = per_year[position + 1..]
                        .iter()
                        .any(|(_, _, later)| later.true_count > 0);
                    if all_false && later_true {
                        findings.push(AuditFinding {
                            severity: Severity::Advisory,
                            year: *year,
                            field: field.name.clone(),
                            message: "entirely false before the field records any true value; \
                                      the source may have defaulted an untracked flag"
                                .to_string(),
                        });
                    }
                }
            }
            Category::Identifier | Category::Date | Category::FreeText => {}
        }
    }
    findings
}
