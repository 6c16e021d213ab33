//! Schema harmonization: one year's raw table → the canonical layout.
//!
//! Every canonical field is first filled with its category's untracked
//! default, then overlaid with the source column the reverse index resolves
//! to it. Output always has the full canonical column set and exactly one row
//! per input row.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use heck::ToSnakeCase;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;
use similar::TextDiff;

use crate::{
    clean::{Cleaned, ColumnCleaner, ColumnQuality},
    data::{CanonicalTable, RawTable, Value, normalize_header},
    registry::{Category, Registry, Resolution},
};

const SUGGESTION_MIN_RATIO: f32 = 0.8;

#[derive(Debug, Clone)]
pub struct HarmonizeOptions {
    pub source_label: String,
    pub ingested_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedColumn {
    pub source: String,
    pub canonical: String,
}

/// A later source column that resolved to an already-bound canonical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateSource {
    pub source: String,
    pub canonical: String,
    pub kept: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedColumn {
    pub source: String,
    pub suggested_name: String,
    /// Closest registered variant and the canonical field owning it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closest: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarmonizeReport {
    pub year: i32,
    pub source_label: String,
    pub input_rows: usize,
    pub output_rows: usize,
    pub mapped: Vec<MappedColumn>,
    pub unmapped: Vec<UnmappedColumn>,
    pub duplicates: Vec<DuplicateSource>,
    pub untracked: Vec<String>,
    pub quality: BTreeMap<String, ColumnQuality>,
}

impl HarmonizeReport {
    pub fn rejected_columns(&self) -> impl Iterator<Item = (&String, &ColumnQuality)> {
        self.quality.iter().filter(|(_, quality)| !quality.is_clean())
    }
}

#[derive(Debug, Clone)]
pub struct Harmonized {
    pub table: CanonicalTable,
    pub report: HarmonizeReport,
}

struct Binding {
    field: usize,
    source_column: usize,
}

pub fn harmonize(
    raw: &RawTable,
    year: i32,
    registry: &Registry,
    options: &HarmonizeOptions,
) -> Harmonized {
    let fields = registry.fields();
    let index = registry.reverse_index();

    let mut bindings: Vec<Binding> = Vec::new();
    let mut mapped = Vec::new();
    let mut unmapped = Vec::new();
    let mut duplicates = Vec::new();

    for (source_column, header) in raw.headers.iter().enumerate() {
        match index.resolve(header) {
            Resolution::Mapped(field) => {
                let canonical = &fields[field].name;
                if let Some(existing) = bindings.iter().find(|b| b.field == field) {
                    let kept = raw.headers[existing.source_column].clone();
                    warn!(
                        "{year}: column '{header}' also maps to '{canonical}'; keeping '{kept}'"
                    );
                    duplicates.push(DuplicateSource {
                        source: header.clone(),
                        canonical: canonical.clone(),
                        kept,
                    });
                    continue;
                }
                debug!("{year}: '{header}' -> '{canonical}'");
                bindings.push(Binding {
                    field,
                    source_column,
                });
                mapped.push(MappedColumn {
                    source: header.clone(),
                    canonical: canonical.clone(),
                });
            }
            Resolution::Unmapped => unmapped.push(describe_unmapped(header, registry)),
        }
    }

    if !unmapped.is_empty() {
        warn!(
            "{year}: {} unmapped column(s): {}",
            unmapped.len(),
            unmapped.iter().map(|u| u.source.as_str()).join(", ")
        );
    }

    let mut cleaners: Vec<ColumnCleaner> = bindings
        .iter()
        .map(|binding| ColumnCleaner::new(fields[binding.field].value_type))
        .collect();

    let defaults: Vec<Option<Value>> = fields
        .iter()
        .map(|field| field.category.untracked_default())
        .collect();
    let metadata = [
        Some(Value::Integer(i64::from(year))),
        Some(Value::DateTime(options.ingested_at)),
        Some(Value::String(options.source_label.clone())),
    ];

    let mut rows = Vec::with_capacity(raw.row_count());
    for row_index in 0..raw.row_count() {
        let mut row = defaults.clone();
        for (binding, cleaner) in bindings.iter().zip(cleaners.iter_mut()) {
            let category = fields[binding.field].category;
            let outcome = cleaner.clean(raw.cell(row_index, binding.source_column));
            row[binding.field] = overlay(category, outcome);
        }
        row.extend(metadata.iter().cloned());
        rows.push(row);
    }

    let quality: BTreeMap<String, ColumnQuality> = bindings
        .iter()
        .zip(cleaners)
        .map(|(binding, cleaner)| (fields[binding.field].name.clone(), cleaner.finish()))
        .collect();
    for (name, column) in quality.iter().filter(|(_, q)| !q.is_clean()) {
        warn!(
            "{year}: '{name}' rejected {} of {} value(s) ({:.1}% parsed): {}",
            column.rejected,
            column.present,
            column.parsed_fraction() * 100.0,
            column.rejected_tokens.keys().take(5).join(", ")
        );
    }

    let untracked = fields
        .iter()
        .enumerate()
        .filter(|(position, _)| !bindings.iter().any(|b| b.field == *position))
        .map(|(_, field)| field.name.clone())
        .collect::<Vec<_>>();

    info!(
        "{year}: harmonized {} row(s); {} column(s) mapped, {} unmapped, {} canonical field(s) untracked",
        rows.len(),
        mapped.len(),
        unmapped.len(),
        untracked.len()
    );

    let table = CanonicalTable {
        label: options.source_label.clone(),
        columns: registry.columns(),
        rows,
    };
    let report = HarmonizeReport {
        year,
        source_label: options.source_label.clone(),
        input_rows: raw.row_count(),
        output_rows: table.row_count(),
        mapped,
        unmapped,
        duplicates,
        untracked,
        quality,
    };
    Harmonized { table, report }
}

/// Applies a cleaned source cell over the category default. Status fields are
/// never null: a missing or unrecognized status cell means "did not happen".
/// The unrecognized token itself stays visible in the column quality.
fn overlay(category: Category, outcome: Cleaned<Value>) -> Option<Value> {
    match (category, outcome) {
        (_, Cleaned::Value(value)) => Some(value),
        (Category::Status, Cleaned::Null | Cleaned::Rejected(_)) => Some(Value::Boolean(false)),
        (
            Category::Identifier
            | Category::PolicyCategory
            | Category::Intent
            | Category::Date
            | Category::FreeText,
            Cleaned::Null | Cleaned::Rejected(_),
        ) => None,
    }
}

fn describe_unmapped(header: &str, registry: &Registry) -> UnmappedColumn {
    let normalized = normalize_header(header);
    let mut best: Option<(f32, &str, &str)> = None;
    for field in registry.fields() {
        for candidate in field.variants.iter().chain(std::iter::once(&field.name)) {
            let ratio =
                TextDiff::from_chars(normalized.as_str(), normalize_header(candidate).as_str())
                    .ratio();
            if ratio >= SUGGESTION_MIN_RATIO && best.is_none_or(|(score, _, _)| ratio > score) {
                best = Some((ratio, candidate.as_str(), field.name.as_str()));
            }
        }
    }
    UnmappedColumn {
        source: header.to_string(),
        suggested_name: header.to_snake_case(),
        closest: best.map(|(_, variant, canonical)| (variant.to_string(), canonical.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const MAPPING: &str = r#"
categories:
  - category: identifier
    fields:
      - name: state
        variants: ["State"]
  - category: status
    fields:
      - name: enacted
        variants: ["Enacted"]
  - category: policy_category
    fields:
      - name: abortion
        variants: ["Abortion"]
"#;

    fn options() -> HarmonizeOptions {
        HarmonizeOptions {
            source_label: "unit".to_string(),
            ingested_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn rejected_status_token_becomes_false_and_is_counted() {
        let registry = Registry::from_yaml_str(MAPPING).unwrap();
        let raw = RawTable::new(
            vec!["State".into(), "Enacted".into(), "Abortion".into()],
            vec![vec!["TX".into(), "maybe".into(), "maybe".into()]],
        );
        let result = harmonize(&raw, 2010, &registry, &options());
        assert_eq!(
            result.table.value(0, "enacted"),
            Some(&Value::Boolean(false))
        );
        assert_eq!(result.table.value(0, "abortion"), None);
        assert_eq!(
            result.report.quality["enacted"].rejected_tokens.get("maybe"),
            Some(&1)
        );
        assert_eq!(result.report.rejected_columns().count(), 2);
    }

    #[test]
    fn unmapped_columns_carry_suggestions() {
        let registry = Registry::from_yaml_str(MAPPING).unwrap();
        let raw = RawTable::new(vec!["Abortions".into(), "Sponsor Name".into()], vec![]);
        let result = harmonize(&raw, 2010, &registry, &options());
        let unmapped = &result.report.unmapped;
        assert_eq!(unmapped.len(), 2);
        assert_eq!(
            unmapped[0].closest,
            Some(("Abortion".to_string(), "abortion".to_string()))
        );
        assert_eq!(unmapped[1].suggested_name, "sponsor_name");
        assert_eq!(unmapped[1].closest, None);
    }
}
