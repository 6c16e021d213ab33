mod common;

use bill_harmonizer::{
    audit::{Severity, TrackingState, audit, check_invariants},
    data::{CanonicalTable, RawTable, Value},
    harmonize::{HarmonizeOptions, harmonize},
    union::assemble,
};
use chrono::NaiveDate;
use common::registry;

fn year(year: i32, headers: &[&str], rows: &[&[&str]]) -> CanonicalTable {
    let raw = RawTable::new(
        headers.iter().map(|h| h.to_string()).collect(),
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect(),
    );
    let options = HarmonizeOptions {
        source_label: format!("{year}.csv"),
        ingested_at: NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
    };
    harmonize(&raw, year, &registry(), &options).table
}

#[test]
fn counts_split_by_year_and_value() {
    let registry = registry();
    let unified = assemble(
        &registry,
        vec![
            year(2016, &["Abortion"], &[&["-1"], &["0"], &[""]]),
            year(2017, &["Abortion"], &[&["yes"], &["yes"]]),
        ],
    )
    .unwrap();
    let tracking = audit(&unified.table).unwrap();

    let y2016 = tracking.get(2016, "abortion").unwrap();
    assert_eq!(
        (y2016.null_count, y2016.true_count, y2016.false_count),
        (1, 1, 1)
    );
    assert_eq!(
        tracking.state(2016, "abortion"),
        Some(TrackingState::PartiallyTracked)
    );
    assert_eq!(
        tracking.state(2017, "abortion"),
        Some(TrackingState::FullyTracked)
    );
    assert_eq!(tracking.years().into_iter().collect::<Vec<_>>(), vec![2016, 2017]);
}

#[test]
fn audit_serializes_to_json_entries() {
    let registry = registry();
    let unified = assemble(
        &registry,
        vec![year(2016, &["Abortion"], &[&["-1"], &[""]])],
    )
    .unwrap();
    let tracking = audit(&unified.table).unwrap();
    let json = serde_json::to_value(&tracking).expect("audit serializes");
    let entries = json.as_array().expect("a list of entries");
    assert_eq!(entries.len(), tracking.len());
    let abortion = entries
        .iter()
        .find(|e| e["field"] == "abortion")
        .unwrap();
    assert_eq!(abortion["year"], 2016);
    assert_eq!(abortion["null_count"], 1);
    assert_eq!(abortion["true_count"], 1);
    assert_eq!(abortion["state"], "partially-tracked");
}

#[test]
fn harmonized_data_passes_status_invariant() {
    let registry = registry();
    let unified = assemble(
        &registry,
        vec![year(2005, &["State"], &[&["TX"]]), year(2006, &["Enacted"], &[&["maybe"]])],
    )
    .unwrap();
    let tracking = audit(&unified.table).unwrap();
    let violations = check_invariants(&registry, &tracking)
        .into_iter()
        .filter(|f| f.severity == Severity::Violation)
        .count();
    assert_eq!(violations, 0);
}

#[test]
fn null_status_is_a_violation() {
    let registry = registry();
    let mut table = year(2012, &["Enacted"], &[&["-1"], &["0"]]);
    let index = table.column_index("enacted").unwrap();
    table.rows[1][index] = None;
    let tracking = audit(&table).unwrap();
    let findings = check_invariants(&registry, &tracking);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, Severity::Violation);
    assert_eq!(findings[0].field, "enacted");
    assert_eq!(findings[0].year, 2012);
}

#[test]
fn all_false_before_first_true_is_an_advisory() {
    let registry = registry();
    let unified = assemble(
        &registry,
        vec![
            year(2010, &["Positive"], &[&["0"], &["0"]]),
            year(2011, &["Positive"], &[&["-1"], &["0"]]),
        ],
    )
    .unwrap();
    let tracking = audit(&unified.table).unwrap();
    let findings = check_invariants(&registry, &tracking);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, Severity::Advisory);
    assert_eq!(findings[0].field, "positive");
    assert_eq!(findings[0].year, 2010);
}

#[test]
fn table_without_year_column_is_rejected() {
    let table = CanonicalTable::empty("bare", Vec::new());
    assert!(audit(&table).is_err());
}

#[test]
fn render_rows_filter_by_field() {
    let registry = registry();
    let table = year(2020, &["Abortion", "Enacted"], &[&["1", "1"]]);
    let tracking = audit(&table).unwrap();
    let rows = tracking.render_rows(&["abortion".to_string()]);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], "2020");
    assert_eq!(rows[0][1], "abortion");
    assert_eq!(rows[0].last().map(String::as_str), Some("fully-tracked"));
    assert!(registry.field("abortion").is_some());
    assert!(matches!(
        table.value(0, "abortion"),
        Some(Value::Boolean(true))
    ));
}
