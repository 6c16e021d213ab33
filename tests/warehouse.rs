mod common;

use bill_harmonizer::{
    data::{RawTable, Value},
    harmonize::{HarmonizeOptions, harmonize},
    registry::ColumnRole,
    source::{SourceKind, discover, find_year},
    warehouse::{CsvWarehouse, Warehouse},
};
use chrono::NaiveDate;
use common::{TestWorkspace, registry};

fn options() -> HarmonizeOptions {
    HarmonizeOptions {
        source_label: "bills_2016.csv".to_string(),
        ingested_at: NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 15, 0)
            .unwrap(),
    }
}

#[test]
fn stored_year_reads_back_typed() {
    let workspace = TestWorkspace::new();
    let warehouse = CsvWarehouse::open(workspace.path().join("warehouse")).unwrap();
    let registry = registry();
    let raw = RawTable::new(
        vec![
            "State".into(),
            "Enacted".into(),
            "Last Action".into(),
            "Description".into(),
        ],
        vec![
            vec!["TX".into(), "-1".into(), "3/1/2016".into(), "Clinic, \"TRAP\" rules".into()],
            vec!["CA".into(), "".into(), "".into(), "".into()],
        ],
    );
    let table = harmonize(&raw, 2016, &registry, &options()).table;

    warehouse.load_year(2016, &table).unwrap();
    assert!(warehouse.has_year(2016).unwrap());
    assert!(!warehouse.has_year(2017).unwrap());

    let stored = warehouse.read_year(2016, &registry.columns()).unwrap();
    assert_eq!(stored.columns, table.columns);
    assert_eq!(stored.rows, table.rows);
    assert_eq!(
        stored.value(0, "last_action_date"),
        Some(&Value::Date(NaiveDate::from_ymd_opt(2016, 3, 1).unwrap()))
    );
}

#[test]
fn reload_replaces_and_years_are_listed_in_order() {
    let workspace = TestWorkspace::new();
    let warehouse = CsvWarehouse::open(workspace.path().join("warehouse")).unwrap();
    let registry = registry();
    let one = harmonize(
        &RawTable::new(vec!["State".into()], vec![vec!["TX".into()]]),
        2019,
        &registry,
        &options(),
    )
    .table;
    let two = harmonize(
        &RawTable::new(vec!["State".into()], vec![vec!["TX".into()], vec!["OK".into()]]),
        2019,
        &registry,
        &options(),
    )
    .table;
    warehouse.load_year(2019, &two).unwrap();
    warehouse.load_year(2003, &one).unwrap();
    warehouse.load_year(2019, &one).unwrap();
    warehouse.replace_unified(&one).unwrap();

    assert_eq!(warehouse.available_years().unwrap(), vec![2003, 2019]);
    assert_eq!(
        warehouse
            .read_year(2019, &registry.columns())
            .unwrap()
            .row_count(),
        1
    );
    assert!(warehouse.unified_path().is_file());
}

#[test]
fn failed_replace_leaves_no_staging_file() {
    let workspace = TestWorkspace::new();
    let root = workspace.dir("warehouse");
    let warehouse = CsvWarehouse::open(&root).unwrap();
    let table = harmonize(
        &RawTable::new(vec!["State".into()], vec![vec!["TX".into()]]),
        2019,
        &registry(),
        &options(),
    )
    .table;
    // A directory in the target's place makes the final rename fail.
    workspace.dir("warehouse/historical_bills_2019.csv/occupied");

    assert!(warehouse.load_year(2019, &table).is_err());
    let leftovers = std::fs::read_dir(&root)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn unknown_stored_columns_are_kept_unregistered() {
    let workspace = TestWorkspace::new();
    let warehouse = CsvWarehouse::open(workspace.path()).unwrap();
    workspace.write("historical_bills_2004.csv", "state,sponsor\nTX,Smith\n");
    let stored = warehouse.read_year(2004, &registry().columns()).unwrap();
    assert_eq!(stored.columns[1].role, ColumnRole::Unregistered);
    assert_eq!(
        stored.value(0, "sponsor"),
        Some(&Value::String("Smith".to_string()))
    );
}

#[test]
fn discovery_keeps_first_file_per_year() {
    let workspace = TestWorkspace::new();
    let data = workspace.dir("data");
    workspace.write("data/Legislative 2012.mdb", "");
    workspace.write("data/Legislative 2012 copy.accdb", "");
    workspace.write("data/bills_2024.csv", "State\n");
    workspace.write("data/readme.txt", "");
    workspace.write("data/archive.mdb", "");

    let sources = discover(&data).unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].year, 2012);
    assert_eq!(sources[0].file_name(), "Legislative 2012 copy.accdb");
    assert_eq!(sources[0].kind, SourceKind::Database);
    assert_eq!(sources[1].kind, SourceKind::Csv);

    assert_eq!(find_year(&data, 2024).unwrap().map(|s| s.year), Some(2024));
    assert!(find_year(&data, 2030).unwrap().is_none());
}
