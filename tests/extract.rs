#![cfg(unix)]

mod common;

use std::time::Duration;

use bill_harmonizer::{
    detect::DetectionMethod,
    error::ExtractError,
    extract::{ExportTool, extract_source},
    source::{SourceFile, SourceKind},
};
use common::{TestWorkspace, registry};

fn tool(workspace: &TestWorkspace, list_body: &str, export_body: &str) -> ExportTool {
    ExportTool {
        list_program: workspace
            .shim("mdb-tables", list_body)
            .display()
            .to_string(),
        export_program: workspace
            .shim("mdb-export", export_body)
            .display()
            .to_string(),
        list_timeout: Duration::from_secs(5),
        export_timeout: Duration::from_secs(5),
        ..ExportTool::default()
    }
}

fn database(workspace: &TestWorkspace, year: i32) -> SourceFile {
    SourceFile {
        path: workspace.write(&format!("data/Legislative {year}.mdb"), "binary"),
        year,
        kind: SourceKind::Database,
    }
}

#[test]
fn lists_detects_and_exports_primary_table() {
    let workspace = TestWorkspace::new();
    let tool = tool(
        &workspace,
        r#"[ "$1" = "-1" ] || exit 9
printf 'Switchboard\nLegislative Monitoring\nLookups\n'"#,
        r#"[ "$2" = "Legislative Monitoring" ] || exit 7
printf 'State,Enacted\nTX,-1\n\nCA,0\n'"#,
    );
    let source = database(&workspace, 2014);
    let extracted = extract_source(&source, &registry(), &tool).unwrap();
    let detection = extracted.detection.unwrap();
    assert_eq!(detection.table, "Legislative Monitoring");
    assert!(matches!(detection.method, DetectionMethod::Pattern { .. }));
    assert_eq!(extracted.raw.headers, vec!["State", "Enacted"]);
    assert_eq!(extracted.raw.row_count(), 2);
}

#[test]
fn non_zero_exit_carries_stderr() {
    let workspace = TestWorkspace::new();
    let tool = tool(
        &workspace,
        "echo 'file is not a database' >&2; exit 3",
        "exit 0",
    );
    let err = extract_source(&database(&workspace, 2009), &registry(), &tool).unwrap_err();
    match err {
        ExtractError::NonZeroExit { stderr, .. } => {
            assert_eq!(stderr, "file is not a database");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn empty_export_is_an_error() {
    let workspace = TestWorkspace::new();
    let tool = tool(&workspace, "echo Bills", "printf '\\n'");
    let err = extract_source(&database(&workspace, 2010), &registry(), &tool).unwrap_err();
    assert!(matches!(err, ExtractError::EmptyOutput { .. }));
}

#[test]
fn hung_tool_is_killed_after_timeout() {
    let workspace = TestWorkspace::new();
    let mut tool = tool(&workspace, "exec sleep 30", "exit 0");
    tool.list_timeout = Duration::from_millis(300);
    let started = std::time::Instant::now();
    let err = extract_source(&database(&workspace, 2011), &registry(), &tool).unwrap_err();
    assert!(matches!(err, ExtractError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn missing_program_is_a_spawn_error() {
    let workspace = TestWorkspace::new();
    let mut tool = tool(&workspace, "exit 0", "exit 0");
    tool.list_program = workspace
        .path()
        .join("no-such-tool")
        .display()
        .to_string();
    let err = extract_source(&database(&workspace, 2012), &registry(), &tool).unwrap_err();
    assert!(matches!(err, ExtractError::Spawn { .. }));
}

#[test]
fn empty_listing_is_not_found() {
    let workspace = TestWorkspace::new();
    let tool = tool(&workspace, "exit 0", "exit 0");
    let err = extract_source(&database(&workspace, 2013), &registry(), &tool).unwrap_err();
    assert!(matches!(err, ExtractError::Detect(_)));
}

#[test]
fn csv_sources_are_read_directly() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "data/bills_2024.csv",
        "\u{feff}State,Bill Number,Enacted\nTX,HB 1,TRUE\nCA,SB 2\n",
    );
    let source = SourceFile {
        path,
        year: 2024,
        kind: SourceKind::Csv,
    };
    let extracted = extract_source(&source, &registry(), &ExportTool::default()).unwrap();
    assert!(extracted.detection.is_none());
    assert_eq!(extracted.raw.headers[0], "State");
    assert_eq!(extracted.raw.rows[1], vec!["CA", "SB 2", ""]);
}
