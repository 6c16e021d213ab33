use std::{fmt, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use log::{error, info, warn};
use rayon::prelude::*;

use crate::{
    audit::{audit, check_invariants},
    data::CanonicalTable,
    extract::{ExportTool, extract_source},
    harmonize::{HarmonizeOptions, harmonize},
    registry::Registry,
    report::{RunReport, UnionSummary, YearOutcome, YearStatus},
    source::{SourceFile, discover, find_year},
    union::assemble,
    warehouse::Warehouse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every discovered year, replacing what is stored.
    Run,
    /// One new year; fails for that year if it is already stored.
    Add(i32),
    /// One year, replacing what is stored.
    Replace(i32),
    /// Extract, harmonize, union and audit in memory without writing.
    Validate(Option<i32>),
}

impl Mode {
    pub fn writes(&self) -> bool {
        !matches!(self, Mode::Validate(_))
    }

    fn target_year(&self) -> Option<i32> {
        match self {
            Mode::Run | Mode::Validate(None) => None,
            Mode::Add(year) | Mode::Replace(year) | Mode::Validate(Some(year)) => Some(*year),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Run => write!(f, "run"),
            Mode::Add(year) => write!(f, "add {year}"),
            Mode::Replace(year) => write!(f, "replace {year}"),
            Mode::Validate(None) => write!(f, "validate"),
            Mode::Validate(Some(year)) => write!(f, "validate {year}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub data_dir: PathBuf,
    pub source_label: Option<String>,
    pub sequential: bool,
    pub tool: ExportTool,
}

struct YearRun {
    outcome: YearOutcome,
    table: Option<CanonicalTable>,
}

pub fn execute(
    registry: &Registry,
    warehouse: Option<&dyn Warehouse>,
    mode: Mode,
    options: &PipelineOptions,
) -> Result<RunReport> {
    let mut report = RunReport::new(mode.to_string(), registry);
    let ingested_at = Local::now().naive_local();

    let sources = match mode.target_year() {
        None => discover(&options.data_dir)?,
        Some(year) => match find_year(&options.data_dir, year)? {
            Some(source) => vec![source],
            None => {
                error!("No source file for {year} in {:?}", options.data_dir);
                report.years.push(YearOutcome::failed(
                    year,
                    "",
                    format!("no source file for {year} in {:?}", options.data_dir),
                ));
                Vec::new()
            }
        },
    };
    if sources.is_empty() && mode.target_year().is_none() {
        warn!("No sources found in {:?}", options.data_dir);
    }
    info!("Processing {} source(s) in {mode} mode", sources.len());

    let process = |source: &SourceFile| {
        process_year(registry, warehouse, mode, options, source, ingested_at)
    };
    let runs: Vec<YearRun> = if options.sequential {
        sources.iter().map(process).collect()
    } else {
        sources.par_iter().map(process).collect()
    };

    let mut fresh = Vec::new();
    for run in runs {
        if let Some(table) = run.table {
            fresh.push((run.outcome.year, table));
        }
        report.years.push(run.outcome);
    }

    // Barrier: every load above has returned.
    let (years, tables) = match warehouse.filter(|_| mode.writes()) {
        Some(warehouse) => {
            let years = warehouse
                .available_years()
                .context("Listing stored years")?;
            let layout = registry.columns();
            let mut tables = Vec::with_capacity(years.len());
            for year in &years {
                match warehouse.read_year(*year, &layout) {
                    Ok(table) => tables.push(table),
                    Err(err) => {
                        report.union =
                            Some(UnionSummary::failed(years.clone(), format!("{err:#}")));
                        return Ok(report);
                    }
                }
            }
            (years, tables)
        }
        None => fresh.into_iter().unzip(),
    };
    if tables.is_empty() {
        warn!("No year tables available; union skipped");
        return Ok(report);
    }

    let unified = match assemble(registry, tables) {
        Ok(unified) => unified,
        Err(err) => {
            error!("Union failed: {err}");
            report.union = Some(UnionSummary::failed(years, err.to_string()));
            return Ok(report);
        }
    };
    if let Some(warehouse) = warehouse.filter(|_| mode.writes())
        && let Err(err) = warehouse.replace_unified(&unified.table)
    {
        error!("Replacing unified table failed: {err:#}");
        report.union = Some(UnionSummary::failed(years, format!("{err:#}")));
        return Ok(report);
    }
    report.union = Some(UnionSummary::from_report(years, &unified.report));

    match audit(&unified.table) {
        Ok(tracking) => report.findings = check_invariants(registry, &tracking),
        Err(err) => {
            error!("Audit failed: {err:#}");
            if let Some(union) = report.union.as_mut() {
                union.error = Some(format!("audit: {err:#}"));
            }
        }
    }
    Ok(report)
}

fn process_year(
    registry: &Registry,
    warehouse: Option<&dyn Warehouse>,
    mode: Mode,
    options: &PipelineOptions,
    source: &SourceFile,
    ingested_at: NaiveDateTime,
) -> YearRun {
    let year = source.year;
    let name = source.file_name();
    let failed = |reason: String| {
        error!("{year}: {reason}");
        YearRun {
            outcome: YearOutcome::failed(year, name.clone(), reason),
            table: None,
        }
    };

    if let (Mode::Add(_), Some(warehouse)) = (mode, warehouse) {
        match warehouse.has_year(year) {
            Ok(true) => {
                return failed(format!(
                    "{year} is already loaded; use replace to overwrite it"
                ));
            }
            Ok(false) => {}
            Err(err) => return failed(format!("{err:#}")),
        }
    }

    info!("{year}: extracting {name}");
    let extracted = match extract_source(source, registry, &options.tool) {
        Ok(extracted) => extracted,
        Err(err) => return failed(err.to_string()),
    };
    let harmonize_options = HarmonizeOptions {
        source_label: options.source_label.clone().unwrap_or_else(|| name.clone()),
        ingested_at,
    };
    let harmonized = harmonize(&extracted.raw, year, registry, &harmonize_options);

    let table = match warehouse.filter(|_| mode.writes()) {
        Some(warehouse) => {
            if let Err(err) = warehouse.load_year(year, &harmonized.table) {
                return failed(format!("load failed: {err:#}"));
            }
            None
        }
        None => Some(harmonized.table),
    };

    YearRun {
        outcome: YearOutcome {
            year,
            source: name,
            status: YearStatus::Ok,
            detection: extracted.detection,
            harmonize: Some(harmonized.report),
        },
        table,
    }
}
