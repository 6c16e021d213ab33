pub mod audit;
pub mod clean;
pub mod cli;
pub mod data;
pub mod detect;
pub mod error;
pub mod extract;
pub mod harmonize;
pub mod io_utils;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod source;
pub mod table;
pub mod union;
pub mod warehouse;

use std::{
    env,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::OnceLock,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::{
    audit::Severity,
    cli::{AuditArgs, Cli, Commands, MappingsArgs, SourceArgs},
    extract::ExportTool,
    pipeline::{Mode, PipelineOptions},
    registry::Registry,
    report::{EXIT_FAILED, EXIT_OK, RunReport},
    union::UNIFIED_LABEL,
    warehouse::{CsvWarehouse, Warehouse},
};

static LOGGER: OnceLock<()> = OnceLock::new();

struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let tee = match log_file {
        Some(path) => Some(Tee {
            file: OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Opening log file {path:?}"))?,
        }),
        None => None,
    };
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("bill_harmonizer", LevelFilter::Info);
        }
        if let Some(tee) = tee {
            builder.target(env_logger::Target::Pipe(Box::new(tee)));
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
    Ok(())
}

/// Parses the command line and runs it. `Ok` carries the process exit code;
/// `Err` is a fatal failure.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;
    match cli.command {
        Commands::Run(args) => {
            let warehouse = CsvWarehouse::open(&args.warehouse)?;
            execute_pipeline(&args.source, Some(&warehouse), Mode::Run)
        }
        Commands::Year(args) => {
            let warehouse = CsvWarehouse::open(&args.warehouse)?;
            let mode = if args.add {
                Mode::Add(args.year)
            } else {
                Mode::Replace(args.year)
            };
            execute_pipeline(&args.source, Some(&warehouse), mode)
        }
        Commands::Validate(args) => {
            execute_pipeline(&args.source, None, Mode::Validate(args.year))
        }
        Commands::Audit(args) => handle_audit(&args),
        Commands::Mappings(args) => handle_mappings(&args),
    }
}

fn load_registry(path: &Path) -> Result<Registry> {
    let registry =
        Registry::load(path).with_context(|| format!("Loading field mappings from {path:?}"))?;
    info!(
        "Loaded {} canonical field(s) from {path:?} (version {}, {})",
        registry.fields().len(),
        registry.version().unwrap_or("unversioned"),
        registry.short_fingerprint()
    );
    Ok(registry)
}

fn export_tool(args: &SourceArgs) -> Result<ExportTool> {
    let mut tool = ExportTool::from_env();
    if let Some(program) = &args.tables_program {
        tool.list_program = program.clone();
    }
    if let Some(program) = &args.export_program {
        tool.export_program = program.clone();
    }
    tool.list_timeout = Duration::from_secs(args.list_timeout);
    tool.export_timeout = Duration::from_secs(args.export_timeout);
    tool.encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    Ok(tool)
}

fn execute_pipeline(
    args: &SourceArgs,
    warehouse: Option<&CsvWarehouse>,
    mode: Mode,
) -> Result<i32> {
    let registry = load_registry(&args.mapping)?;
    let options = PipelineOptions {
        data_dir: args.data_dir.clone(),
        source_label: args.source_label.clone(),
        sequential: args.sequential,
        tool: export_tool(args)?,
    };
    let report = pipeline::execute(
        &registry,
        warehouse.map(|w| w as &dyn Warehouse),
        mode,
        &options,
    )?;
    finish(&report, args.report.as_deref())
}

fn finish(report: &RunReport, json: Option<&Path>) -> Result<i32> {
    print!("{}", report.render_text());
    if let Some(path) = json {
        report.write_json(path)?;
        info!("Run report written to {path:?}");
    }
    let code = report.exit_code();
    if code != EXIT_OK {
        warn!(
            "{} year(s) failed, {} audit violation(s)",
            report.failed_years().count(),
            report.violations().count()
        );
    }
    Ok(code)
}

fn handle_audit(args: &AuditArgs) -> Result<i32> {
    let registry = load_registry(&args.mapping)?;
    let unified = io_utils::read_canonical_table(&args.input, UNIFIED_LABEL, &registry.columns())
        .with_context(|| format!("Reading unified table {:?}", args.input))?;
    for field in &args.fields {
        if registry.field(field).is_none() {
            warn!("'{field}' is not a canonical field");
        }
    }
    let tracking = audit::audit(&unified)?;
    table::print_table(
        &audit::TrackingAudit::render_headers(),
        &tracking.render_rows(&args.fields),
    );
    let findings = audit::check_invariants(&registry, &tracking);
    for finding in &findings {
        println!(
            "{:?}: {} {} {}",
            finding.severity, finding.year, finding.field, finding.message
        );
    }
    if findings.iter().any(|f| f.severity == Severity::Violation) {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_OK)
    }
}

fn handle_mappings(args: &MappingsArgs) -> Result<i32> {
    let registry = load_registry(&args.mapping)?;
    let headers = ["#", "name", "category", "type", "variants"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = registry
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            vec![
                (idx + 1).to_string(),
                field.name.clone(),
                field.category.to_string(),
                field.value_type.to_string(),
                field.variants.join(", "),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    let ambiguities = registry.reverse_index().ambiguities();
    if !ambiguities.is_empty() {
        println!();
        for ambiguity in ambiguities {
            println!(
                "ambiguous variant '{}': kept for '{}', ignored for '{}'",
                ambiguity.variant, ambiguity.kept, ambiguity.ignored
            );
        }
    }
    Ok(EXIT_OK)
}
