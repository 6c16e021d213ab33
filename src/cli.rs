use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::extract::{DEFAULT_EXPORT_TIMEOUT, DEFAULT_LIST_TIMEOUT};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Harmonize yearly legislative bill extracts into one canonical dataset",
    long_about = None
)]
pub struct Cli {
    /// Also append every log line to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Harmonize and load every year found in the data directory, then rebuild the union
    Run(RunArgs),
    /// Add or replace a single year, then rebuild the union
    Year(YearArgs),
    /// Extract, harmonize, union and audit in memory without writing anything
    Validate(ValidateArgs),
    /// Print the per-year tracking matrix of a unified CSV
    Audit(AuditArgs),
    /// List canonical fields, their variants and any ambiguous variants
    Mappings(MappingsArgs),
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Field mapping configuration (YAML)
    #[arg(short, long)]
    pub mapping: PathBuf,
    /// Directory holding the yearly source files (.mdb, .accdb, .csv)
    #[arg(short, long = "data-dir")]
    pub data_dir: PathBuf,
    /// Source label stamped on every row (defaults to the source file name)
    #[arg(long = "source-label")]
    pub source_label: Option<String>,
    /// Character encoding of exported and CSV sources (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Program listing a database's tables (defaults to $BILL_HARMONIZER_MDB_TABLES or mdb-tables)
    #[arg(long = "tables-program")]
    pub tables_program: Option<String>,
    /// Program exporting a table as CSV (defaults to $BILL_HARMONIZER_MDB_EXPORT or mdb-export)
    #[arg(long = "export-program")]
    pub export_program: Option<String>,
    /// Seconds to wait for a table listing before killing the tool
    #[arg(long = "list-timeout", default_value_t = DEFAULT_LIST_TIMEOUT.as_secs())]
    pub list_timeout: u64,
    /// Seconds to wait for a table export before killing the tool
    #[arg(long = "export-timeout", default_value_t = DEFAULT_EXPORT_TIMEOUT.as_secs())]
    pub export_timeout: u64,
    /// Process years one after another instead of in parallel
    #[arg(long)]
    pub sequential: bool,
    /// Write the run report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Destination directory for per-year and unified tables
    #[arg(short, long)]
    pub warehouse: PathBuf,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["add", "replace"])
))]
pub struct YearArgs {
    /// Year to ingest
    pub year: i32,
    /// Load a year that is not stored yet; fails if it already exists
    #[arg(long)]
    pub add: bool,
    /// Overwrite the stored table for the year
    #[arg(long)]
    pub replace: bool,
    #[command(flatten)]
    pub source: SourceArgs,
    /// Destination directory for per-year and unified tables
    #[arg(short, long)]
    pub warehouse: PathBuf,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Limit validation to a single year
    #[arg(long)]
    pub year: Option<i32>,
}

#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Field mapping configuration (YAML)
    #[arg(short, long)]
    pub mapping: PathBuf,
    /// Unified CSV to audit
    #[arg(short, long)]
    pub input: PathBuf,
    /// Restrict the matrix to these canonical fields
    #[arg(short = 'f', long = "field", value_delimiter = ',')]
    pub fields: Vec<String>,
}

#[derive(Debug, Args)]
pub struct MappingsArgs {
    /// Field mapping configuration (YAML)
    #[arg(short, long)]
    pub mapping: PathBuf,
}
