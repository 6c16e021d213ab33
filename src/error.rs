use std::{path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Mapping file {path:?} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mapping file is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Canonical field at position {position} in category '{category}' has an empty name")]
    EmptyName { category: String, position: usize },

    #[error("Canonical field '{name}' is defined more than once")]
    DuplicateField { name: String },

    #[error("Canonical field '{name}' collides with the reserved metadata column of the same name")]
    ReservedName { name: String },

    #[error("Status field '{name}' must be declared boolean but is '{datatype}'")]
    StatusNotBoolean { name: String, datatype: String },

    #[error("Table pattern '{pattern}' is not a valid regular expression: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    #[error("Source lists no tables")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("'{program}' exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("'{program}' produced no output for {target}")]
    EmptyOutput { program: String, target: String },

    #[error("Output of {target} is not valid CSV: {source}")]
    Csv {
        target: String,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error("Reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum UnionError {
    #[error(
        "Table '{label}' diverges from the canonical layout (missing: [{missing}], unexpected: [{unexpected}])",
        missing = .missing.join(", "),
        unexpected = .unexpected.join(", ")
    )]
    Divergent {
        label: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Table '{label}' declares column '{column}' as {found} but the canonical type is {expected}")]
    TypeMismatch {
        label: String,
        column: String,
        expected: String,
        found: String,
    },

    #[error("Union produced {actual} row(s) but the inputs hold {expected}")]
    RowCount { expected: usize, actual: usize },
}
