use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;

pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 2000..=2030;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Database,
    Csv,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("mdb") || ext.eq_ignore_ascii_case("accdb") {
            Some(SourceKind::Database)
        } else if ext.eq_ignore_ascii_case("csv") {
            Some(SourceKind::Csv)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub year: i32,
    pub kind: SourceKind,
}

impl SourceFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl fmt::Display for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.file_name(), self.year)
    }
}

fn four_digit_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|\D)(\d{4})(?:\D|$)").expect("static year pattern compiles")
    })
}

fn short_date_fragment() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|\D)\d{1,2}-\d{1,2}-(\d{2})(?:\D|$)").expect("static date pattern compiles")
    })
}

pub fn year_from_file_name(name: &str) -> Option<i32> {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let mut search = stem;
    while let Some(caps) = four_digit_run().captures(search) {
        let run = caps.get(1)?;
        if let Ok(year) = run.as_str().parse::<i32>()
            && YEAR_RANGE.contains(&year)
        {
            return Some(year);
        }
        search = &search[run.end()..];
    }
    let caps = short_date_fragment().captures(stem)?;
    let short = caps[1].parse::<i32>().ok()?;
    Some(if short <= 30 { 2000 + short } else { 1900 + short })
}

pub fn discover(dir: &Path) -> Result<Vec<SourceFile>> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Reading data directory {dir:?}"))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Listing data directory {dir:?}"))?;
    entries.sort();

    let mut by_year: BTreeMap<i32, SourceFile> = BTreeMap::new();
    for path in entries {
        if !path.is_file() {
            continue;
        }
        let Some(kind) = SourceKind::from_path(&path) else {
            continue;
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(year) = year_from_file_name(&name) else {
            warn!("Skipping '{name}': no year in file name");
            continue;
        };
        if let Some(existing) = by_year.get(&year) {
            warn!(
                "Skipping '{name}': year {year} already provided by '{}'",
                existing.file_name()
            );
            continue;
        }
        debug!("Found {kind:?} source '{name}' for {year}");
        by_year.insert(year, SourceFile { path, year, kind });
    }
    Ok(by_year.into_values().collect())
}

pub fn find_year(dir: &Path, year: i32) -> Result<Option<SourceFile>> {
    Ok(discover(dir)?.into_iter().find(|source| source.year == year))
}
