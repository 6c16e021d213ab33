use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use crate::{
    data::CanonicalTable,
    io_utils::{read_canonical_table, write_canonical_table},
    registry::ColumnSpec,
};

pub const YEAR_TABLE_PREFIX: &str = "historical_bills_";
pub const UNIFIED_TABLE_NAME: &str = "all_bills_unified";

/// A store of one table per year plus the derived unified table. Every load
/// replaces the target table wholesale.
pub trait Warehouse: Sync {
    fn load_year(&self, year: i32, table: &CanonicalTable) -> Result<()>;

    fn has_year(&self, year: i32) -> Result<bool>;

    fn available_years(&self) -> Result<Vec<i32>>;

    fn read_year(&self, year: i32, layout: &[ColumnSpec]) -> Result<CanonicalTable>;

    fn replace_unified(&self, table: &CanonicalTable) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CsvWarehouse {
    root: PathBuf,
}

impl CsvWarehouse {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Creating warehouse directory {root:?}"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn year_path(&self, year: i32) -> PathBuf {
        self.root.join(format!("{YEAR_TABLE_PREFIX}{year}.csv"))
    }

    pub fn unified_path(&self) -> PathBuf {
        self.root.join(format!("{UNIFIED_TABLE_NAME}.csv"))
    }

    fn replace(&self, target: &Path, table: &CanonicalTable) -> Result<()> {
        let file_name = target
            .file_name()
            .ok_or_else(|| anyhow!("Warehouse target {target:?} has no file name"))?
            .to_string_lossy();
        let staging = self.root.join(format!(".{file_name}.tmp"));
        let written = write_canonical_table(&staging, table)
            .with_context(|| format!("Staging {} row(s) for {target:?}", table.row_count()))
            .and_then(|()| {
                fs::rename(&staging, target)
                    .with_context(|| format!("Replacing {target:?} with {staging:?}"))
            });
        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&staging)
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                warn!("Could not remove staging file {staging:?}: {cleanup}");
            }
            return Err(err);
        }
        debug!("Wrote {} row(s) to {target:?}", table.row_count());
        Ok(())
    }
}

fn year_from_table_file(name: &str) -> Option<i32> {
    name.strip_prefix(YEAR_TABLE_PREFIX)?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

impl Warehouse for CsvWarehouse {
    fn load_year(&self, year: i32, table: &CanonicalTable) -> Result<()> {
        self.replace(&self.year_path(year), table)?;
        info!("Loaded {} row(s) for {year}", table.row_count());
        Ok(())
    }

    fn has_year(&self, year: i32) -> Result<bool> {
        Ok(self.year_path(year).is_file())
    }

    fn available_years(&self) -> Result<Vec<i32>> {
        let mut years = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("Listing warehouse directory {:?}", self.root))?
        {
            let entry = entry.with_context(|| format!("Listing {:?}", self.root))?;
            if let Some(year) = entry.file_name().to_str().and_then(year_from_table_file) {
                years.push(year);
            }
        }
        years.sort_unstable();
        Ok(years)
    }

    fn read_year(&self, year: i32, layout: &[ColumnSpec]) -> Result<CanonicalTable> {
        let path = self.year_path(year);
        read_canonical_table(&path, &year.to_string(), layout)
            .with_context(|| format!("Reading stored table for {year}"))
    }

    fn replace_unified(&self, table: &CanonicalTable) -> Result<()> {
        self.replace(&self.unified_path(), table)?;
        info!("Unified table replaced with {} row(s)", table.row_count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_file_names_carry_the_year() {
        assert_eq!(year_from_table_file("historical_bills_2014.csv"), Some(2014));
        assert_eq!(year_from_table_file("all_bills_unified.csv"), None);
        assert_eq!(year_from_table_file(".historical_bills_2014.csv.tmp"), None);
    }
}
