use std::{
    fs::File,
    io::{BufReader, BufWriter, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};

use crate::{
    data::{CanonicalTable, RawTable, parse_stored_value, render_cell},
    registry::{ColumnRole, ColumnSpec, ValueType},
};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_csv_reader<R>(reader: R, flexible: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(DEFAULT_CSV_DELIMITER)
        .double_quote(true)
        .flexible(flexible);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    flexible: bool,
) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(open_csv_reader(BufReader::new(file), flexible))
}

pub fn open_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(DEFAULT_CSV_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(BufWriter::new(file)))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!("Failed to decode text with encoding {}", used.name()))
    } else {
        Ok(text.into_owned())
    }
}

pub fn parse_raw_table(text: &str, target: &str) -> Result<RawTable, csv::Error> {
    let mut reader = open_csv_reader(text.as_bytes(), true);
    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    let width = headers.len();

    let mut rows = Vec::new();
    let mut blank = 0usize;
    let mut truncated = 0usize;
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            blank += 1;
            continue;
        }
        let mut row = record.iter().map(str::to_string).collect::<Vec<_>>();
        if row.len() > width {
            truncated += 1;
            row.truncate(width);
        }
        row.resize(width, String::new());
        rows.push(row);
    }
    if blank > 0 {
        debug!("{target}: dropped {blank} blank row(s)");
    }
    if truncated > 0 {
        warn!("{target}: {truncated} row(s) had more fields than headers; extra fields dropped");
    }
    Ok(RawTable::new(headers, rows))
}

pub fn write_canonical_table(path: &Path, table: &CanonicalTable) -> Result<()> {
    let mut writer = open_csv_writer(path)?;
    writer
        .write_record(table.columns.iter().map(|c| c.name.as_str()))
        .with_context(|| format!("Writing headers to {path:?}"))?;
    for row in &table.rows {
        writer
            .write_record(row.iter().map(|cell| render_cell(cell.as_ref())))
            .with_context(|| format!("Writing row to {path:?}"))?;
    }
    writer
        .flush()
        .with_context(|| format!("Flushing {path:?}"))?;
    Ok(())
}

/// Reads a stored canonical table. Columns are typed from `layout` by name;
/// columns the layout does not know are kept as unregistered text.
pub fn read_canonical_table(
    path: &Path,
    label: &str,
    layout: &[ColumnSpec],
) -> Result<CanonicalTable> {
    let mut reader = open_csv_reader_from_path(path, false)?;
    let headers = reader
        .headers()
        .with_context(|| format!("Reading headers from {path:?}"))?
        .clone();
    let columns = headers
        .iter()
        .map(|name| {
            layout
                .iter()
                .find(|spec| spec.name == name)
                .cloned()
                .unwrap_or_else(|| ColumnSpec {
                    name: name.to_string(),
                    value_type: ValueType::String,
                    role: ColumnRole::Unregistered,
                })
        })
        .collect::<Vec<_>>();

    let mut table = CanonicalTable::empty(label, columns);
    for (row_index, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("Reading row {} of {path:?}", row_index + 2))?;
        let row = record
            .iter()
            .zip(&table.columns)
            .map(|(cell, spec)| {
                parse_stored_value(cell, spec.value_type).with_context(|| {
                    format!(
                        "Row {} column '{}' of {path:?}",
                        row_index + 2,
                        spec.name
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        table.rows.push(row);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_rows_are_padded_and_blank_rows_dropped() {
        let text = "State,Bill Number,Enacted\nTX,HB 1\n,,\nCA,SB 2,-1,extra\n";
        let raw = parse_raw_table(text, "unit").unwrap();
        assert_eq!(raw.headers, vec!["State", "Bill Number", "Enacted"]);
        assert_eq!(raw.row_count(), 2);
        assert_eq!(raw.rows[0], vec!["TX", "HB 1", ""]);
        assert_eq!(raw.rows[1], vec!["CA", "SB 2", "-1"]);
    }

    #[test]
    fn utf8_bom_is_stripped_from_first_header() {
        let bytes = b"\xEF\xBB\xBFState\nTX\n";
        let text = decode_bytes(bytes, UTF_8).unwrap();
        let raw = parse_raw_table(&text, "bom").unwrap();
        assert_eq!(raw.headers, vec!["State"]);
    }
}
