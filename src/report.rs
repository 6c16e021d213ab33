use std::{fmt::Write as _, fs::File, io::BufWriter, path::Path};

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Serialize;

use crate::{
    audit::{AuditFinding, Severity},
    detect::Detection,
    harmonize::HarmonizeReport,
    registry::{Ambiguity, Registry},
    table::render_table,
    union::UnionReport,
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum YearStatus {
    Ok,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct YearOutcome {
    pub year: i32,
    pub source: String,
    #[serde(flatten)]
    pub status: YearStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<Detection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harmonize: Option<HarmonizeReport>,
}

impl YearOutcome {
    pub fn failed(year: i32, source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            year,
            source: source.into(),
            status: YearStatus::Failed {
                reason: reason.into(),
            },
            detection: None,
            harmonize: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == YearStatus::Ok
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnionSummary {
    pub years: Vec<i32>,
    pub total_rows: usize,
    pub realigned: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnionSummary {
    pub fn from_report(years: Vec<i32>, report: &UnionReport) -> Self {
        Self {
            years,
            total_rows: report.total_rows(),
            realigned: report.realigned().map(|input| input.label.clone()).collect(),
            error: None,
        }
    }

    pub fn failed(years: Vec<i32>, error: impl Into<String>) -> Self {
        Self {
            years,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: String,
    pub registry_version: Option<String>,
    pub registry_fingerprint: String,
    pub ambiguities: Vec<Ambiguity>,
    pub years: Vec<YearOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub union: Option<UnionSummary>,
    pub findings: Vec<AuditFinding>,
}

impl RunReport {
    pub fn new(mode: impl Into<String>, registry: &Registry) -> Self {
        Self {
            mode: mode.into(),
            registry_version: registry.version().map(str::to_string),
            registry_fingerprint: registry.fingerprint().to_string(),
            ambiguities: registry.reverse_index().ambiguities().to_vec(),
            years: Vec::new(),
            union: None,
            findings: Vec::new(),
        }
    }

    pub fn failed_years(&self) -> impl Iterator<Item = &YearOutcome> {
        self.years.iter().filter(|outcome| !outcome.is_ok())
    }

    pub fn violations(&self) -> impl Iterator<Item = &AuditFinding> {
        self.findings
            .iter()
            .filter(|finding| finding.severity == Severity::Violation)
    }

    pub fn exit_code(&self) -> i32 {
        let union_failed = self.union.as_ref().is_some_and(|u| u.error.is_some());
        if self.failed_years().next().is_some() || self.violations().next().is_some() || union_failed
        {
            EXIT_FAILED
        } else {
            EXIT_OK
        }
    }

    pub fn render_text(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "Run mode: {}  registry: {} ({})",
            self.mode,
            self.registry_version.as_deref().unwrap_or("unversioned"),
            &self.registry_fingerprint[..self.registry_fingerprint.len().min(12)]
        );

        let headers = [
            "year", "status", "source", "table", "rows", "mapped", "unmapped", "dupes",
            "rejected",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
        let rows = self.years.iter().map(year_row).collect::<Vec<_>>();
        let _ = writeln!(output);
        output.push_str(&render_table(&headers, &rows));

        let mut notes = Vec::new();
        for outcome in &self.years {
            if let YearStatus::Failed { reason } = &outcome.status {
                notes.push(format!("{}: FAILED {reason}", outcome.year));
            }
            if let Some(detection) = &outcome.detection
                && detection.is_fallback()
            {
                notes.push(format!(
                    "{}: no table name matched a known pattern; fell back to '{}'",
                    outcome.year, detection.table
                ));
            }
            if let Some(report) = &outcome.harmonize {
                for unmapped in &report.unmapped {
                    let hint = unmapped
                        .closest
                        .as_ref()
                        .map(|(variant, canonical)| {
                            format!(" (close to '{variant}' of '{canonical}')")
                        })
                        .unwrap_or_default();
                    notes.push(format!(
                        "{}: unmapped column '{}'{hint}",
                        outcome.year, unmapped.source
                    ));
                }
                for duplicate in &report.duplicates {
                    notes.push(format!(
                        "{}: '{}' ignored, '{}' already maps to '{}'",
                        outcome.year, duplicate.source, duplicate.kept, duplicate.canonical
                    ));
                }
                for (name, quality) in report.rejected_columns() {
                    notes.push(format!(
                        "{}: '{name}' parsed {:.1}% ({} rejected: {})",
                        outcome.year,
                        quality.parsed_fraction() * 100.0,
                        quality.rejected,
                        quality.rejected_tokens.keys().take(5).join(", ")
                    ));
                }
            }
        }
        for ambiguity in &self.ambiguities {
            notes.push(format!(
                "variant '{}' claimed by '{}' and '{}'; '{}' kept",
                ambiguity.variant, ambiguity.kept, ambiguity.ignored, ambiguity.kept
            ));
        }
        if let Some(union) = &self.union {
            match &union.error {
                Some(error) => notes.push(format!("union FAILED: {error}")),
                None => {
                    let years = union.years.iter().join(", ");
                    notes.push(format!(
                        "union: {} row(s) across {} year(s) [{years}]",
                        union.total_rows,
                        union.years.len()
                    ));
                    for label in &union.realigned {
                        notes.push(format!("union: '{label}' realigned by column name"));
                    }
                }
            }
        }
        for finding in &self.findings {
            let tag = match finding.severity {
                Severity::Violation => "VIOLATION",
                Severity::Advisory => "advisory",
            };
            notes.push(format!(
                "audit {tag}: {} {} {}",
                finding.year, finding.field, finding.message
            ));
        }

        if !notes.is_empty() {
            let _ = writeln!(output);
            for note in notes {
                let _ = writeln!(output, "{note}");
            }
        }
        output
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating report {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Writing report {path:?}"))?;
        Ok(())
    }
}

fn year_row(outcome: &YearOutcome) -> Vec<String> {
    let status = match &outcome.status {
        YearStatus::Ok => "ok",
        YearStatus::Failed { .. } => "failed",
    };
    let table = outcome
        .detection
        .as_ref()
        .map(|d| {
            if d.is_fallback() {
                format!("{} (fallback)", d.table)
            } else {
                d.table.clone()
            }
        })
        .unwrap_or_default();
    let mut row = vec![
        outcome.year.to_string(),
        status.to_string(),
        outcome.source.clone(),
        table,
    ];
    match &outcome.harmonize {
        Some(report) => row.extend([
            report.output_rows.to_string(),
            report.mapped.len().to_string(),
            report.unmapped.len().to_string(),
            report.duplicates.len().to_string(),
            report
                .quality
                .values()
                .map(|q| q.rejected)
                .sum::<usize>()
                .to_string(),
        ]),
        None => row.extend(std::iter::repeat_n(String::new(), 5)),
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::from_yaml_str(
            r#"
version: "test"
categories:
  - category: status
    fields:
      - name: enacted
"#,
        )
        .unwrap()
    }

    #[test]
    fn failed_year_sets_exit_code() {
        let mut report = RunReport::new("run", &registry());
        assert_eq!(report.exit_code(), EXIT_OK);
        report
            .years
            .push(YearOutcome::failed(2011, "bills 2011.mdb", "mdb-export timed out"));
        assert_eq!(report.exit_code(), EXIT_FAILED);
        assert!(report.render_text().contains("2011: FAILED mdb-export timed out"));
    }

    #[test]
    fn violations_fail_but_advisories_do_not() {
        let mut report = RunReport::new("validate", &registry());
        report.findings.push(AuditFinding {
            severity: Severity::Advisory,
            year: 2010,
            field: "abortion".to_string(),
            message: "entirely false".to_string(),
        });
        assert_eq!(report.exit_code(), EXIT_OK);
        report.findings.push(AuditFinding {
            severity: Severity::Violation,
            year: 2010,
            field: "enacted".to_string(),
            message: "status field has 1 null value(s)".to_string(),
        });
        assert_eq!(report.exit_code(), EXIT_FAILED);
    }
}
