use log::{info, warn};
use regex::Regex;
use serde::Serialize;

use crate::{error::DetectError, registry::Registry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionMethod {
    Pattern { rank: usize, pattern: String },
    /// No pattern matched; the first listed table was taken.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub table: String,
    pub method: DetectionMethod,
}

impl Detection {
    pub fn is_fallback(&self) -> bool {
        matches!(self.method, DetectionMethod::Fallback)
    }
}

pub struct TableDetector<'a> {
    patterns: &'a [Regex],
}

impl<'a> TableDetector<'a> {
    pub fn new(patterns: &'a [Regex]) -> Self {
        Self { patterns }
    }

    pub fn from_registry(registry: &'a Registry) -> Self {
        Self::new(registry.table_patterns())
    }

    pub fn select(&self, table_names: &[String]) -> Result<Detection, DetectError> {
        let candidates = table_names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>();

        for (rank, pattern) in self.patterns.iter().enumerate() {
            if let Some(table) = candidates.iter().find(|name| pattern.is_match(name)) {
                info!("Selected table '{table}' (pattern '{}')", pattern.as_str());
                return Ok(Detection {
                    table: (*table).to_string(),
                    method: DetectionMethod::Pattern {
                        rank,
                        pattern: pattern.as_str().to_string(),
                    },
                });
            }
        }

        let first = candidates.first().ok_or(DetectError::NotFound)?;
        warn!(
            "No table matched the primary-table patterns; falling back to first table '{first}' of [{}]",
            candidates.join(", ")
        );
        Ok(Detection {
            table: (*first).to_string(),
            method: DetectionMethod::Fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DEFAULT_TABLE_PATTERNS;
    use regex::RegexBuilder;

    fn default_patterns() -> Vec<Regex> {
        DEFAULT_TABLE_PATTERNS
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build().unwrap())
            .collect()
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn most_specific_pattern_wins_over_list_order() {
        let patterns = default_patterns();
        let detector = TableDetector::new(&patterns);
        let detection = detector
            .select(&names(&[
                "Legislative Contacts",
                "Issue Areas",
                "2019 Legislative Monitoring",
            ]))
            .unwrap();
        assert_eq!(detection.table, "2019 Legislative Monitoring");
        assert!(matches!(
            detection.method,
            DetectionMethod::Pattern { rank: 0, .. }
        ));
    }

    #[test]
    fn falls_back_to_first_table_observably() {
        let patterns = default_patterns();
        let detector = TableDetector::new(&patterns);
        let detection = detector
            .select(&names(&["Switchboard Items", "Contacts"]))
            .unwrap();
        assert_eq!(detection.table, "Switchboard Items");
        assert!(detection.is_fallback());
    }

    #[test]
    fn empty_listing_is_not_found() {
        let patterns = default_patterns();
        let detector = TableDetector::new(&patterns);
        assert_eq!(
            detector.select(&names(&["", "  "])),
            Err(DetectError::NotFound)
        );
    }
}
