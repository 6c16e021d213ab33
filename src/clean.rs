//! Per-value normalization of historical cell encodings.
//!
//! Every cleaner returns a [`Cleaned`] outcome instead of an error: a value
//! that cannot be interpreted becomes `Rejected` so the caller can null it and
//! count it, never silently coerce it.

use std::{collections::BTreeMap, sync::OnceLock};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::Serialize;

use crate::{data::Value, registry::ValueType};

/// Compared case-insensitively after trimming.
pub const NULL_TOKENS: &[&str] = &["", "nan", "n/a", "null", "none"];

/// Ordered oldest convention first: Access exports, then ISO.
const DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y",
    "%Y-%m-%d",
    "%m/%d/%y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%Y%m%d",
];

const DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1900..=2100;

const TRUTHY: &[&str] = &["-1", "1", "-1.0", "1.0", "true", "t", "yes", "y"];
const FALSY: &[&str] = &["0", "0.0", "-0", "false", "f", "no", "n"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleaned<T> {
    Value(T),
    Null,
    /// Non-null input outside the accepted vocabulary; carries the trimmed token.
    Rejected(String),
}

impl<T> Cleaned<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Cleaned::Value(value) => Some(value),
            Cleaned::Null | Cleaned::Rejected(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Cleaned<U> {
        match self {
            Cleaned::Value(value) => Cleaned::Value(f(value)),
            Cleaned::Null => Cleaned::Null,
            Cleaned::Rejected(token) => Cleaned::Rejected(token),
        }
    }
}

pub fn normalize_text(raw: &str) -> Option<String> {
    let stripped: String = raw.chars().filter(|c| !c.is_control()).collect();
    let trimmed = stripped.trim();
    if is_null_token(trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn is_null_token(value: &str) -> bool {
    let trimmed = value.trim();
    NULL_TOKENS
        .iter()
        .any(|token| token.eq_ignore_ascii_case(trimmed))
}

pub fn normalize_boolean(raw: &str) -> Cleaned<bool> {
    let Some(text) = normalize_text(raw) else {
        return Cleaned::Null;
    };
    let lowered = text.to_ascii_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        Cleaned::Value(true)
    } else if FALSY.contains(&lowered.as_str()) {
        Cleaned::Value(false)
    } else {
        Cleaned::Rejected(text)
    }
}

pub fn normalize_integer(raw: &str) -> Cleaned<i64> {
    let Some(text) = normalize_text(raw) else {
        return Cleaned::Null;
    };
    if let Ok(parsed) = text.parse::<i64>() {
        return Cleaned::Value(parsed);
    }
    match text.parse::<f64>() {
        Ok(float) if float.is_finite() && float.fract() == 0.0 => Cleaned::Value(float as i64),
        _ => Cleaned::Rejected(text),
    }
}

pub fn normalize_date(raw: &str) -> Cleaned<NaiveDate> {
    let Some(text) = normalize_text(raw) else {
        return Cleaned::Null;
    };
    match parse_date(&text).or_else(|| parse_datetime(&text).map(|dt| dt.date())) {
        Some(date) => Cleaned::Value(date),
        None => match lenient_date(&text) {
            Some(date) => Cleaned::Value(date),
            None => Cleaned::Rejected(text),
        },
    }
}

pub fn normalize_datetime(raw: &str) -> Cleaned<NaiveDateTime> {
    let Some(text) = normalize_text(raw) else {
        return Cleaned::Null;
    };
    if let Some(parsed) = parse_datetime(&text) {
        return Cleaned::Value(parsed);
    }
    if let Some(date) = parse_date(&text).or_else(|| lenient_date(&text)) {
        return Cleaned::Value(date.and_time(NaiveTime::MIN));
    }
    Cleaned::Rejected(text)
}

pub fn clean_value(raw: &str, ty: ValueType) -> Cleaned<Value> {
    match ty {
        ValueType::String => match normalize_text(raw) {
            Some(text) => Cleaned::Value(Value::String(text)),
            None => Cleaned::Null,
        },
        ValueType::Integer => normalize_integer(raw).map(Value::Integer),
        ValueType::Boolean => normalize_boolean(raw).map(Value::Boolean),
        ValueType::Date => normalize_date(raw).map(Value::Date),
        ValueType::DateTime => normalize_datetime(raw).map(Value::DateTime),
    }
}

fn plausible(date: NaiveDate) -> bool {
    PLAUSIBLE_YEARS.contains(&date.year())
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(text, fmt)
            .ok()
            .filter(|date| plausible(*date))
    })
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(text, fmt)
            .ok()
            .filter(|dt| plausible(dt.date()))
    })
}

fn embedded_iso_date() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("static date pattern compiles")
    })
}

fn embedded_us_date() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("static date pattern compiles")
    })
}

/// Last resort once every known format failed: timezone-bearing timestamps,
/// then a date embedded in surrounding text.
fn lenient_date(text: &str) -> Option<NaiveDate> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.date_naive()).filter(|d| plausible(*d));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(text) {
        return Some(parsed.date_naive()).filter(|d| plausible(*d));
    }
    if let Some(first) = text.split_whitespace().next()
        && first != text
        && let Some(date) = parse_date(first)
    {
        return Some(date);
    }
    if let Some(caps) = embedded_iso_date().captures(text) {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )?;
        return Some(date).filter(|d| plausible(*d));
    }
    if let Some(caps) = embedded_us_date().captures(text) {
        let date = NaiveDate::from_ymd_opt(
            caps[3].parse().ok()?,
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
        )?;
        return Some(date).filter(|d| plausible(*d));
    }
    None
}

/// Parse outcome counts for one mapped column of one year.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnQuality {
    pub present: usize,
    pub parsed: usize,
    pub nulls: usize,
    pub rejected: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rejected_tokens: BTreeMap<String, usize>,
}

impl ColumnQuality {
    pub fn parsed_fraction(&self) -> f64 {
        if self.present == 0 {
            1.0
        } else {
            self.parsed as f64 / self.present as f64
        }
    }

    pub fn unparsed_fraction(&self) -> f64 {
        if self.present == 0 {
            0.0
        } else {
            self.rejected as f64 / self.present as f64
        }
    }

    pub fn is_clean(&self) -> bool {
        self.rejected == 0
    }
}

#[derive(Debug, Clone)]
pub struct ColumnCleaner {
    value_type: ValueType,
    quality: ColumnQuality,
}

impl ColumnCleaner {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            quality: ColumnQuality::default(),
        }
    }

    pub fn clean(&mut self, raw: &str) -> Cleaned<Value> {
        let outcome = clean_value(raw, self.value_type);
        match &outcome {
            Cleaned::Value(_) => {
                self.quality.present += 1;
                self.quality.parsed += 1;
            }
            Cleaned::Null => self.quality.nulls += 1,
            Cleaned::Rejected(token) => {
                self.quality.present += 1;
                self.quality.rejected += 1;
                *self
                    .quality
                    .rejected_tokens
                    .entry(token.clone())
                    .or_insert(0) += 1;
            }
        }
        outcome
    }

    pub fn finish(self) -> ColumnQuality {
        self.quality
    }
}
