//! Type-aware SQL literal rendering.
//!
//! Raw criterion text is turned into a literal according to the declared
//! property type. Untyped properties are sniffed: number first, then
//! date, then text.

use crate::error::{CompileError, CompileResult};
use crate::metadata::PropertyType;
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

/// Plain decimal numbers accepted when sniffing untyped values
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Render `value` as a SQL literal for a property of type `data_type`.
///
/// Text is quoted as given; callers trim criterion text before it gets here.
pub fn render_literal(value: &str, data_type: PropertyType) -> CompileResult<String> {
    match data_type {
        PropertyType::Text => Ok(quote_text(value)),
        PropertyType::Integer => {
            let trimmed = value.trim();
            trimmed
                .parse::<i64>()
                .map(|n| n.to_string())
                .map_err(|_| CompileError::malformed(format!("'{}' is not an integer", trimmed)))
        }
        PropertyType::Decimal | PropertyType::Float => {
            let trimmed = value.trim();
            match trimmed.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(trimmed.to_string()),
                _ => Err(CompileError::malformed(format!(
                    "'{}' is not a number",
                    trimmed
                ))),
            }
        }
        PropertyType::Boolean => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Ok("'1'".to_string()),
            "0" | "false" => Ok("'0'".to_string()),
            other => Err(CompileError::malformed(format!(
                "'{}' is not a boolean",
                other
            ))),
        },
        PropertyType::Date => parse_date(value)
            .map(format_date)
            .ok_or_else(|| CompileError::malformed(format!("'{}' is not a date", value.trim()))),
        PropertyType::Unknown => Ok(sniff_literal(value)),
    }
}

fn sniff_literal(value: &str) -> String {
    let trimmed = value.trim();
    if NUMBER_RE.is_match(trimmed) {
        return trimmed.to_string();
    }
    match parse_date(trimmed) {
        Some(date) => format_date(date),
        None => quote_text(value),
    }
}

fn parse_date(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn format_date(date: NaiveDateTime) -> String {
    format!("'{}'", date.format("%Y-%m-%dT%H:%M:%S"))
}

/// Double single quotes for embedding in a quoted literal
pub fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Unicode string literal: `N'...'`
pub fn quote_text(value: &str) -> String {
    format!("N'{}'", escape(value))
}

/// Like pattern with `*` wildcards translated to `%`
pub fn like_pattern(value: &str) -> String {
    format!("N'{}'", escape(value).replace('*', "%"))
}
