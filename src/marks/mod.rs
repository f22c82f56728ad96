//! # Derived Marks
//!
//! Small predicates computed from record values, each mapped to a fixed
//! spot on the form: the weekday tick row, the drilled-meters figure, and
//! highlight boxes for selected flags.
//!
//! Every function here is total. Input that does not parse yields `None` or
//! an empty list, and nothing is drawn.

use crate::layout::Rect;
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};

/// Day of the week for a date, 0 = Monday through 6 = Sunday.
///
/// Accepts `YYYY-MM-DD`, optionally followed by a time part, and the German
/// `DD.MM.YYYY`.
pub fn weekday_of(date: &str) -> Option<u8> {
    let date = date.trim();
    let parsed = date
        .get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
        .or_else(|| NaiveDate::parse_from_str(date, "%d.%m.%Y").ok())?;
    Some(parsed.weekday().num_days_from_monday() as u8)
}

/// Parse a decimal-comma number such as `"1.234,5"` or `"4,05"`.
///
/// Returns the value and the number of decimal places written.
pub fn parse_decimal_comma(text: &str) -> Option<(f64, usize)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let normalized = if text.contains(',') {
        text.replace('.', "").replace(',', ".")
    } else {
        text.to_string()
    };
    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let decimals = normalized
        .split_once('.')
        .map(|(_, frac)| frac.chars().take_while(char::is_ascii_digit).count())
        .unwrap_or(0);
    Some((value, decimals))
}

/// `b - a` when both parse and `b >= a`, rounded to the finer of the two
/// inputs' decimal places.
pub fn numeric_delta(a: &str, b: &str) -> Option<f64> {
    let (a, da) = parse_decimal_comma(a)?;
    let (b, db) = parse_decimal_comma(b)?;
    if b < a {
        return None;
    }
    let scale = 10f64.powi(da.max(db) as i32);
    Some(((b - a) * scale).round() / scale)
}

/// Format with a decimal comma and exactly `decimals` places.
pub fn format_decimal_comma(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value).replace('.', ",")
}

/// The drilled-meters text for a from/to pair, formatted like its inputs.
pub fn delta_text(from: &str, to: &str, min_decimals: usize) -> Option<String> {
    let delta = numeric_delta(from, to)?;
    let decimals = [from, to]
        .iter()
        .filter_map(|s| parse_decimal_comma(s))
        .map(|(_, d)| d)
        .max()
        .unwrap_or(0)
        .max(min_decimals);
    Some(format_decimal_comma(delta, decimals))
}

/// One highlight box per selected flag that has a position.
///
/// Flags without a table entry are ignored so data can carry flags before
/// the form has a box for them.
pub fn flags_to_highlights(selected: &BTreeSet<String>, table: &BTreeMap<String, Rect>) -> Vec<Rect> {
    selected
        .iter()
        .filter_map(|flag| table.get(flag).copied())
        .collect()
}
