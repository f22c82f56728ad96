//! # Report Record Model
//!
//! The input representation for a single render: flat header fields, named
//! repeating row sets, and optional per-request offset overrides. Records come
//! from the report store as JSON and are never mutated by the engine.
//!
//! Values stay as `serde_json::Value` so that any shape the form wizard
//! produces can be carried through. The engine only coerces a value to text
//! at the moment it is placed.

use crate::offsets::OffsetOverrides;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A complete report record ready for stamping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    /// Header values keyed by field key.
    #[serde(default)]
    pub fields: Map<String, Value>,

    /// Repeating row sets keyed by row-set name, in render order.
    #[serde(default)]
    pub rows: BTreeMap<String, Vec<RowRecord>>,

    /// Positional nudges supplied with this request.
    #[serde(default)]
    pub offsets: OffsetOverrides,
}

/// One logical row of a repeating row set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowRecord(pub Map<String, Value>);

impl RowRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl ReportRecord {
    /// Rows of a named row set; an absent set is simply empty.
    pub fn row_set(&self, name: &str) -> &[RowRecord] {
        self.rows.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Look a value up under `key`, falling back to each alias in order.
///
/// Null values count as absent so that a legacy alias can still supply data.
pub fn lookup<'a>(map: &'a Map<String, Value>, key: &str, aliases: &[String]) -> Option<&'a Value> {
    std::iter::once(key)
        .chain(aliases.iter().map(String::as_str))
        .filter_map(|k| map.get(k))
        .find(|v| !v.is_null())
}

/// Coerce a JSON value to the text placed on the page.
///
/// Returns `None` for anything that should render blank: null, empty
/// strings, `false`, objects, and arrays with no printable items.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            if s.trim().is_empty() {
                None
            } else {
                Some(s.clone())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("X".to_string()),
        Value::Bool(false) => None,
        Value::Array(items) => {
            let parts: Vec<String> = value_list(items);
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        Value::Object(_) => None,
    }
}

/// Coerce an array of values to its printable items, skipping blanks.
pub fn value_list(items: &[Value]) -> Vec<String> {
    items.iter().filter_map(value_text).collect()
}

/// Coerce a value to a list of entries for multi-value cells.
///
/// A scalar becomes a one-item list; arrays keep their order.
pub fn value_entries(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => value_list(items),
        other => value_text(other).into_iter().collect(),
    }
}

/// Entries of a multi-value cell by position.
///
/// Unlike [`value_entries`], a blank item keeps its slot as an empty string
/// so that later entries stay on their own line. Trailing blanks are dropped.
pub fn value_slots(value: &Value) -> Vec<String> {
    let mut slots: Vec<String> = match value {
        Value::Array(items) => items.iter().map(|v| value_text(v).unwrap_or_default()).collect(),
        other => value_text(other).into_iter().collect(),
    };
    while slots.last().is_some_and(String::is_empty) {
        slots.pop();
    }
    slots
}
