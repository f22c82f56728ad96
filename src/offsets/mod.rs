//! # Offset Overrides
//!
//! Three tiers of positional nudges layered on a field's anchor:
//!
//! 1. the layout's default offset for the field,
//! 2. a per-field override,
//! 3. a per-(row index, field) override.
//!
//! Every tier is a delta relative to the anchor, never an absolute position.
//! Per axis, the most specific tier that is present wins: row beats field,
//! field beats default, and with nothing present the delta is zero.
//!
//! `OffsetConfig` is an explicit value built once (at startup or per request)
//! and passed into every render. Nothing here is global.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coordinate axis in page units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

/// A per-axis delta. Either axis may be absent, which is not the same as 0:
/// an absent axis lets a less specific tier apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

impl Offset {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
        }
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = Some(value),
            Axis::Y => self.y = Some(value),
        }
    }
}

/// A single override in list form, as stored by the tuning UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetOverride {
    pub target_key: String,
    pub axis: Axis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    pub value: f64,
}

/// User-configurable overrides: tier 2 (fields) and tier 3 (rows).
///
/// Row keys are global row indices within the row set that owns the field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OffsetOverrides {
    #[serde(default)]
    pub fields: BTreeMap<String, Offset>,
    #[serde(default)]
    pub rows: BTreeMap<usize, BTreeMap<String, Offset>>,
}

impl OffsetOverrides {
    /// Build the map form from a flat override list. Later entries win.
    pub fn from_list(list: &[OffsetOverride]) -> Self {
        let mut out = Self::default();
        for o in list {
            let slot = match o.row_index {
                Some(row) => out
                    .rows
                    .entry(row)
                    .or_default()
                    .entry(o.target_key.clone())
                    .or_default(),
                None => out.fields.entry(o.target_key.clone()).or_default(),
            };
            slot.set(o.axis, o.value);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.rows.values().all(BTreeMap::is_empty)
    }

    /// Every field key referenced by any override.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields
            .keys()
            .chain(self.rows.values().flat_map(BTreeMap::keys))
            .map(String::as_str)
    }

    /// Layer `other` on top of `self`, axis by axis.
    pub fn merged_with(&self, other: &OffsetOverrides) -> OffsetOverrides {
        let mut out = self.clone();
        for (key, offset) in &other.fields {
            merge_offset(out.fields.entry(key.clone()).or_default(), offset);
        }
        for (row, fields) in &other.rows {
            let target = out.rows.entry(*row).or_default();
            for (key, offset) in fields {
                merge_offset(target.entry(key.clone()).or_default(), offset);
            }
        }
        out
    }
}

fn merge_offset(target: &mut Offset, top: &Offset) {
    if top.x.is_some() {
        target.x = top.x;
    }
    if top.y.is_some() {
        target.y = top.y;
    }
}

/// Resolve the delta for one axis from the three tiers.
///
/// Precedence is row > field > default; the result is a delta to add to the
/// field's anchor.
pub fn resolve(default: Option<f64>, field: Option<f64>, row: Option<f64>) -> f64 {
    row.or(field).or(default).unwrap_or(0.0)
}

/// All three offset tiers, ready to resolve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OffsetConfig {
    defaults: BTreeMap<String, Offset>,
    overrides: OffsetOverrides,
}

impl OffsetConfig {
    pub fn new(defaults: BTreeMap<String, Offset>, overrides: OffsetOverrides) -> Self {
        Self {
            defaults,
            overrides,
        }
    }

    /// A config with only layout defaults and no user tuning.
    pub fn with_defaults(defaults: BTreeMap<String, Offset>) -> Self {
        Self::new(defaults, OffsetOverrides::default())
    }

    /// Layer request-level overrides on top of this config's overrides.
    pub fn with_request_overrides(&self, request: &OffsetOverrides) -> Self {
        Self {
            defaults: self.defaults.clone(),
            overrides: self.overrides.merged_with(request),
        }
    }

    /// Delta for `key` on `axis`, optionally for a specific row.
    ///
    /// Keys the store knows nothing about resolve to 0.
    pub fn delta(&self, key: &str, axis: Axis, row: Option<usize>) -> f64 {
        let default = self.defaults.get(key).and_then(|o| o.get(axis));
        let field = self.overrides.fields.get(key).and_then(|o| o.get(axis));
        let row = row
            .and_then(|r| self.overrides.rows.get(&r))
            .and_then(|fields| fields.get(key))
            .and_then(|o| o.get(axis));
        resolve(default, field, row)
    }

    /// Every field key referenced by any tier.
    pub fn referenced_keys(&self) -> impl Iterator<Item = &str> {
        self.defaults
            .keys()
            .map(String::as_str)
            .chain(self.overrides.keys())
    }

    pub fn overrides(&self) -> &OffsetOverrides {
        &self.overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_precedence() {
        assert_eq!(resolve(None, None, None), 0.0);
        assert_eq!(resolve(Some(1.0), None, None), 1.0);
        assert_eq!(resolve(Some(1.0), Some(5.0), None), 5.0);
        assert_eq!(resolve(Some(1.0), Some(5.0), Some(9.0)), 9.0);
        assert_eq!(resolve(None, None, Some(-2.0)), -2.0);
    }

    #[test]
    fn test_row_override_wins_only_on_its_row() {
        let overrides = OffsetOverrides::from_list(&[
            OffsetOverride {
                target_key: "depthTo".to_string(),
                axis: Axis::X,
                row_index: None,
                value: 5.0,
            },
            OffsetOverride {
                target_key: "depthTo".to_string(),
                axis: Axis::X,
                row_index: Some(2),
                value: 9.0,
            },
        ]);
        let config = OffsetConfig::new(BTreeMap::new(), overrides);
        assert_eq!(config.delta("depthTo", Axis::X, Some(2)), 9.0);
        assert_eq!(config.delta("depthTo", Axis::X, Some(3)), 5.0);
        assert_eq!(config.delta("depthTo", Axis::X, None), 5.0);
        assert_eq!(config.delta("depthTo", Axis::Y, Some(2)), 0.0);
    }

    #[test]
    fn test_absent_axis_falls_through_to_less_specific_tier() {
        let mut defaults = BTreeMap::new();
        defaults.insert("date".to_string(), Offset::new(1.5, -3.0));
        let overrides: OffsetOverrides = serde_json::from_value(json!({
            "fields": { "date": { "x": 4.0 } }
        }))
        .unwrap();
        let config = OffsetConfig::new(defaults, overrides);
        assert_eq!(config.delta("date", Axis::X, None), 4.0);
        assert_eq!(config.delta("date", Axis::Y, None), -3.0);
        assert_eq!(config.delta("unknown", Axis::Y, None), 0.0);
    }

    #[test]
    fn test_row_keys_deserialize_from_strings() {
        let overrides: OffsetOverrides = serde_json::from_value(json!({
            "rows": { "7": { "soil": { "y": -1.25 } } }
        }))
        .unwrap();
        assert_eq!(overrides.rows[&7]["soil"].y, Some(-1.25));
        assert_eq!(overrides.keys().collect::<Vec<_>>(), vec!["soil"]);
    }

    #[test]
    fn test_request_overrides_layer_per_axis() {
        let base = OffsetOverrides::from_list(&[OffsetOverride {
            target_key: "remarks".to_string(),
            axis: Axis::Y,
            row_index: None,
            value: 2.0,
        }]);
        let config = OffsetConfig::new(BTreeMap::new(), base);
        let request = OffsetOverrides::from_list(&[OffsetOverride {
            target_key: "remarks".to_string(),
            axis: Axis::X,
            row_index: None,
            value: 7.0,
        }]);
        let merged = config.with_request_overrides(&request);
        assert_eq!(merged.delta("remarks", Axis::X, None), 7.0);
        assert_eq!(merged.delta("remarks", Axis::Y, None), 2.0);
    }
}
