//! # Field Registry
//!
//! The table of logical field keys and where each one lands on the template:
//! page (or sheet) index, anchor point, font size and the box it may occupy.
//! Registries are built from layout data and are read-only afterwards.
//!
//! Coordinates are PDF page units with the origin at the bottom-left, and the
//! anchor `y` is the baseline of the first line. For sheet layouts `x` is the
//! zero-based column and `y` the zero-based row.
//!
//! Fields used as row-set columns take their page and vertical position from
//! the row flow; their `y` is then a delta from the row's baseline.

use crate::error::{Result, StampError};
use crate::offsets::{Axis, OffsetConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Horizontal alignment of a field's text inside its `maxWidth` box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// How a field's value is laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    /// Free text, wrapped when a width is given.
    #[default]
    Text,
    /// A list of short entries stacked one per line.
    Stacked,
}

fn default_font_size() -> f64 {
    9.0
}

/// Where and how one logical field is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub key: String,
    #[serde(default, alias = "pageIndex")]
    pub page: usize,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<f64>,
    /// Character budget applied before any width-based layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,
    /// Legacy record keys consulted when `key` has no value.
    #[serde(default, alias = "aliasKeys", skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Font name; the layout's default font when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(default)]
    pub align: Align,
    #[serde(default)]
    pub kind: FieldKind,
    /// Shrink the font stepwise until the text fits its box.
    #[serde(default)]
    pub auto_fit: bool,
}

impl FieldDescriptor {
    /// A plain single-line field. Mostly useful for tests and code-built layouts.
    pub fn new(key: impl Into<String>, page: usize, x: f64, y: f64, font_size: f64) -> Self {
        Self {
            key: key.into(),
            page,
            x,
            y,
            font_size,
            max_width: None,
            max_height: None,
            max_chars: None,
            aliases: Vec::new(),
            font: None,
            align: Align::Left,
            kind: FieldKind::Text,
            auto_fit: false,
        }
    }

    pub fn with_box(mut self, max_width: f64, max_height: Option<f64>) -> Self {
        self.max_width = Some(max_width);
        self.max_height = max_height;
        self
    }

    pub fn anchor(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    /// Apply the character budget, if any.
    pub fn clip_chars(&self, text: &str) -> String {
        match self.max_chars {
            Some(limit) => text.chars().take(limit).collect(),
            None => text.to_string(),
        }
    }

    /// Apply the character budget and report whether it cut anything.
    pub fn clip(&self, text: &str) -> (String, bool) {
        let clipped = self.clip_chars(text);
        let cut = clipped.len() < text.len();
        (clipped, cut)
    }
}

/// Lookup table from field key to descriptor.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
}

impl FieldRegistry {
    /// Build a registry, rejecting duplicate keys.
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.key.clone(), i).is_some() {
                return Err(StampError::DuplicateField(field.key.clone()));
            }
        }
        Ok(Self { fields, index })
    }

    pub fn get(&self, key: &str) -> Option<&FieldDescriptor> {
        self.index.get(key).and_then(|&i| self.fields.get(i))
    }

    /// Like `get`, but an unknown key is a configuration error.
    pub fn require(&self, key: &str) -> Result<&FieldDescriptor> {
        self.get(key)
            .ok_or_else(|| StampError::UnknownField(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Final coordinate of `key` on `axis`: anchor plus the winning offset tier.
    pub fn resolve_coordinate(
        &self,
        offsets: &OffsetConfig,
        key: &str,
        axis: Axis,
        row: Option<usize>,
    ) -> Result<f64> {
        let field = self.require(key)?;
        Ok(field.anchor(axis) + offsets.delta(key, axis, row))
    }

    /// Resolve both axes at once.
    pub fn resolve_point(
        &self,
        offsets: &OffsetConfig,
        key: &str,
        row: Option<usize>,
    ) -> Result<(f64, f64)> {
        Ok((
            self.resolve_coordinate(offsets, key, Axis::X, row)?,
            self.resolve_coordinate(offsets, key, Axis::Y, row)?,
        ))
    }

    /// Every key referenced by the offset tiers must exist here.
    pub fn check_offsets(&self, offsets: &OffsetConfig) -> Result<()> {
        for key in offsets.referenced_keys() {
            self.require(key)?;
        }
        Ok(())
    }

    /// Every field must address a page the template has.
    pub fn check_pages(&self, page_count: usize) -> Result<()> {
        for field in &self.fields {
            if field.page >= page_count {
                return Err(StampError::PageOutOfRange {
                    key: field.key.clone(),
                    page: field.page,
                    page_count,
                });
            }
        }
        Ok(())
    }
}
