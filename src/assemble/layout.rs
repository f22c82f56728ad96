//! The layout document: everything about a form that is data rather than
//! code. One layout belongs to one template name and version.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StampError};
use crate::layout::{Color, MarkStyle, PageFlowPlan, Rect};
use crate::offsets::Offset;
use crate::registry::FieldDescriptor;
use crate::sheet::{CellAddr, Disposition};
use crate::text::DEFAULT_LINE_HEIGHT;

/// What a layout renders to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Pdf,
    Xlsx,
}

impl OutputKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputKind::Pdf => "application/pdf",
            OutputKind::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Pdf => "pdf",
            OutputKind::Xlsx => "xlsx",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.extension()
    }
}

/// A custom font. `src` is a data URI, a file path starting with `/`, `./`
/// or `../`, or raw base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontEntry {
    #[serde(alias = "family")]
    pub name: String,
    pub src: String,
}

impl FontEntry {
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let src = self.src.trim();
        if src.starts_with("data:") {
            let comma = src
                .find(',')
                .ok_or_else(|| StampError::Font(format!("{}: invalid data URI, missing comma", self.name)))?;
            return self.base64_decode(&src[comma + 1..]);
        }
        if src.starts_with('/') || src.starts_with("./") || src.starts_with("../") {
            return std::fs::read(src)
                .map_err(|e| StampError::Font(format!("{}: failed to read '{}': {}", self.name, src, e)));
        }
        self.base64_decode(src)
    }

    fn base64_decode(&self, input: &str) -> Result<Vec<u8>> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(input)
            .map_err(|e| StampError::Font(format!("{}: base64 decode error: {}", self.name, e)))
    }
}

fn default_auto_fit_steps() -> usize {
    2
}

fn default_line_height() -> f64 {
    DEFAULT_LINE_HEIGHT
}

fn default_highlight_opacity() -> f64 {
    0.35
}

fn default_true() -> bool {
    true
}

fn default_font() -> String {
    crate::font::DEFAULT_FONT.to_string()
}

/// Rendering knobs shared by every section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    /// Line height as a multiple of the font size.
    #[serde(default = "default_line_height")]
    pub line_height: f64,
    /// How many one-point steps auto-fit may shrink a font.
    #[serde(default = "default_auto_fit_steps")]
    pub auto_fit_steps: usize,
    #[serde(default = "default_highlight")]
    pub highlight_color: Color,
    #[serde(default = "default_highlight_opacity")]
    pub highlight_opacity: f64,
    #[serde(default)]
    pub mark_style: MarkStyle,
    /// Flate-compress new PDF streams.
    #[serde(default = "default_true")]
    pub compress: bool,
}

fn default_highlight() -> Color {
    Color::HIGHLIGHT
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            line_height: default_line_height(),
            auto_fit_steps: default_auto_fit_steps(),
            highlight_color: Color::HIGHLIGHT,
            highlight_opacity: default_highlight_opacity(),
            mark_style: MarkStyle::default(),
            compress: true,
        }
    }
}

/// A repeating row set: which fields form its columns and how rows are
/// placed on pages (PDF) or in a sheet (XLSX).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSetLayout {
    pub name: String,
    /// Field keys drawn for every row. Their `y` is relative to the row.
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<PageFlowPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<SheetRows>,
}

/// Row placement in a sheet. Rows are zero-based like sheet field
/// coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRows {
    pub sheet: usize,
    pub start_row: u32,
    /// Row whose formatting new rows copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_row: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

/// Header fields to draw; every plain header field when `keys` is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsSection {
    pub row_set: String,
}

/// A tick in one of seven boxes, Monday first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekdaySection {
    pub date_key: String,
    #[serde(default)]
    pub page: usize,
    pub positions: Vec<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
}

/// `to - from` written into the `target` field, e.g. meters drilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSection {
    pub from_key: String,
    pub to_key: String,
    pub target: String,
    /// Compute per row of this set instead of from header fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_set: Option<String>,
    /// Minimum decimal places in the output.
    #[serde(default)]
    pub decimals: usize,
}

/// Highlight boxes for the flags selected under `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagsSection {
    pub key: String,
    #[serde(default)]
    pub page: usize,
    pub boxes: BTreeMap<String, Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
}

/// A single check box, ticked when the value is truthy or, with `values`,
/// equal to one of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSection {
    pub key: String,
    #[serde(default)]
    pub page: usize,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// One cloned sheet per row of `rowSet`, e.g. one per pump-test stage.
///
/// Cell positions use Excel notation (`"B4"`) and table rows are Excel row
/// numbers, counting from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetUnitsSection {
    /// Name of the template sheet to clone.
    pub template: String,
    pub row_set: String,
    /// Unit value used as the sheet name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_key: Option<String>,
    /// Name prefix when `nameKey` gives nothing; the template name by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
    /// Unit values written into fixed cells.
    #[serde(default)]
    pub cells: BTreeMap<String, CellAddr>,
    /// Header values repeated on every clone.
    #[serde(default)]
    pub header_cells: BTreeMap<String, CellAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<UnitTable>,
    /// What happens to the template sheet afterwards.
    #[serde(default)]
    pub disposition: Disposition,
}

/// Nested rows of a unit (e.g. the readings of one stage) written down a
/// sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitTable {
    /// Unit value holding the array of rows.
    pub key: String,
    pub first_row: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_row: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
    /// Row value key to column letters.
    pub columns: BTreeMap<String, String>,
}

/// One step of a render, run in layout order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Section {
    Fields(FieldsSection),
    Rows(RowsSection),
    Weekday(WeekdaySection),
    Delta(DeltaSection),
    Flags(FlagsSection),
    Check(CheckSection),
    SheetUnits(SheetUnitsSection),
}

/// A complete form layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormLayout {
    /// Logical template name in the template store.
    pub template: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub output: OutputKind,
    #[serde(default = "default_font")]
    pub default_font: String,
    #[serde(default)]
    pub fonts: Vec<FontEntry>,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub row_sets: Vec<RowSetLayout>,
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Tier-one offsets, tuned once per template version.
    #[serde(default)]
    pub default_offsets: BTreeMap<String, Offset>,
    #[serde(default)]
    pub options: RenderOptions,
}

impl FormLayout {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StampError::json("layout", e))
    }

    /// `template@version`, used in logs and errors.
    pub fn id(&self) -> String {
        format!("{}@{}", self.template, self.version)
    }

    pub fn row_set(&self, name: &str) -> Result<&RowSetLayout> {
        self.row_sets
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| StampError::UnknownRowSet(name.to_string()))
    }

    /// Keys placed by something other than a plain header `Fields` pass:
    /// row-set columns and delta targets.
    pub fn managed_keys(&self) -> BTreeSet<&str> {
        let mut keys: BTreeSet<&str> = self
            .row_sets
            .iter()
            .flat_map(|r| r.columns.iter().map(String::as_str))
            .collect();
        for section in &self.sections {
            if let Section::Delta(d) = section {
                keys.insert(d.target.as_str());
            }
        }
        keys
    }

    /// Sections to run; a layout without sections draws its header fields
    /// and then every row set.
    pub fn effective_sections(&self) -> Vec<Section> {
        if !self.sections.is_empty() {
            return self.sections.clone();
        }
        std::iter::once(Section::Fields(FieldsSection::default()))
            .chain(self.row_sets.iter().map(|r| {
                Section::Rows(RowsSection {
                    row_set: r.name.clone(),
                })
            }))
            .collect()
    }
}
