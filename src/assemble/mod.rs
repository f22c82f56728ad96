//! # Assembler
//!
//! Binds a `FormLayout` to the engine: builds the field registry, the offset
//! tiers and the font context once, then renders records against a loaded
//! template.
//!
//! ```text
//! FormLayout ──> Assembler ──plan()──> StampPlan ──TemplatePdf::stamp──> PDF
//!                    └──render_xlsx()──> WorkbookEdit ──finish──> XLSX
//! ```
//!
//! Only configuration and template problems fail a render. Anything wrong
//! with the data (a missing value, a date that does not parse, text that
//! does not fit, more rows than the form has room for) degrades to blank or
//! truncated output; dropped rows and cut text are reported as warnings.

pub mod layout;
mod workbook;

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, StampError};
use crate::font::FontContext;
use crate::layout::{DrawCommand, Painter, StampPlan, TextBox};
use crate::marks::{delta_text, flags_to_highlights, weekday_of};
use crate::model::{lookup, value_entries, value_slots, value_text, ReportRecord, RowRecord};
use crate::offsets::{Axis, OffsetConfig, OffsetOverrides};
use crate::pdf::TemplatePdf;
use crate::registry::{FieldDescriptor, FieldKind, FieldRegistry};
use crate::sheet::TemplateWorkbook;
use crate::store::TemplateStore;
pub use layout::{
    CheckSection, DeltaSection, FieldsSection, FlagsSection, FontEntry, FormLayout, OutputKind,
    RenderOptions, RowSetLayout, RowsSection, Section, SheetRows, SheetUnitsSection, UnitTable,
    WeekdaySection,
};

/// Something the render had to leave out. The output is valid either way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RenderWarning {
    /// More rows than the form has room for; the rest were not drawn.
    #[serde(rename_all = "camelCase")]
    RowsDropped {
        row_set: String,
        rendered: usize,
        dropped: usize,
    },
    /// Text or list entries were cut to fit the field's box.
    #[serde(rename_all = "camelCase")]
    Truncated { key: String, row: Option<usize> },
}

impl std::fmt::Display for RenderWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderWarning::RowsDropped {
                row_set,
                rendered,
                dropped,
            } => write!(f, "{}: {} rows rendered, {} dropped", row_set, rendered, dropped),
            RenderWarning::Truncated { key, row: Some(row) } => write!(f, "{} (row {}) truncated", key, row),
            RenderWarning::Truncated { key, row: None } => write!(f, "{} truncated", key),
        }
    }
}

/// Bytes of a finished document plus what had to be left out.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub bytes: Vec<u8>,
    pub kind: OutputKind,
    pub warnings: Vec<RenderWarning>,
}

/// A layout ready to render.
#[derive(Debug, Clone)]
pub struct Assembler {
    layout: FormLayout,
    registry: FieldRegistry,
    offsets: OffsetConfig,
    fonts: FontContext,
}

impl Assembler {
    /// Check the layout against itself and prepare its fonts.
    pub fn new(layout: FormLayout) -> Result<Self> {
        let registry = FieldRegistry::new(layout.fields.clone())?;
        let offsets = OffsetConfig::with_defaults(layout.default_offsets.clone());
        registry.check_offsets(&offsets)?;

        let mut fonts = FontContext::new();
        for entry in &layout.fonts {
            fonts.register(&entry.name, entry.read_bytes()?)?;
        }

        let assembler = Self {
            layout,
            registry,
            offsets,
            fonts,
        };
        assembler.check_layout()?;
        log::debug!(
            "layout {}: {} fields, {} row sets, {} sections",
            assembler.layout.id(),
            assembler.registry.len(),
            assembler.layout.row_sets.len(),
            assembler.layout.sections.len()
        );
        Ok(assembler)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(FormLayout::from_json(json)?)
    }

    /// Layer stored user tuning (per-field and per-row overrides) on top of
    /// the layout defaults.
    pub fn with_offsets(mut self, overrides: &OffsetOverrides) -> Result<Self> {
        let offsets = self.offsets.with_request_overrides(overrides);
        self.registry.check_offsets(&offsets)?;
        self.offsets = offsets;
        Ok(self)
    }

    pub fn layout(&self) -> &FormLayout {
        &self.layout
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn offsets(&self) -> &OffsetConfig {
        &self.offsets
    }

    pub fn fonts(&self) -> &FontContext {
        &self.fonts
    }

    fn check_layout(&self) -> Result<()> {
        for set in &self.layout.row_sets {
            for key in &set.columns {
                self.registry.require(key)?;
            }
            if let Some(flow) = &set.flow {
                flow.validate(&set.name)?;
            }
        }
        let pdf = self.layout.output == OutputKind::Pdf;
        for section in &self.layout.effective_sections() {
            match section {
                Section::Fields(s) => {
                    for key in s.keys.iter().flatten() {
                        self.registry.require(key)?;
                    }
                }
                Section::Rows(s) => {
                    let set = self.layout.row_set(&s.row_set)?;
                    let placed = if pdf { set.flow.is_some() } else { set.sheet.is_some() };
                    if !placed {
                        return Err(StampError::InvalidFlowPlan {
                            set: set.name.clone(),
                            reason: format!("no {} placement for this row set", self.layout.output.as_str()),
                        });
                    }
                }
                Section::Weekday(s) => {
                    if s.positions.len() != 7 {
                        return Err(StampError::Layout(format!(
                            "weekday section for {} needs 7 positions, got {}",
                            s.date_key,
                            s.positions.len()
                        )));
                    }
                }
                Section::Delta(s) => {
                    self.registry.require(&s.target)?;
                    if let Some(set) = &s.row_set {
                        self.layout.row_set(set)?;
                    }
                }
                Section::Flags(s) => {
                    if !pdf {
                        return Err(StampError::Layout(format!(
                            "flag highlights for {} need PDF output",
                            s.key
                        )));
                    }
                }
                Section::Check(_) => {}
                Section::SheetUnits(s) => {
                    if pdf {
                        return Err(StampError::Layout(format!(
                            "sheet units for {} need XLSX output",
                            s.template
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_output(&self, expected: OutputKind) -> Result<()> {
        if self.layout.output != expected {
            return Err(StampError::OutputMismatch {
                layout: self.layout.id(),
                expected: expected.as_str(),
                actual: self.layout.output.as_str(),
            });
        }
        Ok(())
    }

    /// Check every page the layout addresses exists in the template.
    pub fn validate_pdf(&self, template: &TemplatePdf) -> Result<()> {
        self.check_output(OutputKind::Pdf)?;
        let page_count = template.page_count();
        self.registry.check_pages(page_count)?;
        for set in &self.layout.row_sets {
            let Some(flow) = &set.flow else { continue };
            for flow_page in 0..flow.rows_per_page.len() {
                let page = flow.template_page(flow_page);
                if page >= page_count {
                    return Err(StampError::PageOutOfRange {
                        key: set.name.clone(),
                        page,
                        page_count,
                    });
                }
            }
        }
        for section in &self.layout.sections {
            let (key, page) = match section {
                Section::Weekday(s) => (&s.date_key, s.page),
                Section::Flags(s) => (&s.key, s.page),
                Section::Check(s) => (&s.key, s.page),
                _ => continue,
            };
            if page >= page_count {
                return Err(StampError::PageOutOfRange {
                    key: key.clone(),
                    page,
                    page_count,
                });
            }
        }
        Ok(())
    }

    /// Offsets for one record: configured tiers plus the record's own.
    fn record_offsets(&self, record: &ReportRecord) -> Result<OffsetConfig> {
        if record.offsets.is_empty() {
            return Ok(self.offsets.clone());
        }
        let offsets = self.offsets.with_request_overrides(&record.offsets);
        self.registry.check_offsets(&offsets)?;
        Ok(offsets)
    }

    /// Lay out one record on `page_count` template pages.
    pub fn plan(&self, record: &ReportRecord, page_count: usize) -> Result<(StampPlan, Vec<RenderWarning>)> {
        let offsets = self.record_offsets(record)?;
        let mut ctx = PlanContext {
            assembler: self,
            offsets: &offsets,
            painter: Painter::new(&self.fonts).with_line_height(self.layout.options.line_height),
            plan: StampPlan::new(page_count),
            warnings: Vec::new(),
        };
        for section in &self.layout.effective_sections() {
            ctx.run(section, record)?;
        }
        log::debug!(
            "planned {} draw commands on {} pages",
            ctx.plan.command_count(),
            page_count
        );
        Ok((ctx.plan, ctx.warnings))
    }

    /// Render one record onto a copy of the template.
    pub fn render_pdf(&self, template: &TemplatePdf, record: &ReportRecord) -> Result<RenderOutput> {
        self.render_pdf_batch(template, std::slice::from_ref(record))
    }

    /// Render several records into one document, one template copy each.
    pub fn render_pdf_batch(&self, template: &TemplatePdf, records: &[ReportRecord]) -> Result<RenderOutput> {
        self.validate_pdf(template)?;
        let mut plans = Vec::with_capacity(records.len());
        let mut warnings = Vec::new();
        for record in records {
            let (plan, mut w) = self.plan(record, template.page_count())?;
            plans.push(plan);
            warnings.append(&mut w);
        }
        let bytes = template.stamp(&plans, &self.fonts, self.layout.options.compress)?;
        log::info!(
            "rendered {} record(s) with {}: {} bytes, {} warning(s)",
            records.len(),
            self.layout.id(),
            bytes.len(),
            warnings.len()
        );
        Ok(RenderOutput {
            bytes,
            kind: OutputKind::Pdf,
            warnings,
        })
    }

    /// Render one record into a copy of the template workbook.
    pub fn render_xlsx(&self, template: &TemplateWorkbook, record: &ReportRecord) -> Result<RenderOutput> {
        self.check_output(OutputKind::Xlsx)?;
        workbook::render(self, template, record)
    }

    /// Load the layout's template from `store` and render in its output kind.
    pub fn render(&self, store: &dyn TemplateStore, record: &ReportRecord) -> Result<RenderOutput> {
        let bytes = store.load(&self.layout.template)?;
        match self.layout.output {
            OutputKind::Pdf => {
                let template = TemplatePdf::load(&self.layout.template, &bytes)?;
                self.render_pdf(&template, record)
            }
            OutputKind::Xlsx => {
                let template = TemplateWorkbook::load(&self.layout.template, bytes)?;
                self.render_xlsx(&template, record)
            }
        }
    }

    fn font_for<'a>(&'a self, field: &'a FieldDescriptor) -> &'a str {
        field.font.as_deref().unwrap_or(&self.layout.default_font)
    }
}

/// Header field keys a `Fields` section draws.
fn header_keys<'a>(assembler: &'a Assembler, section: &'a FieldsSection) -> Vec<&'a str> {
    match &section.keys {
        Some(keys) => keys.iter().map(String::as_str).collect(),
        None => {
            let managed = assembler.layout.managed_keys();
            assembler
                .registry
                .iter()
                .map(|f| f.key.as_str())
                .filter(|k| !managed.contains(k))
                .collect()
        }
    }
}

/// Whether a check box value counts as ticked.
fn is_checked(value: Option<&Value>, wanted: &[String]) -> bool {
    let Some(value) = value else {
        return false;
    };
    if !wanted.is_empty() {
        return value_entries(value)
            .iter()
            .any(|v| wanted.iter().any(|w| w.eq_ignore_ascii_case(v.trim())));
    }
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            !s.is_empty() && !matches!(s.as_str(), "0" | "false" | "nein" | "no" | "n")
        }
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

/// Selected flags: an array of names, one name, or an object of booleans.
fn selected_flags(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(_, v)| matches!(v, Value::Bool(true)))
            .map(|(k, _)| k.clone())
            .collect(),
        Some(v) => value_entries(v).into_iter().collect(),
        None => BTreeSet::new(),
    }
}

struct PlanContext<'a> {
    assembler: &'a Assembler,
    offsets: &'a OffsetConfig,
    painter: Painter<'a>,
    plan: StampPlan,
    warnings: Vec<RenderWarning>,
}

impl<'a> PlanContext<'a> {
    fn run(&mut self, section: &Section, record: &ReportRecord) -> Result<()> {
        let assembler = self.assembler;
        match section {
            Section::Fields(s) => {
                for key in header_keys(assembler, s) {
                    let field = assembler.registry.require(key)?;
                    let Some(value) = lookup(&record.fields, key, &field.aliases) else {
                        continue;
                    };
                    let (x, y) = assembler.registry.resolve_point(self.offsets, key, None)?;
                    self.draw_value(field, value, field.page, x, y, None);
                }
            }
            Section::Rows(s) => self.run_rows(&s.row_set, record)?,
            Section::Weekday(s) => {
                let day = record
                    .fields
                    .get(&s.date_key)
                    .and_then(value_text)
                    .and_then(|d| weekday_of(&d));
                match day.and_then(|d| s.positions.get(d as usize)) {
                    Some(&[x, y]) => {
                        let size = s.size.unwrap_or(10.0);
                        self.push(
                            s.page,
                            DrawCommand::Mark {
                                x,
                                y,
                                size,
                                style: assembler.layout.options.mark_style,
                            },
                        );
                    }
                    None => log::debug!("no weekday mark: {} is not a date", s.date_key),
                }
            }
            Section::Delta(s) => match &s.row_set {
                None => {
                    if let Some(text) = delta_of(&record.fields, s) {
                        let field = assembler.registry.require(&s.target)?;
                        let (x, y) = assembler.registry.resolve_point(self.offsets, &s.target, None)?;
                        self.draw_value(field, &Value::String(text), field.page, x, y, None);
                    }
                }
                Some(set_name) => {
                    let set = assembler.layout.row_set(set_name)?;
                    let Some(flow) = &set.flow else {
                        return Ok(());
                    };
                    let field = assembler.registry.require(&s.target)?;
                    for (i, row) in record.row_set(set_name).iter().enumerate() {
                        let Some(slot) = flow.locate(i) else { break };
                        if let Some(text) = delta_of(&row.0, s) {
                            let x = assembler.registry.resolve_coordinate(self.offsets, &s.target, Axis::X, Some(i))?;
                            let dy = assembler.registry.resolve_coordinate(self.offsets, &s.target, Axis::Y, Some(i))?;
                            self.draw_value(field, &Value::String(text), slot.page_index, x, slot.y + dy, Some(i));
                        }
                    }
                }
            },
            Section::Flags(s) => {
                let selected = selected_flags(record.fields.get(&s.key));
                let options = &assembler.layout.options;
                for rect in flags_to_highlights(&selected, &s.boxes) {
                    self.push(
                        s.page,
                        DrawCommand::Highlight {
                            rect,
                            color: s.color.unwrap_or(options.highlight_color),
                            opacity: s.opacity.unwrap_or(options.highlight_opacity),
                        },
                    );
                }
            }
            Section::Check(s) => {
                if is_checked(record.fields.get(&s.key), &s.values) {
                    self.push(
                        s.page,
                        DrawCommand::Mark {
                            x: s.x,
                            y: s.y,
                            size: s.size.unwrap_or(10.0),
                            style: assembler.layout.options.mark_style,
                        },
                    );
                }
            }
            Section::SheetUnits(_) => {}
        }
        Ok(())
    }

    fn run_rows(&mut self, set_name: &str, record: &ReportRecord) -> Result<()> {
        let assembler = self.assembler;
        let set = assembler.layout.row_set(set_name)?;
        let Some(flow) = &set.flow else {
            return Ok(());
        };
        let rows: &[RowRecord] = record.row_set(set_name);
        let mut rendered = 0usize;
        for (i, row) in rows.iter().enumerate() {
            let Some(slot) = flow.locate(i) else { break };
            for key in &set.columns {
                let field = assembler.registry.require(key)?;
                let Some(value) = lookup(&row.0, key, &field.aliases) else {
                    continue;
                };
                let x = assembler.registry.resolve_coordinate(self.offsets, key, Axis::X, Some(i))?;
                let dy = assembler.registry.resolve_coordinate(self.offsets, key, Axis::Y, Some(i))?;
                self.draw_value(field, value, slot.page_index, x, slot.y + dy, Some(i));
            }
            rendered += 1;
        }
        if rendered < rows.len() {
            let dropped = rows.len() - rendered;
            log::warn!("row set {}: {} of {} rows do not fit the form", set_name, dropped, rows.len());
            self.warnings.push(RenderWarning::RowsDropped {
                row_set: set_name.to_string(),
                rendered,
                dropped,
            });
        }
        Ok(())
    }

    fn draw_value(&mut self, field: &FieldDescriptor, value: &Value, page: usize, x: f64, y: f64, row: Option<usize>) {
        let Some(out) = self.plan.page_mut(page) else {
            log::debug!("{} targets missing page {}", field.key, page);
            return;
        };
        let font = self.assembler.font_for(field);
        let bx = TextBox::new(x, y, field.font_size, font)
            .sized(field.max_width, field.max_height)
            .aligned(field.align);
        let mut clipped = false;
        let placement = match field.kind {
            FieldKind::Stacked => {
                let entries: Vec<String> = value_slots(value)
                    .iter()
                    .map(|e| {
                        let (entry, cut) = field.clip(e);
                        clipped |= cut;
                        entry
                    })
                    .collect();
                self.painter.draw_stacked_list(out, &entries, &bx)
            }
            FieldKind::Text => {
                let Some(text) = value_text(value) else {
                    return;
                };
                let (text, cut) = field.clip(&text);
                clipped = cut;
                if field.auto_fit {
                    self.painter
                        .fit_and_draw(out, &text, &bx, self.assembler.layout.options.auto_fit_steps)
                } else {
                    self.painter.draw_wrapped_block(out, &text, &bx)
                }
            }
        };
        if placement.truncated || clipped {
            log::debug!("{} truncated to {} line(s)", field.key, placement.lines);
            self.warnings.push(RenderWarning::Truncated {
                key: field.key.clone(),
                row,
            });
        }
    }

    fn push(&mut self, page: usize, cmd: DrawCommand) {
        match self.plan.page_mut(page) {
            Some(out) => out.push(cmd),
            None => log::debug!("mark targets missing page {}", page),
        }
    }
}

/// Delta text for one record or row, or `None` when it does not apply.
fn delta_of(values: &Map<String, Value>, section: &DeltaSection) -> Option<String> {
    let from = values.get(&section.from_key).and_then(value_text)?;
    let to = values.get(&section.to_key).and_then(value_text)?;
    delta_text(&from, &to, section.decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow_layout() -> FormLayout {
        serde_json::from_value(json!({
            "template": "schichtenverzeichnis.pdf",
            "fields": [
                { "key": "projectName", "page": 0, "x": 100, "y": 780, "fontSize": 10 },
                { "key": "depth", "x": 40, "y": 0 },
                { "key": "description", "x": 90, "y": 0, "maxWidth": 200, "maxHeight": 20 },
                { "key": "meters", "x": 320, "y": 0 }
            ],
            "rowSets": [{
                "name": "layers",
                "columns": ["depth", "description"],
                "flow": {
                    "rowsPerPage": [4, 8],
                    "baseYOffset": [600, 600],
                    "rowPitch": 18,
                    "nonUniformRowOffsets": [0, 2, 4, 6, 8, 10, 12, 14]
                }
            }],
            "sections": [
                { "type": "fields" },
                { "type": "rows", "rowSet": "layers" },
                { "type": "delta", "fromKey": "from", "toKey": "to", "target": "meters", "rowSet": "layers", "decimals": 2 }
            ]
        }))
        .unwrap()
    }

    fn record(rows: usize) -> ReportRecord {
        let rows: Vec<Value> = (0..rows)
            .map(|i| json!({ "depth": format!("{},0", i), "description": "Sand", "from": format!("{},00", i), "to": format!("{},50", i) }))
            .collect();
        serde_json::from_value(json!({
            "fields": { "projectName": "Brunnen 4" },
            "rows": { "layers": rows }
        }))
        .unwrap()
    }

    #[test]
    fn test_rows_flow_across_pages() {
        let assembler = Assembler::new(flow_layout()).unwrap();
        let (plan, warnings) = assembler.plan(&record(12), 2).unwrap();
        assert!(warnings.is_empty());
        // row 5 is the second slot on page 1
        let row5: Vec<_> = plan.texts(1).filter(|(_, _, t)| *t == "5,0").collect();
        assert_eq!(row5.len(), 1);
        assert!((row5[0].1 - (600.0 - 18.0 - 2.0)).abs() < 1e-9);
        assert!(plan.texts(0).any(|(_, _, t)| t == "Brunnen 4"));
        assert!(plan.texts(1).any(|(_, _, t)| t == "0,50"));
    }

    #[test]
    fn test_overflow_is_a_warning() {
        let assembler = Assembler::new(flow_layout()).unwrap();
        let (plan, warnings) = assembler.plan(&record(15), 2).unwrap();
        assert_eq!(
            warnings,
            vec![RenderWarning::RowsDropped {
                row_set: "layers".to_string(),
                rendered: 12,
                dropped: 3
            }]
        );
        assert!(!plan.texts(1).any(|(_, _, t)| t == "12,0"));
    }

    #[test]
    fn test_record_offsets_apply_per_row() {
        let assembler = Assembler::new(flow_layout()).unwrap();
        let mut rec = record(2);
        rec.offsets = serde_json::from_value(json!({
            "fields": { "depth": { "x": 5 } },
            "rows": { "1": { "depth": { "x": 9 } } }
        }))
        .unwrap();
        let (plan, _) = assembler.plan(&rec, 2).unwrap();
        let xs: Vec<f64> = plan
            .texts(0)
            .filter(|(_, _, t)| t.ends_with(",0"))
            .map(|(x, _, _)| x)
            .collect();
        assert_eq!(xs, vec![45.0, 49.0]);
    }

    #[test]
    fn test_unknown_override_key_is_fatal() {
        let assembler = Assembler::new(flow_layout()).unwrap();
        let mut rec = record(1);
        rec.offsets = serde_json::from_value(json!({ "fields": { "nope": { "x": 1 } } })).unwrap();
        assert!(matches!(assembler.plan(&rec, 2), Err(StampError::UnknownField(k)) if k == "nope"));
    }

    #[test]
    fn test_layout_errors() {
        let mut layout = flow_layout();
        layout.row_sets[0].columns.push("ghost".to_string());
        assert!(matches!(Assembler::new(layout), Err(StampError::UnknownField(_))));

        let mut layout = flow_layout();
        layout.sections.push(Section::Rows(RowsSection {
            row_set: "samples".to_string(),
        }));
        assert!(matches!(Assembler::new(layout), Err(StampError::UnknownRowSet(_))));

        let mut layout = flow_layout();
        layout.default_offsets.insert("ghost".to_string(), Default::default());
        assert!(matches!(Assembler::new(layout), Err(StampError::UnknownField(_))));
    }

    #[test]
    fn test_marks_and_highlights() {
        let layout: FormLayout = serde_json::from_value(json!({
            "template": "tagesbericht.pdf",
            "fields": [],
            "sections": [
                { "type": "weekday", "dateKey": "date", "positions": [[10,5],[20,5],[30,5],[40,5],[50,5],[60,5],[70,5]] },
                { "type": "flags", "key": "weather", "boxes": { "rain": { "x": 1, "y": 2, "width": 3, "height": 4 } } },
                { "type": "check", "key": "groundwater", "x": 200, "y": 100 }
            ]
        }))
        .unwrap();
        let assembler = Assembler::new(layout).unwrap();
        let rec: ReportRecord = serde_json::from_value(json!({
            "fields": { "date": "2026-01-30", "weather": ["rain", "hail"], "groundwater": "ja" }
        }))
        .unwrap();
        let (plan, _) = assembler.plan(&rec, 1).unwrap();
        let page = plan.page(0);
        assert!(page.contains(&DrawCommand::Mark {
            x: 50.0,
            y: 5.0,
            size: 10.0,
            style: Default::default()
        }));
        assert_eq!(
            page.iter()
                .filter(|c| matches!(c, DrawCommand::Highlight { .. }))
                .count(),
            1
        );
        assert!(page
            .iter()
            .any(|c| matches!(c, DrawCommand::Mark { x, .. } if *x == 200.0)));
    }

    #[test]
    fn test_char_budget_is_reported_as_truncation() {
        let layout: FormLayout = serde_json::from_value(json!({
            "template": "tagesbericht.pdf",
            "fields": [
                { "key": "site", "x": 100, "y": 700, "maxChars": 4 },
                { "key": "samples", "x": 100, "y": 600, "maxChars": 4, "kind": "stacked" },
                { "key": "crew", "x": 300, "y": 700, "maxChars": 8 }
            ],
            "sections": [{ "type": "fields" }]
        }))
        .unwrap();
        let assembler = Assembler::new(layout).unwrap();
        let rec: ReportRecord = serde_json::from_value(json!({
            "fields": { "site": "Brunnen 4 Nord", "samples": ["GP1", "GP12 oben"], "crew": "Kolonne" }
        }))
        .unwrap();
        let (plan, warnings) = assembler.plan(&rec, 1).unwrap();
        let texts: Vec<&str> = plan.texts(0).map(|(_, _, t)| t).collect();
        assert!(texts.contains(&"Brun"));
        assert!(texts.contains(&"GP12"));
        assert!(texts.contains(&"Kolonne"));
        assert_eq!(
            warnings,
            vec![
                RenderWarning::Truncated {
                    key: "site".to_string(),
                    row: None
                },
                RenderWarning::Truncated {
                    key: "samples".to_string(),
                    row: None
                }
            ]
        );
    }

    #[test]
    fn test_check_values() {
        assert!(is_checked(Some(&json!(true)), &[]));
        assert!(!is_checked(Some(&json!("nein")), &[]));
        assert!(!is_checked(None, &[]));
        assert!(is_checked(Some(&json!("Bohrgut")), &["bohrgut".to_string()]));
        assert!(!is_checked(Some(&json!("Kern")), &["bohrgut".to_string()]));
    }

    #[test]
    fn test_selected_flags_shapes() {
        assert_eq!(selected_flags(Some(&json!({ "rain": true, "frost": false }))).len(), 1);
        assert_eq!(selected_flags(Some(&json!("rain"))).len(), 1);
        assert!(selected_flags(None).is_empty());
    }
}
