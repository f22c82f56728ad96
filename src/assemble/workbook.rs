//! XLSX rendering. Field coordinates are cells here: `x` is the zero-based
//! column and `y` the zero-based row, and offsets shift by whole cells.

use serde_json::Value;

use super::{delta_of, header_keys, is_checked, Assembler, OutputKind, RenderOutput, RenderWarning};
use super::layout::{Section, SheetUnitsSection};
use crate::error::{Result, StampError};
use crate::marks::weekday_of;
use crate::model::{lookup, value_slots, value_text, ReportRecord};
use crate::offsets::{Axis, OffsetConfig};
use crate::registry::{FieldDescriptor, FieldKind};
use crate::sheet::cell_ref::{parse_col, MAX_ROWS};
use crate::sheet::{CellAddr, CellValue, Disposition, TemplateWorkbook, WorkbookEdit};

/// Text written for weekday and check marks.
const SHEET_MARK: &str = "X";

/// Check every sheet the layout addresses exists in the template.
pub(super) fn validate(assembler: &Assembler, template: &TemplateWorkbook) -> Result<()> {
    let sheet_count = template.sheet_count();
    assembler.registry.check_pages(sheet_count)?;
    for set in &assembler.layout.row_sets {
        if let Some(rows) = &set.sheet {
            if rows.sheet >= sheet_count {
                return Err(StampError::PageOutOfRange {
                    key: set.name.clone(),
                    page: rows.sheet,
                    page_count: sheet_count,
                });
            }
        }
    }
    let names = template.sheet_names();
    for section in &assembler.layout.sections {
        match section {
            Section::SheetUnits(s) => {
                if !names.iter().any(|n| n.eq_ignore_ascii_case(&s.template)) {
                    return Err(StampError::UnknownSheet(s.template.clone()));
                }
                if let Some(table) = &s.table {
                    if let Some((key, col)) = table.columns.iter().find(|(_, col)| parse_col(col).is_none()) {
                        return Err(StampError::Layout(format!(
                            "column '{}' for {} is not a column reference",
                            col, key
                        )));
                    }
                }
            }
            Section::Weekday(s) if s.page >= sheet_count => {
                return Err(StampError::PageOutOfRange {
                    key: s.date_key.clone(),
                    page: s.page,
                    page_count: sheet_count,
                });
            }
            Section::Check(s) if s.page >= sheet_count => {
                return Err(StampError::PageOutOfRange {
                    key: s.key.clone(),
                    page: s.page,
                    page_count: sheet_count,
                });
            }
            _ => {}
        }
    }
    Ok(())
}

pub(super) fn render(assembler: &Assembler, template: &TemplateWorkbook, record: &ReportRecord) -> Result<RenderOutput> {
    validate(assembler, template)?;
    let offsets = assembler.record_offsets(record)?;
    let mut ctx = SheetContext {
        assembler,
        offsets: &offsets,
        template_sheets: template.sheet_names().iter().map(|s| s.to_string()).collect(),
        edit: template.edit()?,
        warnings: Vec::new(),
        dispositions: Vec::new(),
    };
    for section in &assembler.layout.effective_sections() {
        ctx.run(section, record)?;
    }

    let SheetContext {
        mut edit,
        warnings,
        dispositions,
        ..
    } = ctx;
    for (sheet, disposition) in dispositions {
        edit.set_disposition(&sheet, disposition)?;
    }
    let bytes = edit.finish()?;
    log::info!(
        "rendered workbook with {}: {} bytes, {} warning(s)",
        assembler.layout.id(),
        bytes.len(),
        warnings.len()
    );
    Ok(RenderOutput {
        bytes,
        kind: OutputKind::Xlsx,
        warnings,
    })
}

/// The cell at a fractional position, if it is on the sheet.
fn cell_at(col: f64, row: f64) -> Option<CellAddr> {
    if !col.is_finite() || !row.is_finite() || col < -0.5 || row < -0.5 {
        return None;
    }
    CellAddr::checked(col.round() as u32, row.round() as u32)
}

/// The row `offset` rows below `start`, if it is on the sheet.
fn grid_row(start: u32, offset: usize) -> Option<u32> {
    u32::try_from(offset)
        .ok()
        .and_then(|offset| start.checked_add(offset))
        .filter(|&row| row < MAX_ROWS)
}

/// Numbers stay numbers; everything else becomes text. Stacked fields put
/// one entry per line.
fn cell_value(field: Option<&FieldDescriptor>, value: &Value) -> Option<(CellValue, bool)> {
    if let Value::Number(n) = value {
        return n.as_f64().map(|n| (CellValue::Number(n), false));
    }
    let text = match field.map(|f| f.kind) {
        Some(FieldKind::Stacked) => {
            let entries = value_slots(value);
            if entries.is_empty() {
                return None;
            }
            entries.join("\n")
        }
        _ => value_text(value)?,
    };
    match field {
        Some(f) => {
            let (clipped, cut) = f.clip(&text);
            Some((CellValue::Text(clipped), cut))
        }
        None => Some((CellValue::Text(text), false)),
    }
}

struct SheetContext<'a> {
    assembler: &'a Assembler,
    offsets: &'a OffsetConfig,
    template_sheets: Vec<String>,
    edit: WorkbookEdit<'a>,
    warnings: Vec<RenderWarning>,
    dispositions: Vec<(String, Disposition)>,
}

impl<'a> SheetContext<'a> {
    fn run(&mut self, section: &Section, record: &ReportRecord) -> Result<()> {
        let assembler = self.assembler;
        match section {
            Section::Fields(s) => {
                for key in header_keys(assembler, s) {
                    let field = assembler.registry.require(key)?;
                    let Some(value) = lookup(&record.fields, key, &field.aliases) else {
                        continue;
                    };
                    let (col, row) = assembler.registry.resolve_point(self.offsets, key, None)?;
                    self.write_field(field, value, field.page, col, row, None)?;
                }
            }
            Section::Rows(s) => {
                let set = assembler.layout.row_set(&s.row_set)?;
                let Some(placement) = &set.sheet else {
                    return Ok(());
                };
                let rows = record.row_set(&s.row_set);
                let cap = placement.max_rows.unwrap_or(usize::MAX);
                let sheet = self.sheet_name(placement.sheet)?;
                for (i, row) in rows.iter().take(cap).enumerate() {
                    let Some(row_index) = grid_row(placement.start_row, i) else {
                        log::warn!("{}: row {} is past the last sheet row", s.row_set, i);
                        break;
                    };
                    if let Some(style_row) = placement.style_row {
                        self.edit.inherit_row_style(&sheet, row_index, style_row)?;
                    }
                    for key in &set.columns {
                        let field = assembler.registry.require(key)?;
                        let Some(value) = lookup(&row.0, key, &field.aliases) else {
                            continue;
                        };
                        let col = assembler.registry.resolve_coordinate(self.offsets, key, Axis::X, Some(i))?;
                        let dy = assembler.registry.resolve_coordinate(self.offsets, key, Axis::Y, Some(i))?;
                        self.write_field(field, value, placement.sheet, col, row_index as f64 + dy, Some(i))?;
                    }
                }
                self.note_dropped(&s.row_set, rows.len(), cap);
            }
            Section::Delta(s) => match &s.row_set {
                None => {
                    if let Some(text) = delta_of(&record.fields, s) {
                        let field = assembler.registry.require(&s.target)?;
                        let (col, row) = assembler.registry.resolve_point(self.offsets, &s.target, None)?;
                        self.write_field(field, &Value::String(text), field.page, col, row, None)?;
                    }
                }
                Some(set_name) => {
                    let set = assembler.layout.row_set(set_name)?;
                    let Some(placement) = &set.sheet else {
                        return Ok(());
                    };
                    let field = assembler.registry.require(&s.target)?;
                    let cap = placement.max_rows.unwrap_or(usize::MAX);
                    for (i, row) in record.row_set(set_name).iter().take(cap).enumerate() {
                        let Some(row_index) = grid_row(placement.start_row, i) else {
                            log::warn!("{}: row {} is past the last sheet row", set_name, i);
                            break;
                        };
                        if let Some(text) = delta_of(&row.0, s) {
                            let col = assembler.registry.resolve_coordinate(self.offsets, &s.target, Axis::X, Some(i))?;
                            let dy = assembler.registry.resolve_coordinate(self.offsets, &s.target, Axis::Y, Some(i))?;
                            self.write_field(field, &Value::String(text), placement.sheet, col, row_index as f64 + dy, Some(i))?;
                        }
                    }
                }
            },
            Section::Weekday(s) => {
                let day = record
                    .fields
                    .get(&s.date_key)
                    .and_then(value_text)
                    .and_then(|d| weekday_of(&d));
                if let Some(&[col, row]) = day.and_then(|d| s.positions.get(d as usize)) {
                    self.write_mark(s.page, col, row)?;
                }
            }
            Section::Check(s) => {
                if is_checked(record.fields.get(&s.key), &s.values) {
                    self.write_mark(s.page, s.x, s.y)?;
                }
            }
            Section::SheetUnits(s) => self.run_units(s, record)?,
            // rejected for XLSX layouts when the assembler is built
            Section::Flags(_) => {}
        }
        Ok(())
    }

    fn run_units(&mut self, s: &SheetUnitsSection, record: &ReportRecord) -> Result<()> {
        let prefix = s.name_prefix.as_deref().unwrap_or(&s.template);
        for (i, unit) in record.row_set(&s.row_set).iter().enumerate() {
            let desired = s
                .name_key
                .as_ref()
                .and_then(|k| unit.get(k))
                .and_then(value_text)
                .unwrap_or_else(|| format!("{} {}", prefix, i + 1));
            let name = self.edit.clone_sheet(&s.template, &desired)?;

            for (key, addr) in &s.header_cells {
                if let Some((value, _)) = record.fields.get(key).and_then(|v| cell_value(None, v)) {
                    self.edit.set_cell(&name, *addr, value)?;
                }
            }
            for (key, addr) in &s.cells {
                if let Some((value, _)) = unit.get(key).and_then(|v| cell_value(None, v)) {
                    self.edit.set_cell(&name, *addr, value)?;
                }
            }

            let Some(table) = &s.table else { continue };
            let rows: &[Value] = unit.get(&table.key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
            let first = table.first_row.saturating_sub(1);
            let cap = table.max_rows.unwrap_or(usize::MAX);
            for (j, row) in rows.iter().take(cap).enumerate() {
                let Some(values) = row.as_object() else { continue };
                let Some(row_index) = grid_row(first, j) else {
                    log::warn!("{}/{}: row {} is past the last sheet row", name, table.key, j);
                    break;
                };
                if let Some(style_row) = table.style_row {
                    self.edit.inherit_row_style(&name, row_index, style_row.saturating_sub(1))?;
                }
                for (key, col) in &table.columns {
                    let Some(col) = parse_col(col) else { continue };
                    if let Some((value, _)) = values.get(key).and_then(|v| cell_value(None, v)) {
                        if let Some(addr) = CellAddr::checked(col, row_index) {
                            self.edit.set_cell(&name, addr, value)?;
                        }
                    }
                }
            }
            self.note_dropped(&format!("{}/{}", name, table.key), rows.len(), cap);
        }
        if !self.dispositions.iter().any(|(sheet, _)| sheet == &s.template) {
            self.dispositions.push((s.template.clone(), s.disposition));
        }
        Ok(())
    }

    fn sheet_name(&self, index: usize) -> Result<String> {
        self.template_sheets
            .get(index)
            .cloned()
            .ok_or_else(|| StampError::UnknownSheet(format!("#{}", index)))
    }

    fn write_field(
        &mut self,
        field: &FieldDescriptor,
        value: &Value,
        sheet: usize,
        col: f64,
        row: f64,
        row_index: Option<usize>,
    ) -> Result<()> {
        let Some(addr) = cell_at(col, row) else {
            log::debug!("{} resolves off the sheet ({}, {})", field.key, col, row);
            return Ok(());
        };
        let Some((value, cut)) = cell_value(Some(field), value) else {
            return Ok(());
        };
        if cut {
            self.warnings.push(RenderWarning::Truncated {
                key: field.key.clone(),
                row: row_index,
            });
        }
        let sheet = self.sheet_name(sheet)?;
        self.edit.set_cell(&sheet, addr, value)
    }

    fn write_mark(&mut self, sheet: usize, col: f64, row: f64) -> Result<()> {
        let Some(addr) = cell_at(col, row) else {
            return Ok(());
        };
        let sheet = self.sheet_name(sheet)?;
        self.edit.set_cell(&sheet, addr, CellValue::Text(SHEET_MARK.to_string()))
    }

    fn note_dropped(&mut self, row_set: &str, total: usize, cap: usize) {
        if total > cap {
            log::warn!("{}: {} of {} rows do not fit the sheet", row_set, total - cap, total);
            self.warnings.push(RenderWarning::RowsDropped {
                row_set: row_set.to_string(),
                rendered: cap,
                dropped: total - cap,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::FormLayout;
    use crate::sheet::tests::{read_back, sample_template};
    use serde_json::json;

    fn layout() -> FormLayout {
        serde_json::from_value(json!({
            "template": "pumpversuch.xlsx",
            "output": "xlsx",
            "fields": [
                { "key": "projectName", "page": 0, "x": 1, "y": 0, "maxChars": 12 },
                { "key": "time", "x": 0, "y": 0 },
                { "key": "level", "x": 1, "y": 0 }
            ],
            "rowSets": [{
                "name": "readings",
                "columns": ["time", "level"],
                "sheet": { "sheet": 0, "startRow": 5, "styleRow": 0, "maxRows": 2 }
            }],
            "sections": [
                { "type": "fields" },
                { "type": "rows", "rowSet": "readings" },
                {
                    "type": "sheetUnits",
                    "template": "Stufe",
                    "rowSet": "stages",
                    "nameKey": "label",
                    "cells": { "rate": "B2" },
                    "headerCells": { "projectName": "A1" },
                    "table": { "key": "readings", "firstRow": 7, "styleRow": 5, "columns": { "minute": "A", "level": "B" } },
                    "disposition": "remove"
                }
            ]
        }))
        .unwrap()
    }

    fn record() -> ReportRecord {
        serde_json::from_value(json!({
            "fields": { "projectName": "Brunnen 4 Nord Erweiterung" },
            "rows": {
                "readings": [
                    { "time": "10:00", "level": 4.25 },
                    { "time": "10:15", "level": 4.31 },
                    { "time": "10:30", "level": 4.4 }
                ],
                "stages": [
                    { "label": "Stufe 1", "rate": 2.5, "readings": [{ "minute": 1, "level": 4.3 }, { "minute": 2, "level": 4.35 }] },
                    { "label": "Stufe 2", "rate": 3.0, "readings": [] }
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_render_xlsx_units_and_rows() {
        let template = TemplateWorkbook::load("pumpversuch.xlsx", sample_template()).unwrap();
        let assembler = Assembler::new(layout()).unwrap();
        let out = assembler.render_xlsx(&template, &record()).unwrap();
        assert_eq!(out.kind, OutputKind::Xlsx);
        assert_eq!(
            out.warnings,
            vec![
                RenderWarning::Truncated {
                    key: "projectName".to_string(),
                    row: None
                },
                RenderWarning::RowsDropped {
                    row_set: "readings".to_string(),
                    rendered: 2,
                    dropped: 1
                }
            ]
        );

        let workbook = read_back(&out.bytes, "xl/workbook.xml").unwrap();
        assert!(workbook.contains("name=\"Stufe 1\""));
        assert!(workbook.contains("name=\"Stufe 2\""));
        assert!(!workbook.contains("name=\"Stufe\""));

        let cover = read_back(&out.bytes, "xl/worksheets/sheet1.xml").unwrap();
        assert!(cover.contains(r#"<c r="B1" s="2" t="inlineStr"><is><t xml:space="preserve">Brunnen 4 No</t></is></c>"#));
        assert!(cover.contains(r#"<row r="6"><c r="A6" s="1" t="inlineStr">"#));
        assert!(cover.contains(r#"<c r="B7" s="2"><v>4.31</v></c>"#));
        assert!(!cover.contains("10:30"));

        let stage1 = read_back(&out.bytes, "xl/worksheets/sheet3.xml").unwrap();
        assert!(stage1.contains(r#"<c r="A1" s="3" t="inlineStr"><is><t xml:space="preserve">Brunnen 4 Nord Erweiterung</t>"#));
        assert!(stage1.contains(r#"<c r="B2"><v>2.5</v></c>"#));
        assert!(stage1.contains(r#"<row r="7" ht="16"><c r="A7" s="4"><v>1</v></c><c r="B7" s="5"><v>4.3</v></c></row>"#));
        assert!(stage1.contains(r#"<c r="B8" s="5"><v>4.35</v></c>"#));
    }

    #[test]
    fn test_offsets_past_the_grid_skip_the_value() {
        let template = TemplateWorkbook::load("pumpversuch.xlsx", sample_template()).unwrap();
        let assembler = Assembler::new(layout()).unwrap();
        for y in [5e9, 2e6, 1_048_576.0] {
            let mut record = record();
            record.offsets = serde_json::from_value(json!({ "fields": { "projectName": { "y": y } } })).unwrap();
            let out = assembler.render_xlsx(&template, &record).unwrap();
            let cover = read_back(&out.bytes, "xl/worksheets/sheet1.xml").unwrap();
            assert!(!cover.contains("Brunnen"), "y = {}", y);
            assert!(!out
                .warnings
                .iter()
                .any(|w| matches!(w, RenderWarning::Truncated { .. })));
        }

        let mut record = record();
        record.offsets = serde_json::from_value(json!({ "fields": { "projectName": { "x": 20000 } } })).unwrap();
        let out = assembler.render_xlsx(&template, &record).unwrap();
        let cover = read_back(&out.bytes, "xl/worksheets/sheet1.xml").unwrap();
        assert!(!cover.contains("Brunnen"));
    }

    #[test]
    fn test_rows_stop_at_the_last_sheet_row() {
        let template = TemplateWorkbook::load("pumpversuch.xlsx", sample_template()).unwrap();
        let mut layout = layout();
        if let Some(sheet) = layout.row_sets[0].sheet.as_mut() {
            sheet.start_row = MAX_ROWS - 1;
        }
        let out = Assembler::new(layout).unwrap().render_xlsx(&template, &record()).unwrap();
        let cover = read_back(&out.bytes, "xl/worksheets/sheet1.xml").unwrap();
        assert!(cover.contains(r#"<c r="A1048576""#));
        assert!(cover.contains("10:00"));
        assert!(!cover.contains("10:15"));
        assert_eq!(grid_row(MAX_ROWS - 1, 1), None);
        assert_eq!(grid_row(u32::MAX, 1), None);
        assert_eq!(grid_row(4, 2), Some(6));
    }

    #[test]
    fn test_xlsx_layout_checks() {
        let template = TemplateWorkbook::load("t", sample_template()).unwrap();
        let mut bad = layout();
        if let Section::SheetUnits(s) = &mut bad.sections[2] {
            s.template = "Messung".to_string();
        }
        let assembler = Assembler::new(bad).unwrap();
        assert!(matches!(
            assembler.render_xlsx(&template, &record()),
            Err(StampError::UnknownSheet(_))
        ));

        let mut pdf = layout();
        pdf.output = OutputKind::Pdf;
        assert!(Assembler::new(pdf).is_err());
    }

    #[test]
    fn test_cell_value_coercion() {
        assert_eq!(cell_value(None, &json!(3)), Some((CellValue::Number(3.0), false)));
        assert_eq!(cell_value(None, &json!(null)), None);
        let mut stacked = FieldDescriptor::new("samples", 0, 0.0, 0.0, 9.0);
        stacked.kind = FieldKind::Stacked;
        assert_eq!(
            cell_value(Some(&stacked), &json!(["GP1", "GP2"])),
            Some((CellValue::Text("GP1\nGP2".to_string()), false))
        );
        assert_eq!(
            cell_value(Some(&stacked), &json!(["GP1", null, "GP3"])),
            Some((CellValue::Text("GP1\n\nGP3".to_string()), false))
        );
        assert_eq!(cell_value(Some(&stacked), &json!([null, " "])), None);
        assert_eq!(cell_at(2.4, 3.6), Some(CellAddr::new(2, 4)));
        assert_eq!(cell_at(-3.0, 1.0), None);
        assert_eq!(cell_at(1.0, 5e9), None);
        assert_eq!(cell_at(16_384.0, 0.0), None);
    }
}
