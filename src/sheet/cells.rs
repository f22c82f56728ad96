//! Merging cell writes into worksheet XML.
//!
//! Only `<sheetData>` is rewritten. Untouched rows and cells are carried over
//! byte for byte; a written cell keeps the style index of the cell it
//! replaces, and a cell in a new row takes the style of the same column in
//! the row's style source.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;

use super::cell_ref::{parse_cell_ref, CellAddr};
use super::xml::{element_span, xml_escape};
use crate::error::{Result, StampError};

/// A value written into a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    fn to_xml(&self, addr: CellAddr, style: Option<&str>) -> String {
        let s_attr = style.map(|s| format!(" s=\"{}\"", s)).unwrap_or_default();
        match self {
            CellValue::Number(n) if n.is_finite() => {
                format!("<c r=\"{}\"{}><v>{}</v></c>", addr, s_attr, n)
            }
            CellValue::Number(n) => CellValue::Text(n.to_string()).to_xml(addr, style),
            CellValue::Text(t) => format!(
                "<c r=\"{}\"{} t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                addr,
                s_attr,
                xml_escape(t)
            ),
        }
    }
}

/// Pending writes for one worksheet.
#[derive(Debug, Clone, Default)]
pub struct SheetEdits {
    cells: BTreeMap<(u32, u32), CellValue>,
    row_styles: BTreeMap<u32, u32>,
}

impl SheetEdits {
    pub fn set(&mut self, addr: CellAddr, value: CellValue) {
        self.cells.insert((addr.row, addr.col), value);
    }

    /// Rows created for `row` copy their formatting from `style_row`.
    pub fn inherit_style(&mut self, row: u32, style_row: u32) {
        self.row_styles.insert(row, style_row);
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn get(&self, addr: CellAddr) -> Option<&CellValue> {
        self.cells.get(&(addr.row, addr.col))
    }
}

#[derive(Debug, Clone)]
struct RowXml {
    index: u32,
    /// Raw (still escaped) attributes other than `r` and `spans`.
    attrs: Vec<(String, String)>,
    cells: Vec<CellXml>,
}

#[derive(Debug, Clone)]
struct CellXml {
    col: u32,
    style: Option<String>,
    raw: String,
}

fn raw_attrs(e: &BytesStart) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .filter_map(|attr| {
            let key = std::str::from_utf8(attr.key.as_ref()).ok()?.to_string();
            let value = std::str::from_utf8(&attr.value).ok()?.to_string();
            Some((key, value))
        })
        .collect()
}

fn row_from(e: &BytesStart, fallback: u32) -> RowXml {
    let attrs = raw_attrs(e);
    let index = attrs
        .iter()
        .find(|(k, _)| k == "r")
        .and_then(|(_, v)| v.parse::<u32>().ok())
        .filter(|&r| r > 0)
        .map(|r| r - 1)
        .unwrap_or(fallback);
    RowXml {
        index,
        attrs: attrs.into_iter().filter(|(k, _)| k != "r" && k != "spans").collect(),
        cells: Vec::new(),
    }
}

fn cell_position(e: &BytesStart, fallback: u32) -> (u32, Option<String>) {
    let attrs = raw_attrs(e);
    let col = attrs
        .iter()
        .find(|(k, _)| k == "r")
        .and_then(|(_, v)| parse_cell_ref(v))
        .map(|(col, _)| col)
        .unwrap_or(fallback);
    let style = attrs.into_iter().find(|(k, _)| k == "s").map(|(_, v)| v);
    (col, style)
}

fn parse_rows(sheet_data: &str) -> Result<Vec<RowXml>> {
    let mut reader = Reader::from_str(sheet_data);
    let mut rows: Vec<RowXml> = Vec::new();
    let mut current: Option<RowXml> = None;

    loop {
        let before = reader.buffer_position();
        match reader.read_event()? {
            Event::Start(ref e) if e.local_name().as_ref() == b"row" => {
                let next = rows.last().map(|r| r.index.saturating_add(1)).unwrap_or(0);
                current = Some(row_from(e, next));
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"row" => {
                let next = rows.last().map(|r| r.index.saturating_add(1)).unwrap_or(0);
                rows.push(row_from(e, next));
            }
            Event::End(ref e) if e.local_name().as_ref() == b"row" => {
                if let Some(row) = current.take() {
                    rows.push(row);
                }
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"c" => {
                let name = e.name().as_ref().to_vec();
                let Some(row) = current.as_mut() else {
                    reader.read_to_end(QName(&name))?;
                    continue;
                };
                let next = row.cells.last().map(|c| c.col.saturating_add(1)).unwrap_or(0);
                let (col, style) = cell_position(e, next);
                reader.read_to_end(QName(&name))?;
                row.cells.push(CellXml {
                    col,
                    style,
                    raw: sheet_data[before..reader.buffer_position()].to_string(),
                });
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                if let Some(row) = current.as_mut() {
                    let next = row.cells.last().map(|c| c.col.saturating_add(1)).unwrap_or(0);
                    let (col, style) = cell_position(e, next);
                    row.cells.push(CellXml {
                        col,
                        style,
                        raw: sheet_data[before..reader.buffer_position()].to_string(),
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

/// Apply `edits` to a worksheet part and return the new XML.
pub fn apply_edits(xml: &str, edits: &SheetEdits) -> Result<String> {
    if edits.is_empty() {
        return Ok(xml.to_string());
    }
    let span = element_span(xml, b"sheetData")?
        .ok_or_else(|| StampError::Workbook("worksheet has no sheetData".to_string()))?;
    let original = parse_rows(&xml[span.clone()])?;
    let by_index: BTreeMap<u32, &RowXml> = original.iter().map(|r| (r.index, r)).collect();
    let mut rows: BTreeMap<u32, RowXml> = original.iter().map(|r| (r.index, r.clone())).collect();

    for (&(row_idx, col), value) in &edits.cells {
        let style_row = edits
            .row_styles
            .get(&row_idx)
            .and_then(|src| by_index.get(src))
            .copied();
        let row = rows.entry(row_idx).or_insert_with(|| RowXml {
            index: row_idx,
            attrs: style_row.map(|r| r.attrs.clone()).unwrap_or_default(),
            cells: Vec::new(),
        });
        let addr = CellAddr::new(col, row_idx);
        match row.cells.iter_mut().find(|c| c.col == col) {
            Some(existing) => {
                existing.raw = value.to_xml(addr, existing.style.as_deref());
            }
            None => {
                let style = style_row
                    .and_then(|r| r.cells.iter().find(|c| c.col == col))
                    .and_then(|c| c.style.clone());
                let pos = row.cells.partition_point(|c| c.col < col);
                row.cells.insert(
                    pos,
                    CellXml {
                        col,
                        raw: value.to_xml(addr, style.as_deref()),
                        style,
                    },
                );
            }
        }
    }

    let mut data = String::from("<sheetData>");
    for row in rows.values() {
        data.push_str(&format!("<row r=\"{}\"", u64::from(row.index) + 1));
        for (k, v) in &row.attrs {
            data.push_str(&format!(" {}=\"{}\"", k, v));
        }
        if row.cells.is_empty() {
            data.push_str("/>");
            continue;
        }
        data.push('>');
        for cell in &row.cells {
            data.push_str(&cell.raw);
        }
        data.push_str("</row>");
    }
    data.push_str("</sheetData>");

    log::debug!("merged {} cell writes into {} rows", edits.len(), rows.len());
    Ok(format!("{}{}{}", &xml[..span.start], data, &xml[span.end..]))
}
