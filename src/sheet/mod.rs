//! # Workbook Templates
//!
//! XLSX output works on a copy of a template workbook. A [`TemplateWorkbook`]
//! holds the pristine package; [`TemplateWorkbook::edit`] opens a
//! [`WorkbookEdit`] that can clone template sheets, write cells, and hide or
//! remove the templates before writing a new package.
//!
//! Cloning copies everything a sheet owns: the worksheet XML with its column
//! widths, merges, conditional formats and print setup, plus related parts
//! such as drawings, images and comments. Styles are shared through the
//! workbook style table, so copied style indices stay valid. Tables are not
//! copied since their names must be unique per workbook.
//!
//! Parts nobody touched are copied into the output without recompression.

pub mod cell_ref;
pub mod cells;
pub mod names;
pub mod xml;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Cursor, Read, Write};

use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{Result, StampError};
pub use cell_ref::CellAddr;
pub use cells::{CellValue, SheetEdits};
use names::unique_sheet_name;
use xml::{
    attr_local, attr_string, element_span, next_rel_id, parse_relationships, rels_path_for,
    remove_element, resolve_target, retarget, write_relationships, xml_escape, ContentTypes,
    Relationship, REL_CALC_CHAIN, REL_WORKSHEET,
};

const CONTENT_TYPES: &str = "[Content_Types].xml";
const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// How deep related parts are copied when cloning a sheet
/// (sheet -> drawing -> chart -> chart style). Deeper parts are shared.
const MAX_COPY_DEPTH: usize = 3;

/// What happens to a template sheet once its clones are filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    #[default]
    Keep,
    Hide,
    Remove,
}

#[derive(Debug, Clone)]
struct SheetInfo {
    name: String,
    sheet_id: u32,
    rel_id: String,
    /// Attribute name of the relationship id as written, usually `r:id`.
    rel_key: String,
    path: String,
    hidden: bool,
}

#[derive(Debug, Clone)]
struct DefinedName {
    /// Raw attributes except `localSheetId`.
    attrs: Vec<(String, String)>,
    local_sheet: Option<usize>,
    name: String,
    /// Raw, still escaped, formula text.
    body: String,
}

/// A pristine template workbook.
#[derive(Debug)]
pub struct TemplateWorkbook {
    name: String,
    bytes: Vec<u8>,
    entries: BTreeSet<String>,
    workbook_part: String,
    sheets: Vec<SheetInfo>,
}

impl TemplateWorkbook {
    /// Parse the package structure of an XLSX file.
    pub fn load(name: &str, bytes: Vec<u8>) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))?;
        let entries: BTreeSet<String> = archive.file_names().map(str::to_string).collect();
        if !entries.contains(CONTENT_TYPES) {
            return Err(StampError::Workbook(format!("{}: missing {}", name, CONTENT_TYPES)));
        }

        let workbook_part = match read_entry(&mut archive, "_rels/.rels")? {
            Some(xml) => parse_relationships(&String::from_utf8_lossy(&xml))?
                .into_iter()
                .find(|r| r.is_kind("officeDocument"))
                .map(|r| resolve_target("", &r.target))
                .unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string()),
            None => DEFAULT_WORKBOOK_PART.to_string(),
        };
        let workbook_xml = read_entry(&mut archive, &workbook_part)?
            .ok_or_else(|| StampError::Workbook(format!("{}: missing {}", name, workbook_part)))?;
        let workbook_xml = String::from_utf8_lossy(&workbook_xml).into_owned();
        let rels = match read_entry(&mut archive, &rels_path_for(&workbook_part))? {
            Some(xml) => parse_relationships(&String::from_utf8_lossy(&xml))?,
            None => Vec::new(),
        };
        drop(archive);

        let sheets = parse_sheets(&workbook_xml, &workbook_part, &rels)?;
        if sheets.is_empty() {
            return Err(StampError::Workbook(format!("{}: workbook has no sheets", name)));
        }
        log::info!("loaded template workbook {} ({} sheets)", name, sheets.len());

        Ok(Self {
            name: name.to_string(),
            bytes,
            entries,
            workbook_part,
            sheets,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    /// Start an edit session. The template itself is never modified.
    pub fn edit(&self) -> Result<WorkbookEdit<'_>> {
        let workbook_xml = self.read_string(&self.workbook_part)?;
        let workbook_rels = parse_relationships(&self.read_string(&rels_path_for(&self.workbook_part))?)?;
        let content_types = ContentTypes::parse(&self.read_string(CONTENT_TYPES)?)?;
        let defined_names = parse_defined_names(&workbook_xml)?;
        Ok(WorkbookEdit {
            template: self,
            workbook_xml,
            workbook_rels,
            content_types,
            sheets: self.sheets.clone(),
            defined_names,
            changed: BTreeMap::new(),
            removed: BTreeSet::new(),
            edits: BTreeMap::new(),
        })
    }

    fn read(&self, part: &str) -> Result<Option<Vec<u8>>> {
        let mut archive = ZipArchive::new(Cursor::new(self.bytes.as_slice()))?;
        read_entry(&mut archive, part)
    }

    fn read_string(&self, part: &str) -> Result<String> {
        let bytes = self
            .read(part)?
            .ok_or_else(|| StampError::Workbook(format!("{}: missing {}", self.name, part)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn read_entry<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>, part: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(part) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

fn parse_sheets(workbook_xml: &str, workbook_part: &str, rels: &[Relationship]) -> Result<Vec<SheetInfo>> {
    let mut reader = Reader::from_str(workbook_xml);
    reader.trim_text(true);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr_string(e, b"name").unwrap_or_default();
                let sheet_id = attr_string(e, b"sheetId").and_then(|s| s.parse().ok()).unwrap_or(0);
                let hidden = matches!(attr_string(e, b"state").as_deref(), Some("hidden" | "veryHidden"));
                let Some((rel_key, rel_id)) = attr_local(e, b"id") else {
                    log::warn!("sheet '{}' has no relationship id; skipping", name);
                    continue;
                };
                let Some(rel) = rels.iter().find(|r| r.id == rel_id) else {
                    log::warn!("sheet '{}' points at missing relationship {}", name, rel_id);
                    continue;
                };
                sheets.push(SheetInfo {
                    name,
                    sheet_id,
                    path: resolve_target(workbook_part, &rel.target),
                    rel_id,
                    rel_key,
                    hidden,
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_defined_names(workbook_xml: &str) -> Result<Vec<DefinedName>> {
    let mut reader = Reader::from_str(workbook_xml);
    let mut names = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(ref e) if e.local_name().as_ref() == b"definedName" => {
                let tag = e.name().as_ref().to_vec();
                let mut attrs = Vec::new();
                let mut local_sheet = None;
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    if key == "localSheetId" {
                        local_sheet = value.parse().ok();
                    } else {
                        attrs.push((key, value));
                    }
                }
                let name = attr_string(e, b"name").unwrap_or_default();
                let inner_start = reader.buffer_position();
                reader.read_to_end(QName(&tag))?;
                let inner = &workbook_xml[inner_start..reader.buffer_position()];
                let body = inner.rfind("</").map(|end| &inner[..end]).unwrap_or(inner);
                names.push(DefinedName {
                    attrs,
                    local_sheet,
                    name,
                    body: body.to_string(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(names)
}

/// A template workbook being turned into an output workbook.
pub struct WorkbookEdit<'a> {
    template: &'a TemplateWorkbook,
    workbook_xml: String,
    workbook_rels: Vec<Relationship>,
    content_types: ContentTypes,
    sheets: Vec<SheetInfo>,
    defined_names: Vec<DefinedName>,
    changed: BTreeMap<String, Vec<u8>>,
    removed: BTreeSet<String>,
    edits: BTreeMap<String, SheetEdits>,
}

impl<'a> WorkbookEdit<'a> {
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn sheet_index(&self, name: &str) -> Result<usize> {
        self.sheets
            .iter()
            .position(|s| s.name == name)
            .or_else(|| self.sheets.iter().position(|s| s.name.eq_ignore_ascii_case(name)))
            .ok_or_else(|| StampError::UnknownSheet(name.to_string()))
    }

    fn part_exists(&self, part: &str) -> bool {
        !self.removed.contains(part) && (self.changed.contains_key(part) || self.template.entries.contains(part))
    }

    fn read_part(&self, part: &str) -> Result<Vec<u8>> {
        if let Some(bytes) = self.changed.get(part) {
            return Ok(bytes.clone());
        }
        if self.removed.contains(part) {
            return Err(StampError::Workbook(format!("part {} was removed", part)));
        }
        self.template
            .read(part)?
            .ok_or_else(|| StampError::Workbook(format!("missing part {}", part)))
    }

    fn read_part_string(&self, part: &str) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.read_part(part)?).into_owned())
    }

    fn write_part(&mut self, part: &str, bytes: Vec<u8>) {
        self.removed.remove(part);
        self.changed.insert(part.to_string(), bytes);
    }

    fn remove_part(&mut self, part: &str) {
        self.changed.remove(part);
        self.removed.insert(part.to_string());
        self.content_types.remove_override(part);
    }

    /// An unused part name next to `part`: `xl/drawings/drawing1.xml` ->
    /// `xl/drawings/drawing3.xml` when 1 and 2 are taken.
    fn fresh_part_name(&self, part: &str) -> String {
        let (dir, file) = part.rsplit_once('/').unwrap_or(("", part));
        let (stem, ext) = file.rsplit_once('.').unwrap_or((file, ""));
        let stem = stem.trim_end_matches(|c: char| c.is_ascii_digit());
        let mut n = 1usize;
        loop {
            let mut candidate = String::new();
            if !dir.is_empty() {
                candidate.push_str(dir);
                candidate.push('/');
            }
            candidate.push_str(&format!("{}{}", stem, n));
            if !ext.is_empty() {
                candidate.push('.');
                candidate.push_str(ext);
            }
            if !self.part_exists(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Copy `part` and, recursively, the parts it relates to.
    fn copy_part_tree(&mut self, part: &str, depth: usize, copied: &mut HashMap<String, String>) -> Result<String> {
        if let Some(done) = copied.get(part) {
            return Ok(done.clone());
        }
        if !self.part_exists(part) {
            log::warn!("related part {} does not exist; keeping the reference", part);
            return Ok(part.to_string());
        }
        let new_part = self.fresh_part_name(part);
        copied.insert(part.to_string(), new_part.clone());
        let bytes = self.read_part(part)?;
        self.write_part(&new_part, bytes);
        if let Some(ct) = self.content_types.override_for(part).map(str::to_string) {
            self.content_types.add_override(&new_part, &ct);
        }

        let rels_path = rels_path_for(part);
        if self.part_exists(&rels_path) {
            let rels = parse_relationships(&self.read_part_string(&rels_path)?)?;
            let mut new_rels = Vec::with_capacity(rels.len());
            for rel in rels {
                if rel.external || depth >= MAX_COPY_DEPTH {
                    new_rels.push(rel);
                    continue;
                }
                let target_part = resolve_target(part, &rel.target);
                let copy = self.copy_part_tree(&target_part, depth + 1, copied)?;
                new_rels.push(Relationship {
                    target: retarget(&rel.target, &copy),
                    ..rel
                });
            }
            self.write_part(&rels_path_for(&new_part), write_relationships(&new_rels).into_bytes());
        }
        Ok(new_part)
    }

    /// Clone template sheet `source` under a name derived from `desired`.
    /// Returns the name the clone actually got.
    pub fn clone_sheet(&mut self, source: &str, desired: &str) -> Result<String> {
        let src_index = self.sheet_index(source)?;
        let src = self.sheets[src_index].clone();
        let new_name = unique_sheet_name(desired, &self.sheet_names());
        let new_path = self.fresh_part_name(&src.path);
        let mut copied = HashMap::new();
        copied.insert(src.path.clone(), new_path.clone());

        let mut sheet_xml = self.read_part_string(&src.path)?.replace(" tabSelected=\"1\"", "");
        let rels_path = rels_path_for(&src.path);
        if self.part_exists(&rels_path) {
            let rels = parse_relationships(&self.read_part_string(&rels_path)?)?;
            let mut new_rels = Vec::with_capacity(rels.len());
            let mut dropped_tables = 0;
            for rel in rels {
                if rel.external {
                    new_rels.push(rel);
                } else if rel.is_kind("table") {
                    dropped_tables += 1;
                } else {
                    let target_part = resolve_target(&src.path, &rel.target);
                    let copy = self.copy_part_tree(&target_part, 1, &mut copied)?;
                    new_rels.push(Relationship {
                        target: retarget(&rel.target, &copy),
                        ..rel
                    });
                }
            }
            if dropped_tables > 0 {
                log::warn!("sheet '{}': {} table(s) not carried into clone '{}'", src.name, dropped_tables, new_name);
                sheet_xml = remove_element(&sheet_xml, b"tableParts")?;
            }
            self.write_part(&rels_path_for(&new_path), write_relationships(&new_rels).into_bytes());
        }
        self.write_part(&new_path, sheet_xml.into_bytes());
        if let Some(ct) = self.content_types.override_for(&src.path).map(str::to_string) {
            self.content_types.add_override(&new_path, &ct);
        }

        let rel_id = next_rel_id(&self.workbook_rels);
        let src_target = self
            .workbook_rels
            .iter()
            .find(|r| r.id == src.rel_id)
            .map(|r| r.target.clone())
            .unwrap_or_else(|| format!("worksheets/{}", new_path.rsplit('/').next().unwrap_or(&new_path)));
        self.workbook_rels.push(Relationship {
            id: rel_id.clone(),
            rel_type: REL_WORKSHEET.to_string(),
            target: retarget(&src_target, &new_path),
            external: false,
        });

        let sheet_id = self.sheets.iter().map(|s| s.sheet_id).max().unwrap_or(0) + 1;
        self.sheets.push(SheetInfo {
            name: new_name.clone(),
            sheet_id,
            rel_id,
            rel_key: src.rel_key.clone(),
            path: new_path,
            hidden: false,
        });
        let new_index = self.sheets.len() - 1;

        // print areas and titles follow the sheet
        let local: Vec<DefinedName> = self
            .defined_names
            .iter()
            .filter(|d| d.local_sheet == Some(src_index) && d.name.starts_with("_xlnm."))
            .cloned()
            .collect();
        for mut dn in local {
            dn.local_sheet = Some(new_index);
            dn.body = rename_sheet_refs(&dn.body, &src.name, &new_name);
            self.defined_names.push(dn);
        }

        log::debug!("cloned sheet '{}' as '{}'", src.name, new_name);
        Ok(new_name)
    }

    /// Queue a cell write on `sheet`.
    pub fn set_cell(&mut self, sheet: &str, addr: CellAddr, value: CellValue) -> Result<()> {
        let index = self.sheet_index(sheet)?;
        let path = self.sheets[index].path.clone();
        self.edits.entry(path).or_default().set(addr, value);
        Ok(())
    }

    /// Rows created at `row` on `sheet` copy the formatting of `style_row`.
    pub fn inherit_row_style(&mut self, sheet: &str, row: u32, style_row: u32) -> Result<()> {
        let index = self.sheet_index(sheet)?;
        let path = self.sheets[index].path.clone();
        self.edits.entry(path).or_default().inherit_style(row, style_row);
        Ok(())
    }

    /// Keep, hide or remove a sheet. The last visible sheet always stays.
    pub fn set_disposition(&mut self, sheet: &str, disposition: Disposition) -> Result<()> {
        let index = self.sheet_index(sheet)?;
        let visible = self.sheets.iter().filter(|s| !s.hidden).count();
        let last_visible = !self.sheets[index].hidden && visible <= 1;
        match disposition {
            Disposition::Keep => {}
            Disposition::Hide | Disposition::Remove if last_visible => {
                log::warn!("sheet '{}' is the last visible sheet; keeping it", sheet);
            }
            Disposition::Hide => {
                let path = self.sheets[index].path.clone();
                let xml = self.read_part_string(&path)?.replace(" tabSelected=\"1\"", "");
                self.write_part(&path, xml.into_bytes());
                self.sheets[index].hidden = true;
            }
            Disposition::Remove => {
                let info = self.sheets.remove(index);
                self.workbook_rels.retain(|r| r.id != info.rel_id);
                self.remove_part(&info.path);
                self.remove_part(&rels_path_for(&info.path));
                self.edits.remove(&info.path);
                self.defined_names.retain(|d| d.local_sheet != Some(index));
                for dn in &mut self.defined_names {
                    if let Some(local) = dn.local_sheet.as_mut() {
                        if *local > index {
                            *local -= 1;
                        }
                    }
                }
                log::debug!("removed sheet '{}'", info.name);
            }
        }
        Ok(())
    }

    /// Write the output package.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let edits = std::mem::take(&mut self.edits);
        for (path, sheet_edits) in &edits {
            let xml = self.read_part_string(path)?;
            let merged = cells::apply_edits(&xml, sheet_edits)?;
            self.write_part(path, merged.into_bytes());
        }

        // Excel rebuilds the calculation chain; a stale one makes it repair the file.
        let workbook_part = self.template.workbook_part.clone();
        let calc: Vec<Relationship> = self
            .workbook_rels
            .iter()
            .filter(|r| r.rel_type == REL_CALC_CHAIN)
            .cloned()
            .collect();
        for rel in calc {
            self.remove_part(&resolve_target(&workbook_part, &rel.target));
            self.workbook_rels.retain(|r| r.id != rel.id);
        }

        let workbook_xml = self.render_workbook_xml()?;
        self.write_part(&workbook_part, workbook_xml.into_bytes());
        let rels_xml = write_relationships(&self.workbook_rels);
        self.write_part(&rels_path_for(&workbook_part), rels_xml.into_bytes());
        let types_xml = self.content_types.to_xml();
        self.write_part(CONTENT_TYPES, types_xml.into_bytes());

        let mut archive = ZipArchive::new(Cursor::new(self.template.bytes.as_slice()))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(self.template.bytes.len())));
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        let mut written = BTreeSet::new();

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            let name = entry.name().to_string();
            if self.removed.contains(&name) {
                continue;
            }
            if let Some(bytes) = self.changed.get(&name) {
                writer.start_file(name.as_str(), options)?;
                writer.write_all(bytes)?;
                written.insert(name);
                continue;
            }
            writer.raw_copy_file(entry)?;
        }
        for (name, bytes) in &self.changed {
            if written.contains(name) {
                continue;
            }
            writer.start_file(name.as_str(), options)?;
            writer.write_all(bytes)?;
        }

        let cursor = writer.finish()?;
        log::info!(
            "wrote workbook: {} sheets, {} parts rewritten",
            self.sheets.len(),
            self.changed.len()
        );
        Ok(cursor.into_inner())
    }

    fn render_workbook_xml(&self) -> Result<String> {
        let mut xml = self.workbook_xml.clone();

        let mut sheets = String::from("<sheets>");
        for s in &self.sheets {
            sheets.push_str(&format!(
                "<sheet name=\"{}\" sheetId=\"{}\"{} {}=\"{}\"/>",
                xml_escape(&s.name),
                s.sheet_id,
                if s.hidden { " state=\"hidden\"" } else { "" },
                s.rel_key,
                xml_escape(&s.rel_id)
            ));
        }
        sheets.push_str("</sheets>");
        let span = element_span(&xml, b"sheets")?
            .ok_or_else(|| StampError::Workbook("workbook has no sheets element".to_string()))?;
        xml.replace_range(span, &sheets);

        let mut names = String::new();
        if !self.defined_names.is_empty() {
            names.push_str("<definedNames>");
            for dn in &self.defined_names {
                names.push_str("<definedName");
                for (k, v) in &dn.attrs {
                    names.push_str(&format!(" {}=\"{}\"", k, v));
                }
                if let Some(local) = dn.local_sheet {
                    names.push_str(&format!(" localSheetId=\"{}\"", local));
                }
                names.push('>');
                names.push_str(&dn.body);
                names.push_str("</definedName>");
            }
            names.push_str("</definedNames>");
        }
        match element_span(&xml, b"definedNames")? {
            Some(span) => xml.replace_range(span, &names),
            None if !names.is_empty() => {
                let end = element_span(&xml, b"sheets")?.map(|s| s.end).unwrap_or(0);
                xml.insert_str(end, &names);
            }
            None => {}
        }

        Ok(self.fix_active_tab(xml))
    }

    /// Point `activeTab` at a visible sheet and keep `firstSheet` in range.
    fn fix_active_tab(&self, mut xml: String) -> String {
        let Ok(Some(span)) = element_span(&xml, b"workbookView") else {
            return xml;
        };
        let tag_end = xml[span.clone()].find('>').map(|i| span.start + i).unwrap_or(span.end);
        let mut tag = xml[span.start..tag_end].to_string();
        let current = read_attr(&tag, "activeTab").unwrap_or(0);
        let valid = self.sheets.get(current).map(|s| !s.hidden).unwrap_or(false);
        if !valid {
            let first_visible = self.sheets.iter().position(|s| !s.hidden).unwrap_or(0);
            tag = set_attr(&tag, "activeTab", first_visible);
        }
        if read_attr(&tag, "firstSheet").is_some_and(|f| f >= self.sheets.len()) {
            tag = set_attr(&tag, "firstSheet", 0);
        }
        xml.replace_range(span.start..tag_end, &tag);
        xml
    }
}

fn read_attr(tag: &str, key: &str) -> Option<usize> {
    let needle = format!(" {}=\"", key);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    tag[start..end].parse().ok()
}

fn set_attr(tag: &str, key: &str, value: usize) -> String {
    let needle = format!(" {}=\"", key);
    if let Some(pos) = tag.find(&needle) {
        let start = pos + needle.len();
        if let Some(len) = tag[start..].find('"') {
            return format!("{}{}{}", &tag[..start], value, &tag[start + len..]);
        }
    }
    let name_end = tag
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(tag.len());
    format!("{} {}=\"{}\"{}", &tag[..name_end], key, value, &tag[name_end..])
}

/// Point sheet references in a raw (escaped) formula at a renamed sheet.
fn rename_sheet_refs(body: &str, old: &str, new: &str) -> String {
    let quoted = |name: &str| format!("'{}'!", xml_escape(&name.replace('\'', "''")));
    let replaced = body.replace(&quoted(old), &quoted(new));
    let bare = format!("{}!", xml_escape(old));
    if old.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        replace_bare(&replaced, &bare, &quoted(new))
    } else {
        replaced
    }
}

/// Replace `Sheet1!` only where it starts a reference, not inside `MySheet1!`.
fn replace_bare(text: &str, needle: &str, with: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(needle) {
        let boundary = rest[..pos]
            .chars()
            .last()
            .map(|c| !(c.is_alphanumeric() || c == '_' || c == '.' || c == '\''))
            .unwrap_or(out.is_empty() || !out.ends_with(|c: char| c.is_alphanumeric()));
        out.push_str(&rest[..pos]);
        out.push_str(if boundary { with } else { needle });
        rest = &rest[pos + needle.len()..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const CT: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/worksheets/sheet2.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/drawings/drawing1.xml" ContentType="application/vnd.openxmlformats-officedocument.drawing+xml"/><Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/></Types>"#;

    const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView activeTab="1"/></bookViews><sheets><sheet name="Deckblatt" sheetId="1" r:id="rId1"/><sheet name="Stufe" sheetId="2" r:id="rId2"/></sheets><definedNames><definedName name="_xlnm.Print_Area" localSheetId="1">Stufe!$A$1:$F$40</definedName></definedNames></workbook>"#;

    const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/></Relationships>"#;

    const SHEET1: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetViews><sheetView tabSelected="1" workbookViewId="0"/></sheetViews><sheetData><row r="1"><c r="A1" s="1"/><c r="B1" s="2"/></row></sheetData></worksheet>"#;

    const SHEET2: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><cols><col min="1" max="1" width="14.5" customWidth="1"/></cols><sheetData><row r="1"><c r="A1" s="3"/></row><row r="5" ht="16"><c r="A5" s="4"/><c r="B5" s="5"/></row></sheetData><mergeCells count="1"><mergeCell ref="A1:F1"/></mergeCells><drawing r:id="rId1"/><tableParts count="1"><tablePart r:id="rId2"/></tableParts></worksheet>"#;

    const SHEET2_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/table" Target="../tables/table1.xml"/></Relationships>"#;

    const DRAWING_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/image1.png"/></Relationships>"#;

    /// A two-sheet template: a cover sheet and a stage sheet with a logo
    /// drawing, a table and a print area.
    pub(crate) fn sample_template() -> Vec<u8> {
        let parts: Vec<(&str, &[u8])> = vec![
            ("[Content_Types].xml", CT.as_bytes()),
            ("_rels/.rels", ROOT_RELS.as_bytes()),
            ("xl/workbook.xml", WORKBOOK.as_bytes()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes()),
            ("xl/styles.xml", b"<styleSheet/>"),
            ("xl/calcChain.xml", b"<calcChain/>"),
            ("xl/worksheets/sheet1.xml", SHEET1.as_bytes()),
            ("xl/worksheets/sheet2.xml", SHEET2.as_bytes()),
            ("xl/worksheets/_rels/sheet2.xml.rels", SHEET2_RELS.as_bytes()),
            ("xl/drawings/drawing1.xml", b"<xdr:wsDr/>"),
            ("xl/drawings/_rels/drawing1.xml.rels", DRAWING_RELS.as_bytes()),
            ("xl/media/image1.png", b"\x89PNG-logo"),
            ("xl/tables/table1.xml", b"<table/>"),
        ];
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, bytes) in parts {
            writer.start_file(name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub(crate) fn read_back(bytes: &[u8], part: &str) -> Option<String> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        read_entry(&mut archive, part)
            .unwrap()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    #[test]
    fn test_load_reads_sheets() {
        let book = TemplateWorkbook::load("pumpversuch.xlsx", sample_template()).unwrap();
        assert_eq!(book.sheet_names(), vec!["Deckblatt", "Stufe"]);
        assert_eq!(book.sheet_count(), 2);
    }

    #[test]
    fn test_load_rejects_non_zip() {
        assert!(TemplateWorkbook::load("x", b"not a zip".to_vec()).is_err());
    }

    #[test]
    fn test_clone_copies_owned_parts() {
        let book = TemplateWorkbook::load("t", sample_template()).unwrap();
        let mut edit = book.edit().unwrap();
        let name = edit.clone_sheet("Stufe", "Stufe 1").unwrap();
        assert_eq!(name, "Stufe 1");
        let out = edit.finish().unwrap();

        let sheet = read_back(&out, "xl/worksheets/sheet3.xml").unwrap();
        assert!(sheet.contains(r#"<col min="1" max="1" width="14.5" customWidth="1"/>"#));
        assert!(sheet.contains(r#"<mergeCell ref="A1:F1"/>"#));
        assert!(!sheet.contains("tableParts"));

        let rels = read_back(&out, "xl/worksheets/_rels/sheet3.xml.rels").unwrap();
        assert!(rels.contains("../drawings/drawing2.xml"));
        assert!(!rels.contains("table"));
        let drawing_rels = read_back(&out, "xl/drawings/_rels/drawing2.xml.rels").unwrap();
        assert!(drawing_rels.contains("../media/image2.png"));
        assert_eq!(read_back(&out, "xl/media/image2.png").unwrap(), "\u{FFFD}PNG-logo");

        let types = read_back(&out, "[Content_Types].xml").unwrap();
        assert!(types.contains("/xl/worksheets/sheet3.xml"));
        assert!(types.contains("/xl/drawings/drawing2.xml"));
        assert!(!types.contains("calcChain"));

        let workbook = read_back(&out, "xl/workbook.xml").unwrap();
        assert!(workbook.contains(r#"<sheet name="Stufe 1" sheetId="3" r:id="rId5"/>"#));
        assert!(workbook.contains(r#"localSheetId="2">'Stufe 1'!$A$1:$F$40</definedName>"#));
        assert!(read_back(&out, "xl/calcChain.xml").is_none());

        // the template part itself is untouched
        let original = read_back(&out, "xl/worksheets/sheet2.xml").unwrap();
        assert_eq!(original, SHEET2);
    }

    #[test]
    fn test_clone_names_are_unique() {
        let book = TemplateWorkbook::load("t", sample_template()).unwrap();
        let mut edit = book.edit().unwrap();
        assert_eq!(edit.clone_sheet("Stufe", "stufe").unwrap(), "stufe (2)");
        assert_eq!(edit.clone_sheet("Stufe", "Stufe").unwrap(), "Stufe (3)");
        assert!(matches!(edit.clone_sheet("Nope", "x"), Err(StampError::UnknownSheet(_))));
    }

    #[test]
    fn test_cells_written_on_clone_only() {
        let book = TemplateWorkbook::load("t", sample_template()).unwrap();
        let mut edit = book.edit().unwrap();
        let name = edit.clone_sheet("Stufe", "Stufe 1").unwrap();
        edit.set_cell(&name, CellAddr::new(0, 0), CellValue::Text("Stufe 1: 2,5 l/s".into()))
            .unwrap();
        edit.set_cell(&name, CellAddr::new(1, 6), CellValue::Number(0.42)).unwrap();
        edit.inherit_row_style(&name, 6, 4).unwrap();
        let out = edit.finish().unwrap();

        let clone = read_back(&out, "xl/worksheets/sheet3.xml").unwrap();
        assert!(clone.contains(r#"<c r="A1" s="3" t="inlineStr">"#));
        assert!(clone.contains(r#"<row r="7" ht="16"><c r="B7" s="5"><v>0.42</v></c></row>"#));
        assert_eq!(read_back(&out, "xl/worksheets/sheet2.xml").unwrap(), SHEET2);
    }

    #[test]
    fn test_remove_template_fixes_names_and_tabs() {
        let book = TemplateWorkbook::load("t", sample_template()).unwrap();
        let mut edit = book.edit().unwrap();
        edit.clone_sheet("Stufe", "Stufe 1").unwrap();
        edit.set_disposition("Stufe", Disposition::Remove).unwrap();
        let out = edit.finish().unwrap();

        assert!(read_back(&out, "xl/worksheets/sheet2.xml").is_none());
        let workbook = read_back(&out, "xl/workbook.xml").unwrap();
        assert!(!workbook.contains("name=\"Stufe\""));
        assert!(workbook.contains(r#"localSheetId="1">'Stufe 1'!"#));
        assert!(workbook.contains(r#"<workbookView activeTab="1"/>"#));
        let rels = read_back(&out, "xl/_rels/workbook.xml.rels").unwrap();
        assert!(!rels.contains("Id=\"rId2\""));
    }

    #[test]
    fn test_hide_and_last_visible_sheet() {
        let book = TemplateWorkbook::load("t", sample_template()).unwrap();
        let mut edit = book.edit().unwrap();
        edit.set_disposition("Deckblatt", Disposition::Hide).unwrap();
        // the only visible sheet left stays visible
        edit.set_disposition("Stufe", Disposition::Remove).unwrap();
        let out = edit.finish().unwrap();
        let workbook = read_back(&out, "xl/workbook.xml").unwrap();
        assert!(workbook.contains(r#"<sheet name="Deckblatt" sheetId="1" state="hidden" r:id="rId1"/>"#));
        assert!(workbook.contains(r#"<sheet name="Stufe" sheetId="2" r:id="rId2"/>"#));
        let cover = read_back(&out, "xl/worksheets/sheet1.xml").unwrap();
        assert!(!cover.contains("tabSelected"));
    }

    #[test]
    fn test_rename_sheet_refs() {
        assert_eq!(rename_sheet_refs("Stufe!$A$1:$B$2", "Stufe", "Stufe 1"), "'Stufe 1'!$A$1:$B$2");
        assert_eq!(rename_sheet_refs("'Pump Test'!$A:$A", "Pump Test", "P2"), "'P2'!$A:$A");
        assert_eq!(rename_sheet_refs("MyStufe!$A$1", "Stufe", "X"), "MyStufe!$A$1");
    }

    #[test]
    fn test_set_attr() {
        assert_eq!(set_attr("<workbookView activeTab=\"3\"", "activeTab", 0), "<workbookView activeTab=\"0\"");
        assert_eq!(set_attr("<workbookView xWindow=\"1\"/", "activeTab", 2), "<workbookView activeTab=\"2\" xWindow=\"1\"/");
    }
}
