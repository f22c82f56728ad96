//! Small XML helpers for the package parts the workbook editor rewrites:
//! relationship files, `[Content_Types].xml` and element spans.

use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Result, StampError};

/// Extract an attribute value by key, unescaped.
pub fn attr_string(e: &BytesStart, key: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key {
            return attr.unescape_value().ok().map(|s| s.into_owned());
        }
    }
    None
}

/// Extract an attribute by local name, ignoring any namespace prefix.
/// Returns the full key as written together with the value.
pub fn attr_local(e: &BytesStart, local: &[u8]) -> Option<(String, String)> {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == local {
            let key = std::str::from_utf8(attr.key.as_ref()).ok()?.to_string();
            let value = attr.unescape_value().ok()?.into_owned();
            return Some((key, value));
        }
    }
    None
}

/// Escape XML special characters.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Byte range of the first element with the given local name, from its
/// opening `<` to the end of its closing tag (or of the self-closing tag).
pub fn element_span(xml: &str, local: &[u8]) -> Result<Option<Range<usize>>> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut start = None;
    loop {
        let before = reader.buffer_position();
        match reader.read_event()? {
            Event::Empty(ref e) if start.is_none() && e.local_name().as_ref() == local => {
                return Ok(Some(before..reader.buffer_position()));
            }
            Event::Start(ref e) if e.local_name().as_ref() == local => {
                if start.is_none() {
                    start = Some(before);
                }
                depth += 1;
            }
            Event::End(ref e) if e.local_name().as_ref() == local && start.is_some() => {
                depth -= 1;
                if depth == 0 {
                    return Ok(start.map(|s| s..reader.buffer_position()));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Remove the first element with the given local name, if any.
pub fn remove_element(xml: &str, local: &[u8]) -> Result<String> {
    Ok(match element_span(xml, local)? {
        Some(span) => format!("{}{}", &xml[..span.start], &xml[span.end..]),
        None => xml.to_string(),
    })
}

// ─── Relationships ─────────────────────────────────────────────────

pub const REL_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub const REL_CALC_CHAIN: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain";

/// One `<Relationship>` of a `.rels` part.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

impl Relationship {
    /// True when the relationship type ends in `/{kind}`, e.g. `table`.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.rel_type.rsplit('/').next() == Some(kind)
    }
}

pub fn parse_relationships(xml: &str) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut rels = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) => {
                if e.local_name().as_ref() == b"Relationship" {
                    rels.push(Relationship {
                        id: attr_string(e, b"Id").unwrap_or_default(),
                        rel_type: attr_string(e, b"Type").unwrap_or_default(),
                        target: attr_string(e, b"Target").unwrap_or_default(),
                        external: attr_string(e, b"TargetMode").as_deref() == Some("External"),
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

pub fn write_relationships(rels: &[Relationship]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    );
    for rel in rels {
        xml.push_str(&format!(
            "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"{}/>",
            xml_escape(&rel.id),
            xml_escape(&rel.rel_type),
            xml_escape(&rel.target),
            if rel.external { " TargetMode=\"External\"" } else { "" }
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

/// First `rIdN` not used by `rels`.
pub fn next_rel_id(rels: &[Relationship]) -> String {
    let max = rels
        .iter()
        .filter_map(|r| r.id.strip_prefix("rId").and_then(|n| n.parse::<u32>().ok()))
        .max()
        .unwrap_or(0);
    format!("rId{}", max + 1)
}

/// Path of the `.rels` part that belongs to `part`.
/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`.
pub fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolve a relationship target against the part that owns the `.rels`.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Rewrite the file name of a relationship target, keeping its directory
/// part as written (`../media/image1.png` -> `../media/image4.png`).
pub fn retarget(target: &str, new_part: &str) -> String {
    let file = new_part.rsplit('/').next().unwrap_or(new_part);
    match target.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, file),
        None => file.to_string(),
    }
}

// ─── Content types ─────────────────────────────────────────────────

/// Parsed `[Content_Types].xml`.
#[derive(Debug, Clone, Default)]
pub struct ContentTypes {
    /// (extension, content type)
    pub defaults: Vec<(String, String)>,
    /// (part name without leading slash, content type)
    pub overrides: Vec<(String, String)>,
}

impl ContentTypes {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut types = ContentTypes::default();
        loop {
            match reader.read_event()? {
                Event::Empty(ref e) | Event::Start(ref e) => match e.local_name().as_ref() {
                    b"Default" => {
                        if let (Some(ext), Some(ct)) =
                            (attr_string(e, b"Extension"), attr_string(e, b"ContentType"))
                        {
                            types.defaults.push((ext, ct));
                        }
                    }
                    b"Override" => {
                        if let (Some(part), Some(ct)) =
                            (attr_string(e, b"PartName"), attr_string(e, b"ContentType"))
                        {
                            types
                                .overrides
                                .push((part.trim_start_matches('/').to_string(), ct));
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        if types.defaults.is_empty() && types.overrides.is_empty() {
            return Err(StampError::Workbook("[Content_Types].xml lists no types".to_string()));
        }
        Ok(types)
    }

    pub fn override_for(&self, part: &str) -> Option<&str> {
        self.overrides
            .iter()
            .find(|(name, _)| name == part)
            .map(|(_, ct)| ct.as_str())
    }

    pub fn add_override(&mut self, part: &str, content_type: &str) {
        self.remove_override(part);
        self.overrides.push((part.to_string(), content_type.to_string()));
    }

    pub fn remove_override(&mut self, part: &str) {
        self.overrides.retain(|(name, _)| name != part);
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
        );
        for (ext, ct) in &self.defaults {
            xml.push_str(&format!(
                "<Default Extension=\"{}\" ContentType=\"{}\"/>",
                xml_escape(ext),
                xml_escape(ct)
            ));
        }
        for (part, ct) in &self.overrides {
            xml.push_str(&format!(
                "<Override PartName=\"/{}\" ContentType=\"{}\"/>",
                xml_escape(part),
                xml_escape(ct)
            ));
        }
        xml.push_str("</Types>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_target() {
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "../drawings/drawing1.xml"),
            "xl/drawings/drawing1.xml"
        );
        assert_eq!(resolve_target("xl/workbook.xml", "worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(resolve_target("xl/workbook.xml", "/xl/styles.xml"), "xl/styles.xml");
        assert_eq!(retarget("../media/image1.png", "xl/media/image4.png"), "../media/image4.png");
        assert_eq!(rels_path_for("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
    }

    #[test]
    fn test_relationships_round_trip_escapes() {
        let xml = r#"<?xml version="1.0"?><Relationships xmlns="x">
            <Relationship Id="rId1" Type="http://x/worksheet" Target="worksheets/sheet1.xml"/>
            <Relationship Id="rId7" Type="http://x/hyperlink" Target="https://a.example/?q=1&amp;b=2" TargetMode="External"/>
        </Relationships>"#;
        let rels = parse_relationships(xml).unwrap();
        assert_eq!(rels.len(), 2);
        assert!(rels[0].is_kind("worksheet"));
        assert_eq!(rels[1].target, "https://a.example/?q=1&b=2");
        assert!(rels[1].external);
        assert_eq!(next_rel_id(&rels), "rId8");
        let written = write_relationships(&rels);
        assert!(written.contains("q=1&amp;b=2"));
        assert_eq!(parse_relationships(&written).unwrap(), rels);
    }

    #[test]
    fn test_element_span_nested() {
        let xml = "<a><b><c/></b><d x=\"1\"/><b>2</b></a>";
        let span = element_span(xml, b"b").unwrap().unwrap();
        assert_eq!(&xml[span], "<b><c/></b>");
        let span = element_span(xml, b"d").unwrap().unwrap();
        assert_eq!(&xml[span], "<d x=\"1\"/>");
        assert!(element_span(xml, b"z").unwrap().is_none());
        assert_eq!(remove_element(xml, b"d").unwrap(), "<a><b><c/></b><b>2</b></a>");
    }

    #[test]
    fn test_content_types() {
        let xml = r#"<Types xmlns="x"><Default Extension="xml" ContentType="application/xml"/>
            <Override PartName="/xl/worksheets/sheet1.xml" ContentType="ws"/></Types>"#;
        let mut types = ContentTypes::parse(xml).unwrap();
        assert_eq!(types.override_for("xl/worksheets/sheet1.xml"), Some("ws"));
        types.add_override("xl/worksheets/sheet2.xml", "ws");
        let again = ContentTypes::parse(&types.to_xml()).unwrap();
        assert_eq!(again.overrides.len(), 2);
        assert!(ContentTypes::parse("<Types/>").is_err());
    }
}
