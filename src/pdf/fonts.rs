//! Font resources for stamped pages.
//!
//! Standard fonts become plain Type1 dictionaries. Custom TrueType fonts are
//! embedded whole as Type0/CIDFontType2 with Identity-H encoding, so content
//! streams address glyphs by glyph ID, plus a ToUnicode map for text
//! extraction.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use miniz_oxide::deflate::compress_to_vec_zlib;

use crate::error::Result;
use crate::font::{CustomFont, FontContext, FontData, StandardFont};
use crate::layout::{DrawCommand, StampPlan};

/// One font as referenced from page resources.
#[derive(Debug, Clone)]
pub(crate) struct FontResource {
    pub name: String,
    pub id: ObjectId,
    /// Char to glyph ID for embedded fonts; `None` for WinAnsi fonts.
    pub glyphs: Option<HashMap<char, u16>>,
}

#[derive(Debug, Default)]
pub(crate) struct FontResources {
    by_font: BTreeMap<String, FontResource>,
    dingbats: Option<FontResource>,
}

impl FontResources {
    /// Add a font object to `doc` for every font the plans use.
    pub fn build(doc: &mut Document, plans: &[StampPlan], fonts: &FontContext, compress: bool) -> Result<Self> {
        let mut used: BTreeMap<String, BTreeSet<char>> = BTreeMap::new();
        let mut needs_dingbats = false;
        for plan in plans {
            for page in plan.pages() {
                for cmd in page {
                    match cmd {
                        DrawCommand::Text { text, font, .. } => {
                            used.entry(font.clone()).or_default().extend(text.chars());
                        }
                        DrawCommand::Mark { .. } => needs_dingbats = true,
                        DrawCommand::Highlight { .. } => {}
                    }
                }
            }
        }

        let mut out = FontResources::default();
        for (i, (font_name, chars)) in used.iter().enumerate() {
            let name = format!("FS{}", i + 1);
            let resource = match fonts.resolve(font_name) {
                FontData::Standard(std_font) => FontResource {
                    name,
                    id: doc.add_object(standard_font_dict(std_font)),
                    glyphs: None,
                },
                FontData::Custom(custom) => {
                    let (id, glyphs) = embed_custom_font(doc, &custom, chars, compress);
                    FontResource {
                        name,
                        id,
                        glyphs: Some(glyphs),
                    }
                }
            };
            out.by_font.insert(font_name.clone(), resource);
        }

        if needs_dingbats {
            out.dingbats = Some(FontResource {
                name: "FS_ZD".to_string(),
                id: doc.add_object(standard_font_dict(StandardFont::ZapfDingbats)),
                glyphs: None,
            });
        }

        log::debug!(
            "font resources: {} fonts{}",
            out.by_font.len(),
            if out.dingbats.is_some() { " + dingbats" } else { "" }
        );
        Ok(out)
    }

    pub fn get(&self, font: &str) -> Option<&FontResource> {
        self.by_font.get(font)
    }

    pub fn dingbats(&self) -> Option<&FontResource> {
        self.dingbats.as_ref()
    }

    /// The `/Font` resource dictionary shared by every stamped page.
    pub fn dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        for res in self.by_font.values().chain(self.dingbats.iter()) {
            dict.set(res.name.as_bytes().to_vec(), Object::Reference(res.id));
        }
        dict
    }
}

fn standard_font_dict(font: StandardFont) -> Dictionary {
    let mut dict = dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => font.pdf_name(),
    };
    if !font.is_symbolic() {
        dict.set("Encoding", "WinAnsiEncoding");
    }
    dict
}

/// Write the five objects of an embedded TrueType font and return the
/// Type0 root plus the glyph map used to encode text.
fn embed_custom_font(
    doc: &mut Document,
    font: &CustomFont,
    chars: &BTreeSet<char>,
    compress: bool,
) -> (ObjectId, HashMap<char, u16>) {
    let metrics = &font.metrics;
    let glyphs: HashMap<char, u16> = chars
        .iter()
        .filter_map(|ch| metrics.glyph_ids.get(ch).map(|&gid| (*ch, gid)))
        .collect();
    let pdf_name = sanitize_font_name(&font.name);
    let scale = |v: f64| metrics.to_pdf_units(v).round() as i64;

    // 1. FontFile2
    let fontfile = if compress {
        Stream::new(
            dictionary! {
                "Length1" => font.data.len() as i64,
                "Filter" => "FlateDecode",
            },
            compress_to_vec_zlib(&font.data, 6),
        )
    } else {
        Stream::new(dictionary! { "Length1" => font.data.len() as i64 }, font.data.clone())
    };
    let fontfile_id = doc.add_object(fontfile);

    // 2. FontDescriptor
    let [x_min, y_min, x_max, y_max] = metrics.bbox;
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => pdf_name.as_str(),
        "Flags" => 4_i64,
        "FontBBox" => Object::Array(vec![
            Object::Integer(scale(x_min as f64)),
            Object::Integer(scale(y_min as f64)),
            Object::Integer(scale(x_max as f64)),
            Object::Integer(scale(y_max as f64)),
        ]),
        "ItalicAngle" => 0_i64,
        "Ascent" => scale(metrics.ascender as f64),
        "Descent" => scale(metrics.descender as f64),
        "CapHeight" => scale(metrics.cap_height as f64),
        "StemV" => 80_i64,
        "FontFile2" => fontfile_id,
    });

    // 3. CIDFont
    let mut widths: Vec<(u16, i64)> = glyphs
        .iter()
        .map(|(ch, &gid)| {
            let advance = metrics
                .advance_widths
                .get(ch)
                .copied()
                .unwrap_or(metrics.default_advance);
            (gid, scale(advance as f64))
        })
        .collect();
    widths.sort_unstable();
    widths.dedup_by_key(|(gid, _)| *gid);
    let mut w_array: Vec<Object> = Vec::with_capacity(widths.len() * 2);
    for (gid, width) in widths {
        w_array.push(Object::Integer(gid as i64));
        w_array.push(Object::Array(vec![Object::Integer(width)]));
    }
    let cidfont_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => pdf_name.as_str(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0_i64,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => scale(metrics.default_advance as f64),
        "W" => w_array,
        "CIDToGIDMap" => "Identity",
    });

    // 4. ToUnicode
    let cmap = build_tounicode_cmap(&glyphs, &pdf_name);
    let tounicode = if compress {
        Stream::new(
            dictionary! { "Filter" => "FlateDecode" },
            compress_to_vec_zlib(cmap.as_bytes(), 6),
        )
    } else {
        Stream::new(Dictionary::new(), cmap.into_bytes())
    };
    let tounicode_id = doc.add_object(tounicode);

    // 5. Type0 root
    let type0_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => pdf_name.as_str(),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(cidfont_id)],
        "ToUnicode" => tounicode_id,
    });

    (type0_id, glyphs)
}

/// ToUnicode CMap so copied text maps back to the original characters.
fn build_tounicode_cmap(glyphs: &HashMap<char, u16>, font_name: &str) -> String {
    let mut gid_to_unicode: Vec<(u16, u32)> = glyphs.iter().map(|(&ch, &gid)| (gid, ch as u32)).collect();
    gid_to_unicode.sort_unstable();
    gid_to_unicode.dedup_by_key(|(gid, _)| *gid);

    let mut cmap = String::new();
    cmap.push_str("/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n");
    cmap.push_str("/CIDSystemInfo\n<< /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    let _ = writeln!(cmap, "/CMapName /{}-UTF16 def", font_name);
    cmap.push_str("/CMapType 2 def\n1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    // at most 100 entries per bfchar block
    for chunk in gid_to_unicode.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for &(gid, unicode) in chunk {
            let _ = writeln!(cmap, "<{:04X}> <{}>", gid, utf16_hex(unicode));
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

fn utf16_hex(cp: u32) -> String {
    let Some(ch) = char::from_u32(cp) else {
        return "FFFD".to_string();
    };
    let mut buf = [0u16; 2];
    ch.encode_utf16(&mut buf)
        .iter()
        .map(|unit| format!("{:04X}", unit))
        .collect()
}

/// Strip a font name down to characters valid in a PDF name.
fn sanitize_font_name(family: &str) -> String {
    let name: String = family
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if name.is_empty() {
        "CustomFont".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MarkStyle;

    #[test]
    fn test_standard_fonts_get_one_resource_each() {
        let mut plan = StampPlan::new(1);
        let page = plan.page_mut(0).unwrap();
        for (text, font) in [("a", "Helvetica"), ("b", "Helvetica"), ("c", "Courier")] {
            page.push(DrawCommand::Text {
                x: 0.0,
                y: 0.0,
                text: text.to_string(),
                font: font.to_string(),
                font_size: 9.0,
            });
        }
        page.push(DrawCommand::Mark {
            x: 0.0,
            y: 0.0,
            size: 9.0,
            style: MarkStyle::Check,
        });

        let mut doc = Document::with_version("1.7");
        let res = FontResources::build(&mut doc, &[plan], &FontContext::new(), true).unwrap();
        assert_eq!(res.dictionary().len(), 3);
        let helv = res.get("Helvetica").unwrap();
        let dict = doc.get_dictionary(helv.id).unwrap();
        assert_eq!(dict.get(b"BaseFont").unwrap().as_name().unwrap(), b"Helvetica");
        let zd = doc.get_dictionary(res.dingbats().unwrap().id).unwrap();
        assert!(zd.get(b"Encoding").is_err());
    }

    #[test]
    fn test_tounicode_uses_utf16() {
        let mut glyphs = HashMap::new();
        glyphs.insert('Ä', 36u16);
        glyphs.insert('\u{1F600}', 40u16);
        let cmap = build_tounicode_cmap(&glyphs, "Test");
        assert!(cmap.contains("<0024> <00C4>"));
        assert!(cmap.contains("<0028> <D83DDE00>"));
    }

    #[test]
    fn test_sanitize_font_name() {
        assert_eq!(sanitize_font_name("DIN Pro Cond"), "DINProCond");
        assert_eq!(sanitize_font_name("§$%"), "CustomFont");
    }
}
