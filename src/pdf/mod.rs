//! # PDF Stamper
//!
//! Paints `StampPlan`s on top of a template PDF and writes the result.
//!
//! The template is parsed once with lopdf and never modified. For every plan
//! a fresh copy of the template's objects is imported into the output
//! document; each template page becomes a form XObject that the new page
//! draws first, followed by the plan's text runs, marks and highlights:
//!
//! ```text
//! Page ── Contents ──> q /FS_TPL Do Q  +  stamped operators
//!   └── Resources ──> XObject FS_TPL (template page + its resources)
//!                     Font FS1.. / ExtGState GS1..
//! ```
//!
//! Rendering N records therefore yields N copies of the template page set in
//! one document.

mod content;
mod fonts;

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use miniz_oxide::deflate::compress_to_vec_zlib;

use crate::error::{Result, StampError};
use crate::font::FontContext;
use crate::layout::StampPlan;
use content::{build_page_content, GraphicsStates, TEMPLATE_XOBJECT};
use fonts::FontResources;

/// Walk at most this many `/Parent` links when resolving inherited page
/// attributes.
const MAX_TREE_DEPTH: usize = 32;

/// A parsed template PDF.
#[derive(Debug, Clone)]
pub struct TemplatePdf {
    name: String,
    doc: Document,
    page_count: usize,
}

impl TemplatePdf {
    /// Parse template bytes. Encrypted templates are rejected.
    pub fn load(name: &str, bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes)?;
        if doc.is_encrypted() {
            return Err(StampError::EncryptedTemplate(name.to_string()));
        }
        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(StampError::Layout(format!("template {} has no pages", name)));
        }
        log::info!("loaded template {} ({} pages, {} bytes)", name, page_count, bytes.len());
        Ok(Self {
            name: name.to_string(),
            doc,
            page_count,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Write one copy of the template per plan, stamped with that plan.
    pub fn stamp(&self, plans: &[StampPlan], fonts: &FontContext, compress: bool) -> Result<Vec<u8>> {
        let mut out = Document::with_version(self.doc.version.as_str());
        let pages_id = out.new_object_id();
        let font_resources = FontResources::build(&mut out, plans, fonts, compress)?;
        let font_dict = font_resources.dictionary();

        let mut kids: Vec<Object> = Vec::new();
        for plan in plans {
            let page_ids = import_template(&mut out, &self.doc);
            for (index, &template_page) in page_ids.iter().enumerate() {
                let commands = plan.page(index);
                let form_id = page_as_form(&mut out, template_page, compress)?;

                let mut states = GraphicsStates::default();
                let content = build_page_content(commands, &font_resources, &mut states);
                let content_id = out.add_object(content_stream(content.into_bytes(), compress));

                let mut ext_g_state = Dictionary::new();
                for (name, opacity) in states.entries() {
                    ext_g_state.set(
                        name.as_bytes().to_vec(),
                        dictionary! {
                            "Type" => "ExtGState",
                            "ca" => Object::Real(opacity as _),
                            "CA" => Object::Real(opacity as _),
                        },
                    );
                }

                let mut page = dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                    "Resources" => dictionary! {
                        "XObject" => dictionary! { TEMPLATE_XOBJECT => form_id },
                        "Font" => font_dict.clone(),
                        "ExtGState" => ext_g_state,
                    },
                    "MediaBox" => media_box(&out, template_page),
                };
                if let Some(crop) = inherited(&out, template_page, b"CropBox") {
                    page.set("CropBox", crop);
                }
                if let Some(rotate) = inherited(&out, template_page, b"Rotate") {
                    page.set("Rotate", rotate);
                }
                kids.push(Object::Reference(out.add_object(page)));
            }
        }

        let count = kids.len() as i64;
        out.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = out.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        out.trailer.set("Root", catalog_id);
        out.prune_objects();
        out.renumber_objects();

        let mut bytes = Vec::new();
        out.save_to(&mut bytes)?;
        log::info!(
            "stamped {} record(s) onto {} -> {} pages, {} bytes",
            plans.len(),
            self.name,
            count,
            bytes.len()
        );
        Ok(bytes)
    }
}

fn content_stream(data: Vec<u8>, compress: bool) -> Stream {
    if compress {
        Stream::new(
            dictionary! { "Filter" => "FlateDecode" },
            compress_to_vec_zlib(&data, 6),
        )
    } else {
        Stream::new(Dictionary::new(), data)
    }
}

/// Copy every template object into `dst` under fresh ids and return the
/// copied page ids in page order.
fn import_template(dst: &mut Document, template: &Document) -> Vec<ObjectId> {
    let mut src = template.clone();
    src.renumber_objects_with(dst.max_id + 1);
    let page_ids: Vec<ObjectId> = src.get_pages().values().copied().collect();
    if src.max_id > dst.max_id {
        dst.max_id = src.max_id;
    }
    dst.objects.extend(src.objects);
    page_ids
}

/// Turn a page's content and resources into a form XObject.
fn page_as_form(doc: &mut Document, page_id: ObjectId, compress: bool) -> Result<ObjectId> {
    let content = doc.get_page_content(page_id)?;
    let resources = inherited(doc, page_id, b"Resources").unwrap_or_else(|| Object::Dictionary(Dictionary::new()));
    let bbox = inherited(doc, page_id, b"CropBox").unwrap_or_else(|| media_box(doc, page_id));

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Form",
        "FormType" => 1_i64,
        "BBox" => bbox,
        "Resources" => resources,
    };
    let data = if compress {
        dict.set("Filter", "FlateDecode");
        compress_to_vec_zlib(&content, 6)
    } else {
        content
    };
    Ok(doc.add_object(Stream::new(dict, data)))
}

fn media_box(doc: &Document, page_id: ObjectId) -> Object {
    inherited(doc, page_id, b"MediaBox")
        .unwrap_or_else(|| Object::Array(vec![0_i64.into(), 0_i64.into(), 595_i64.into(), 842_i64.into()]))
}

/// Look up a page attribute, following `/Parent` for inheritable keys.
/// References to the value itself are resolved.
fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(match value {
                Object::Reference(id) if key != b"Resources" => doc.get_object(*id).ok()?.clone(),
                other => other.clone(),
            });
        }
        let parent = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Color, DrawCommand, MarkStyle, Rect};

    /// A template whose page tree carries MediaBox and Resources on the
    /// Pages node, as many form generators write them.
    fn template_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let mut kids: Vec<Object> = Vec::new();
        for i in 0..pages {
            let content = format!("BT /F1 12 Tf 40 800 Td (Formblatt {}) Tj ET", i + 1).into_bytes();
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => Object::Array(vec![0_i64.into(), 0_i64.into(), 595_i64.into(), 842_i64.into()]),
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn text(x: f64, y: f64, s: &str) -> DrawCommand {
        DrawCommand::Text {
            x,
            y,
            text: s.to_string(),
            font: "Helvetica".to_string(),
            font_size: 9.0,
        }
    }

    #[test]
    fn test_stamp_keeps_template_and_adds_text() {
        let template = TemplatePdf::load("tpl", &template_pdf(2)).unwrap();
        let mut plan = StampPlan::new(2);
        plan.page_mut(1).unwrap().push(text(72.0, 582.0, "Brunnen 4"));
        let bytes = template.stamp(&[plan], &FontContext::new(), false).unwrap();

        let doc = Document::load_mem(&bytes).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        assert_eq!(pages.len(), 2);
        let content = String::from_utf8_lossy(&doc.get_page_content(pages[1]).unwrap()).to_string();
        assert!(content.contains("/FS_TPL Do"));
        assert!(content.contains("72.00 582.00 Td"));
        assert!(content.contains("(Brunnen 4) Tj"));
        let first = String::from_utf8_lossy(&doc.get_page_content(pages[0]).unwrap()).to_string();
        assert!(!first.contains("Brunnen"));
    }

    #[test]
    fn test_batch_repeats_page_set() {
        let template = TemplatePdf::load("tpl", &template_pdf(2)).unwrap();
        let plans = vec![StampPlan::new(2), StampPlan::new(2), StampPlan::new(2)];
        let bytes = template.stamp(&plans, &FontContext::new(), true).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 6);
    }

    #[test]
    fn test_highlight_and_mark_resources() {
        let template = TemplatePdf::load("tpl", &template_pdf(1)).unwrap();
        let mut plan = StampPlan::new(1);
        let page = plan.page_mut(0).unwrap();
        page.push(DrawCommand::Highlight {
            rect: Rect::new(10.0, 10.0, 50.0, 12.0),
            color: Color::HIGHLIGHT,
            opacity: 0.35,
        });
        page.push(DrawCommand::Mark {
            x: 300.0,
            y: 700.0,
            size: 10.0,
            style: MarkStyle::Check,
        });
        let bytes = template.stamp(&[plan], &FontContext::new(), false).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let content = String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).to_string();
        assert!(content.contains("/GS1 gs"));
        assert!(content.contains("(4) Tj"));

        let page = doc.get_dictionary(page_id).unwrap();
        let resources = page.get(b"Resources").and_then(Object::as_dict).unwrap();
        let gs = resources.get(b"ExtGState").and_then(Object::as_dict).unwrap();
        assert!(gs.get(b"GS1").is_ok());
        let fonts = resources.get(b"Font").and_then(Object::as_dict).unwrap();
        assert!(fonts.get(b"FS_ZD").is_ok());
    }

    #[test]
    fn test_inherited_media_box_is_copied() {
        let template = TemplatePdf::load("tpl", &template_pdf(1)).unwrap();
        let bytes = template.stamp(&[StampPlan::new(1)], &FontContext::new(), true).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let page = doc.get_dictionary(page_id).unwrap();
        let media = page.get(b"MediaBox").and_then(Object::as_array).unwrap();
        assert_eq!(media.len(), 4);
    }

    #[test]
    fn test_garbage_template_is_an_error() {
        assert!(matches!(
            TemplatePdf::load("broken", b"not a pdf"),
            Err(StampError::Pdf(_))
        ));
    }
}
