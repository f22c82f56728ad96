//! Content-stream operators for one stamped page.

use std::collections::BTreeMap;
use std::fmt::Write;

use super::fonts::FontResources;
use crate::layout::{Color, DrawCommand};

/// Resource name of the template page drawn as a form XObject.
pub(crate) const TEMPLATE_XOBJECT: &str = "FS_TPL";

/// Opacity graphics states used on a page, keyed by opacity in thousandths.
#[derive(Debug, Default)]
pub(crate) struct GraphicsStates {
    by_opacity: BTreeMap<u32, String>,
}

impl GraphicsStates {
    fn name_for(&mut self, opacity: f64) -> String {
        let key = (opacity.clamp(0.0, 1.0) * 1000.0).round() as u32;
        let next = self.by_opacity.len() + 1;
        self.by_opacity
            .entry(key)
            .or_insert_with(|| format!("GS{}", next))
            .clone()
    }

    /// (resource name, opacity) pairs.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, f64)> {
        self.by_opacity
            .iter()
            .map(|(k, name)| (name.as_str(), *k as f64 / 1000.0))
    }
}

/// Build the page content: the template page first, then every command in
/// its own graphics state so nothing leaks into the template.
pub(crate) fn build_page_content(
    commands: &[DrawCommand],
    fonts: &FontResources,
    states: &mut GraphicsStates,
) -> String {
    let mut stream = String::new();
    let _ = write!(stream, "q\n/{} Do\nQ\n", TEMPLATE_XOBJECT);

    // Highlights go under the text so filled boxes never hide data.
    for cmd in commands {
        if let DrawCommand::Highlight {
            rect,
            color,
            opacity,
        } = cmd
        {
            let gs = states.name_for(*opacity);
            let _ = write!(
                stream,
                "q\n/{} gs\n{:.3} {:.3} {:.3} rg\n{:.2} {:.2} {:.2} {:.2} re\nf\nQ\n",
                gs, color.r, color.g, color.b, rect.x, rect.y, rect.width, rect.height
            );
        }
    }

    for cmd in commands {
        match cmd {
            DrawCommand::Text {
                x,
                y,
                text,
                font,
                font_size,
            } => {
                let Some(res) = fonts.get(font) else {
                    continue;
                };
                let _ = write!(
                    stream,
                    "BT\n{}\n/{} {:.1} Tf\n{:.2} {:.2} Td\n",
                    fill(Color::BLACK),
                    res.name,
                    font_size,
                    x,
                    y
                );
                match &res.glyphs {
                    Some(glyphs) => {
                        let mut hex = String::new();
                        for ch in text.chars() {
                            let gid = glyphs.get(&ch).copied().unwrap_or(0);
                            let _ = write!(hex, "{:04X}", gid);
                        }
                        let _ = write!(stream, "<{}> Tj\n", hex);
                    }
                    None => {
                        let _ = write!(stream, "({}) Tj\n", encode_winansi(text));
                    }
                }
                stream.push_str("ET\n");
            }
            DrawCommand::Mark { x, y, size, style } => {
                let Some(res) = fonts.dingbats() else {
                    continue;
                };
                let _ = write!(
                    stream,
                    "BT\n{}\n/{} {:.1} Tf\n{:.2} {:.2} Td\n({}) Tj\nET\n",
                    fill(Color::BLACK),
                    res.name,
                    size,
                    x,
                    y,
                    style.dingbat() as char
                );
            }
            DrawCommand::Highlight { .. } => {}
        }
    }
    stream
}

fn fill(color: Color) -> String {
    format!("{:.3} {:.3} {:.3} rg", color.r, color.g, color.b)
}

/// Encode text as the body of a PDF literal string in WinAnsiEncoding.
/// Characters outside the encoding become `?`.
pub(crate) fn encode_winansi(text: &str) -> String {
    let mut out = String::new();
    for ch in text.chars() {
        let b = unicode_to_winansi(ch).unwrap_or(b'?');
        match b {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            0x20..=0x7E => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out
}

/// Map a Unicode codepoint to a WinAnsiEncoding byte value.
///
/// WinAnsiEncoding is Windows-1252: 0x20..=0x7E and 0xA0..=0xFF map
/// directly and 0x80..=0x9F hold typographic extras.
fn unicode_to_winansi(ch: char) -> Option<u8> {
    let cp = ch as u32;
    if (0x20..=0x7E).contains(&cp) || (0xA0..=0xFF).contains(&cp) {
        return Some(cp as u8);
    }
    let b = match cp {
        0x20AC => 0x80,
        0x201A => 0x82,
        0x0192 => 0x83,
        0x201E => 0x84,
        0x2026 => 0x85,
        0x2020 => 0x86,
        0x2021 => 0x87,
        0x02C6 => 0x88,
        0x2030 => 0x89,
        0x0160 => 0x8A,
        0x2039 => 0x8B,
        0x0152 => 0x8C,
        0x017D => 0x8E,
        0x2018 => 0x91,
        0x2019 => 0x92,
        0x201C => 0x93,
        0x201D => 0x94,
        0x2022 => 0x95,
        0x2013 => 0x96,
        0x2014 => 0x97,
        0x02DC => 0x98,
        0x2122 => 0x99,
        0x0161 => 0x9A,
        0x203A => 0x9B,
        0x0153 => 0x9C,
        0x017E => 0x9E,
        0x0178 => 0x9F,
        _ => return None,
    };
    Some(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_winansi_escapes() {
        assert_eq!(encode_winansi("a(b)c\\"), "a\\(b\\)c\\\\");
        assert_eq!(encode_winansi("Bodenprobe Ü"), "Bodenprobe \\334");
        assert_eq!(encode_winansi("4,5 m…"), "4,5 m\\205");
        assert_eq!(encode_winansi("雨"), "?");
    }

    #[test]
    fn test_graphics_states_are_shared_per_opacity() {
        let mut states = GraphicsStates::default();
        let a = states.name_for(0.35);
        let b = states.name_for(0.35);
        let c = states.name_for(1.0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(states.entries().count(), 2);
    }
}
