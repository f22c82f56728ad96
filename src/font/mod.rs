//! # Font Management
//!
//! Text measurement for layout and font data for PDF output.
//!
//! The standard PDF fonts (Helvetica, Courier, ZapfDingbats) are referenced
//! by name and never embedded. Custom TrueType fonts are parsed with
//! ttf-parser for metrics and embedded whole by the PDF stamper.

pub mod metrics;

pub use metrics::StandardFontMetrics;

use crate::error::{Result, StampError};
use std::collections::HashMap;
use std::sync::Arc;

/// Font used when a layout names nothing or something unknown.
pub const DEFAULT_FONT: &str = "Helvetica";

/// The standard PDF fonts the engine can reference without embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardFont {
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
    Courier,
    CourierBold,
    CourierOblique,
    CourierBoldOblique,
    ZapfDingbats,
}

impl StandardFont {
    /// The PDF name for this font.
    pub fn pdf_name(&self) -> &'static str {
        match self {
            Self::Helvetica => "Helvetica",
            Self::HelveticaBold => "Helvetica-Bold",
            Self::HelveticaOblique => "Helvetica-Oblique",
            Self::HelveticaBoldOblique => "Helvetica-BoldOblique",
            Self::Courier => "Courier",
            Self::CourierBold => "Courier-Bold",
            Self::CourierOblique => "Courier-Oblique",
            Self::CourierBoldOblique => "Courier-BoldOblique",
            Self::ZapfDingbats => "ZapfDingbats",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let font = match name {
            "Helvetica" => Self::Helvetica,
            "Helvetica-Bold" => Self::HelveticaBold,
            "Helvetica-Oblique" => Self::HelveticaOblique,
            "Helvetica-BoldOblique" => Self::HelveticaBoldOblique,
            "Courier" => Self::Courier,
            "Courier-Bold" => Self::CourierBold,
            "Courier-Oblique" => Self::CourierOblique,
            "Courier-BoldOblique" => Self::CourierBoldOblique,
            "ZapfDingbats" => Self::ZapfDingbats,
            _ => return None,
        };
        Some(font)
    }

    /// Symbolic fonts use their built-in encoding instead of WinAnsi.
    pub fn is_symbolic(&self) -> bool {
        matches!(self, Self::ZapfDingbats)
    }

    pub fn metrics(&self) -> StandardFontMetrics {
        StandardFontMetrics::new(*self)
    }
}

/// Parsed metrics from a TrueType/OpenType font via ttf-parser.
#[derive(Debug, Clone)]
pub struct CustomFontMetrics {
    pub units_per_em: u16,
    pub advance_widths: HashMap<char, u16>,
    pub default_advance: u16,
    pub ascender: i16,
    pub descender: i16,
    pub cap_height: i16,
    pub bbox: [i16; 4],
    /// Maps characters to their glyph IDs in the font.
    pub glyph_ids: HashMap<char, u16>,
}

impl CustomFontMetrics {
    /// Get the advance width of a character in points.
    pub fn char_width(&self, ch: char, font_size: f64) -> f64 {
        let w = self
            .advance_widths
            .get(&ch)
            .copied()
            .unwrap_or(self.default_advance);
        (w as f64 / self.units_per_em as f64) * font_size
    }

    /// Scale a font-unit value to the 1/1000 em PDF text space.
    pub fn to_pdf_units(&self, value: f64) -> f64 {
        value * 1000.0 / self.units_per_em as f64
    }

    /// Parse metrics from font data using ttf-parser.
    pub fn from_font_data(data: &[u8]) -> Option<Self> {
        let face = ttf_parser::Face::parse(data, 0).ok()?;
        let units_per_em = face.units_per_em();
        let ascender = face.ascender();
        let descender = face.descender();
        let cap_height = face.capital_height().unwrap_or(ascender);
        let rect = face.global_bounding_box();

        let mut advance_widths = HashMap::new();
        let mut glyph_ids = HashMap::new();
        let mut default_advance = 0u16;

        for code in 32u32..=0xFFFF {
            if let Some(ch) = char::from_u32(code) {
                if let Some(glyph_id) = face.glyph_index(ch) {
                    let advance = face.glyph_hor_advance(glyph_id).unwrap_or(0);
                    advance_widths.insert(ch, advance);
                    glyph_ids.insert(ch, glyph_id.0);
                    if ch == ' ' {
                        default_advance = advance;
                    }
                }
            }
        }

        if default_advance == 0 {
            default_advance = units_per_em / 2;
        }

        Some(CustomFontMetrics {
            units_per_em,
            advance_widths,
            default_advance,
            ascender,
            descender,
            cap_height,
            bbox: [rect.x_min, rect.y_min, rect.x_max, rect.y_max],
            glyph_ids,
        })
    }
}

/// A registered TrueType font: raw bytes for embedding plus parsed metrics.
#[derive(Debug)]
pub struct CustomFont {
    pub name: String,
    pub data: Vec<u8>,
    pub metrics: CustomFontMetrics,
}

/// What a font name resolves to.
#[derive(Debug, Clone)]
pub enum FontData {
    Standard(StandardFont),
    Custom(Arc<CustomFont>),
}

/// Shared font context used by layout and PDF serialization.
///
/// Built once per layout and read-only during rendering, so it can be shared
/// across threads.
#[derive(Debug, Clone, Default)]
pub struct FontContext {
    custom: HashMap<String, Arc<CustomFont>>,
}

impl FontContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom TrueType font under `name`.
    pub fn register(&mut self, name: &str, data: Vec<u8>) -> Result<()> {
        let metrics = CustomFontMetrics::from_font_data(&data)
            .ok_or_else(|| StampError::Font(format!("cannot parse font data for {}", name)))?;
        log::debug!(
            "registered font {} ({} glyphs, {} bytes)",
            name,
            metrics.glyph_ids.len(),
            data.len()
        );
        self.custom.insert(
            name.to_string(),
            Arc::new(CustomFont {
                name: name.to_string(),
                data,
                metrics,
            }),
        );
        Ok(())
    }

    /// Resolve a font name, falling back to Helvetica if not found.
    pub fn resolve(&self, name: &str) -> FontData {
        if let Some(font) = self.custom.get(name) {
            return FontData::Custom(Arc::clone(font));
        }
        FontData::Standard(StandardFont::from_name(name).unwrap_or(StandardFont::Helvetica))
    }

    /// Get the advance width of a single character in points.
    pub fn char_width(&self, ch: char, font: &str, font_size: f64) -> f64 {
        match self.resolve(font) {
            FontData::Standard(std_font) => std_font.metrics().char_width(ch, font_size),
            FontData::Custom(custom) => custom.metrics.char_width(ch, font_size),
        }
    }

    /// Measure the width of a string in points.
    pub fn measure(&self, text: &str, font: &str, font_size: f64) -> f64 {
        match self.resolve(font) {
            FontData::Standard(std_font) => std_font.metrics().measure_string(text, font_size),
            FontData::Custom(custom) => text
                .chars()
                .map(|ch| custom.metrics.char_width(ch, font_size))
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_context_helvetica() {
        let ctx = FontContext::new();
        let w = ctx.char_width(' ', "Helvetica", 12.0);
        assert!((w - 3.336).abs() < 0.001);
    }

    #[test]
    fn test_font_context_bold_wider() {
        let ctx = FontContext::new();
        let regular = ctx.char_width('b', "Helvetica", 12.0);
        let bold = ctx.char_width('b', "Helvetica-Bold", 12.0);
        assert!(bold > regular, "Bold b should be wider than regular b");
    }

    #[test]
    fn test_font_context_fallback() {
        let ctx = FontContext::new();
        let w1 = ctx.measure("Bohrung", "Helvetica", 12.0);
        let w2 = ctx.measure("Bohrung", "UnknownFont", 12.0);
        assert!((w1 - w2).abs() < 0.001);
    }

    #[test]
    fn test_register_rejects_garbage() {
        let mut ctx = FontContext::new();
        let err = ctx.register("Broken", vec![0, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, StampError::Font(_)));
    }

    #[test]
    fn test_standard_font_names_round_trip() {
        for name in ["Helvetica", "Helvetica-Bold", "Courier", "ZapfDingbats"] {
            let font = StandardFont::from_name(name).unwrap();
            assert_eq!(font.pdf_name(), name);
        }
        assert!(StandardFont::ZapfDingbats.is_symbolic());
        assert!(!StandardFont::Helvetica.is_symbolic());
    }
}
