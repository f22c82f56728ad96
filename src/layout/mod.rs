//! # Stamp Layout
//!
//! Turns field values into positioned draw commands on template pages.
//!
//! Nothing here knows about PDF syntax. The output is a `StampPlan`: for
//! each template page, the list of text runs, check marks and highlight
//! rectangles to paint on top of it. The PDF writer consumes the plan.
//!
//! Coordinates follow PDF conventions: origin bottom-left, `y` grows
//! upwards, and a text command's `y` is its baseline.

pub mod cell;
pub mod flow;

pub use flow::{PageFlowPlan, RowSlot};

use crate::font::FontContext;
use crate::registry::Align;
use crate::text::{TextLayout, WrappedBlock, DEFAULT_LINE_HEIGHT};
use serde::{Deserialize, Serialize};

/// An RGB color with components in 0.0..=1.0.
///
/// Serialized as a `#rrggbb` hex string.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };
    /// Marker yellow, the default highlight.
    pub const HIGHLIGHT: Color = Color {
        r: 1.0,
        g: 0.92,
        b: 0.23,
    };

    pub fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .ok()
                .map(|v| v as f64 / 255.0)
        };
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        let c = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", c(self.r), c(self.g), c(self.b))
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value).ok_or_else(|| format!("invalid color '{}', expected #rrggbb", value))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

/// An axis-aligned rectangle; `(x, y)` is the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Glyph used for derived check marks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkStyle {
    #[default]
    Check,
    Cross,
}

impl MarkStyle {
    /// Character code of the glyph in ZapfDingbats.
    pub fn dingbat(&self) -> u8 {
        match self {
            MarkStyle::Check => b'4',
            MarkStyle::Cross => b'8',
        }
    }
}

/// A single thing to paint on a template page.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    /// One line of text with its baseline at `y`.
    Text {
        x: f64,
        y: f64,
        text: String,
        font: String,
        font_size: f64,
    },
    /// A check-mark glyph with its baseline at `y`.
    Mark {
        x: f64,
        y: f64,
        size: f64,
        style: MarkStyle,
    },
    /// A translucent filled rectangle.
    Highlight {
        rect: Rect,
        color: Color,
        opacity: f64,
    },
}

/// Everything to paint, grouped by template page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StampPlan {
    pages: Vec<Vec<DrawCommand>>,
}

impl StampPlan {
    pub fn new(page_count: usize) -> Self {
        Self {
            pages: vec![Vec::new(); page_count],
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Commands for `page`, or `None` when the page does not exist.
    pub fn page_mut(&mut self, page: usize) -> Option<&mut Vec<DrawCommand>> {
        self.pages.get_mut(page)
    }

    pub fn page(&self, page: usize) -> &[DrawCommand] {
        self.pages.get(page).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pages(&self) -> impl Iterator<Item = &[DrawCommand]> {
        self.pages.iter().map(Vec::as_slice)
    }

    pub fn command_count(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    /// All text runs on `page` as (x, y, text).
    pub fn texts(&self, page: usize) -> impl Iterator<Item = (f64, f64, &str)> {
        self.page(page).iter().filter_map(|cmd| match cmd {
            DrawCommand::Text { x, y, text, .. } => Some((*x, *y, text.as_str())),
            _ => None,
        })
    }
}

/// The box one field's text is laid into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox<'a> {
    pub x: f64,
    /// Baseline of the first line.
    pub y_top: f64,
    pub max_width: Option<f64>,
    pub max_height: Option<f64>,
    pub font_size: f64,
    pub font: &'a str,
    pub align: Align,
}

impl<'a> TextBox<'a> {
    pub fn new(x: f64, y_top: f64, font_size: f64, font: &'a str) -> Self {
        Self {
            x,
            y_top,
            max_width: None,
            max_height: None,
            font_size,
            font,
            align: Align::Left,
        }
    }

    pub fn sized(mut self, max_width: Option<f64>, max_height: Option<f64>) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }

    pub fn aligned(mut self, align: Align) -> Self {
        self.align = align;
        self
    }
}

/// What was actually placed for one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub lines: usize,
    pub font_size: f64,
    /// Lines or list items were cut to fit the box.
    pub truncated: bool,
}

/// Lays text into boxes and emits draw commands.
#[derive(Debug, Clone, Copy)]
pub struct Painter<'a> {
    fonts: &'a FontContext,
    line_height: f64,
}

impl<'a> Painter<'a> {
    pub fn new(fonts: &'a FontContext) -> Self {
        Self {
            fonts,
            line_height: DEFAULT_LINE_HEIGHT,
        }
    }

    pub fn with_line_height(mut self, factor: f64) -> Self {
        if factor > 0.0 {
            self.line_height = factor;
        }
        self
    }

    pub fn text_layout(&self, font: &'a str) -> TextLayout<'a> {
        TextLayout::new(self.fonts, font).with_line_height(self.line_height)
    }

    /// Wrap `text` into the box, cut it to the box's line budget and emit
    /// one text command per kept line.
    ///
    /// Without a width the text is placed as a single run (newlines still
    /// start new lines).
    pub fn draw_wrapped_block(&self, out: &mut Vec<DrawCommand>, text: &str, bx: &TextBox<'a>) -> Placement {
        let layout = self.text_layout(bx.font);
        let block = match bx.max_width {
            Some(width) => layout.layout_block(text, width, bx.max_height, bx.font_size),
            None => unbounded_block(&layout, text, bx),
        };
        self.emit(out, &layout, &block, bx)
    }

    /// Like `draw_wrapped_block`, but first tries `steps` smaller font sizes
    /// (one point apart) to fit the whole text into the box.
    pub fn fit_and_draw(
        &self,
        out: &mut Vec<DrawCommand>,
        text: &str,
        bx: &TextBox<'a>,
        steps: usize,
    ) -> Placement {
        let layout = self.text_layout(bx.font);
        let block = match (bx.max_width, bx.max_height) {
            (Some(width), Some(height)) => layout.fit(text, width, height, bx.font_size, steps),
            (Some(width), None) => fit_single_line(&layout, text, width, bx.font_size, steps),
            _ => return self.draw_wrapped_block(out, text, bx),
        };
        self.emit(out, &layout, &block, bx)
    }

    fn emit(
        &self,
        out: &mut Vec<DrawCommand>,
        layout: &TextLayout<'a>,
        block: &WrappedBlock,
        bx: &TextBox<'a>,
    ) -> Placement {
        for (i, line) in block.lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            let width = layout.measure(line, block.font_size);
            out.push(DrawCommand::Text {
                x: aligned_x(bx, width),
                y: bx.y_top - i as f64 * block.line_height,
                text: line.clone(),
                font: bx.font.to_string(),
                font_size: block.font_size,
            });
        }
        Placement {
            lines: block.lines.len(),
            font_size: block.font_size,
            truncated: block.truncated,
        }
    }
}

fn unbounded_block(layout: &TextLayout, text: &str, bx: &TextBox) -> WrappedBlock {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect();
    let mut truncated = false;
    if let Some(height) = bx.max_height {
        let budget = layout.line_budget(height, bx.font_size);
        if lines.len() > budget {
            lines.truncate(budget);
            truncated = true;
        }
    }
    WrappedBlock {
        lines,
        font_size: bx.font_size,
        line_height: layout.line_height(bx.font_size),
        truncated,
    }
}

/// Auto-fit for a box with a width but no height: one line, shrinking the
/// font before ellipsizing.
fn fit_single_line(layout: &TextLayout, text: &str, width: f64, base: f64, steps: usize) -> WrappedBlock {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    for step in 0..=steps {
        let size = base - step as f64;
        if size <= 0.0 {
            break;
        }
        if layout.measure(&flat, size) <= width {
            return WrappedBlock {
                lines: vec![flat],
                font_size: size,
                line_height: layout.line_height(size),
                truncated: false,
            };
        }
    }
    WrappedBlock {
        lines: vec![layout.ellipsize(&flat, width, base)],
        font_size: base,
        line_height: layout.line_height(base),
        truncated: true,
    }
}

fn aligned_x(bx: &TextBox, line_width: f64) -> f64 {
    let Some(width) = bx.max_width else {
        return bx.x;
    };
    let slack = (width - line_width).max(0.0);
    match bx.align {
        Align::Left => bx.x,
        Align::Center => bx.x + slack / 2.0,
        Align::Right => bx.x + slack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::ELLIPSIS;

    #[test]
    fn test_wrapped_block_lines_step_down() {
        let fonts = FontContext::new();
        let painter = Painter::new(&fonts);
        let mut out = Vec::new();
        let bx = TextBox::new(50.0, 700.0, 10.0, "Helvetica").sized(Some(60.0), None);
        let placed = painter.draw_wrapped_block(&mut out, "Sand schwach kiesig braun", &bx);
        assert!(placed.lines >= 2);
        let ys: Vec<f64> = out
            .iter()
            .map(|c| match c {
                DrawCommand::Text { y, .. } => *y,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ys[0], 700.0);
        assert!((ys[1] - (700.0 - 11.5)).abs() < 1e-9);
    }

    #[test]
    fn test_wrapped_block_respects_line_budget() {
        let fonts = FontContext::new();
        let painter = Painter::new(&fonts);
        let mut out = Vec::new();
        let bx = TextBox::new(0.0, 100.0, 10.0, "Helvetica").sized(Some(50.0), Some(23.0));
        let text = "eins zwei drei vier fuenf sechs sieben acht";
        let placed = painter.draw_wrapped_block(&mut out, text, &bx);
        assert!(placed.truncated);
        assert_eq!(out.len(), 2);
        match &out[1] {
            DrawCommand::Text { text, .. } => assert!(text.ends_with(ELLIPSIS)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_right_alignment() {
        let fonts = FontContext::new();
        let painter = Painter::new(&fonts);
        let mut out = Vec::new();
        let bx = TextBox::new(100.0, 500.0, 10.0, "Helvetica")
            .sized(Some(80.0), None)
            .aligned(Align::Right);
        painter.draw_wrapped_block(&mut out, "12,50", &bx);
        let width = fonts.measure("12,50", "Helvetica", 10.0);
        match &out[0] {
            DrawCommand::Text { x, .. } => assert!((x - (180.0 - width)).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fit_single_line_shrinks_font() {
        let fonts = FontContext::new();
        let painter = Painter::new(&fonts);
        let mut out = Vec::new();
        let bx = TextBox::new(0.0, 0.0, 10.0, "Helvetica").sized(Some(50.0), None);
        let placed = painter.fit_and_draw(&mut out, "Ton schluffig", &bx, 2);
        assert_eq!(placed.font_size, 8.0);
        assert!(!placed.truncated);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_blank_lines_emit_nothing() {
        let fonts = FontContext::new();
        let painter = Painter::new(&fonts);
        let mut out = Vec::new();
        let bx = TextBox::new(0.0, 300.0, 10.0, "Helvetica");
        let placed = painter.draw_wrapped_block(&mut out, "oben\n\nunten", &bx);
        assert_eq!(placed.lines, 3);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_color_hex_round_trip() {
        let c: Color = serde_json::from_str("\"#ff8000\"").unwrap();
        assert_eq!(c.to_hex(), "#ff8000");
        assert!(serde_json::from_str::<Color>("\"orange\"").is_err());
    }

    #[test]
    fn test_plan_ignores_missing_pages() {
        let mut plan = StampPlan::new(2);
        assert!(plan.page_mut(1).is_some());
        assert!(plan.page_mut(2).is_none());
        assert_eq!(plan.page(5), &[] as &[DrawCommand]);
    }
}
