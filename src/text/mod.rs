//! # Text Layout
//!
//! Line wrapping, height budgets, ellipsis truncation and auto-fit.
//!
//! Everything here works on measured glyph widths from the `FontContext`;
//! nothing is drawn. The layout module turns the resulting lines into draw
//! operations at concrete coordinates.

use crate::font::FontContext;

/// Appended to the last kept line when a block is truncated.
pub const ELLIPSIS: &str = "\u{2026}";

/// Line height as a multiple of the font size.
pub const DEFAULT_LINE_HEIGHT: f64 = 1.15;

/// Lines produced for one block of text at one font size.
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedBlock {
    pub lines: Vec<String>,
    pub font_size: f64,
    pub line_height: f64,
    /// True when lines were cut to the height budget.
    pub truncated: bool,
}

/// Measures and wraps text in one font.
#[derive(Debug, Clone, Copy)]
pub struct TextLayout<'a> {
    fonts: &'a FontContext,
    font: &'a str,
    line_height: f64,
}

impl<'a> TextLayout<'a> {
    pub fn new(fonts: &'a FontContext, font: &'a str) -> Self {
        Self {
            fonts,
            font,
            line_height: DEFAULT_LINE_HEIGHT,
        }
    }

    /// Use a different line-height factor.
    pub fn with_line_height(mut self, factor: f64) -> Self {
        if factor > 0.0 {
            self.line_height = factor;
        }
        self
    }

    pub fn font(&self) -> &'a str {
        self.font
    }

    pub fn measure(&self, text: &str, font_size: f64) -> f64 {
        self.fonts.measure(text, self.font, font_size)
    }

    /// Distance between consecutive baselines at `font_size`.
    pub fn line_height(&self, font_size: f64) -> f64 {
        font_size * self.line_height
    }

    /// How many lines fit into `max_height` at `font_size`.
    pub fn line_budget(&self, max_height: f64, font_size: f64) -> usize {
        let lh = self.line_height(font_size);
        if lh <= 0.0 || max_height <= 0.0 {
            return 0;
        }
        (max_height / lh).floor() as usize
    }

    /// Break `text` into lines no wider than `max_width`.
    ///
    /// Explicit newlines start a new paragraph and an empty paragraph yields
    /// one blank line. Words are accumulated greedily; a word wider than the
    /// box is split character by character. A line always holds at least one
    /// character, so a glyph wider than the box still gets placed.
    pub fn wrap(&self, text: &str, max_width: f64, font_size: f64) -> Vec<String> {
        let mut lines = Vec::new();
        for paragraph in text.split('\n') {
            let paragraph = paragraph.trim_end_matches('\r');
            self.wrap_paragraph(paragraph, max_width, font_size, &mut lines);
        }
        lines
    }

    fn wrap_paragraph(&self, paragraph: &str, max_width: f64, font_size: f64, out: &mut Vec<String>) {
        let mut current = String::new();
        let mut produced = false;

        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current = self.place_word(word, max_width, font_size, out, &mut produced);
                continue;
            }
            let candidate = format!("{} {}", current, word);
            if self.measure(&candidate, font_size) <= max_width {
                current = candidate;
            } else {
                out.push(std::mem::take(&mut current));
                produced = true;
                current = self.place_word(word, max_width, font_size, out, &mut produced);
            }
        }

        if !current.is_empty() || !produced {
            out.push(current);
        }
    }

    /// Start a new line with `word`, hard-splitting it if it is too wide.
    /// Full chunks are pushed to `out`; the remainder is returned as the
    /// new current line.
    fn place_word(
        &self,
        word: &str,
        max_width: f64,
        font_size: f64,
        out: &mut Vec<String>,
        produced: &mut bool,
    ) -> String {
        if self.measure(word, font_size) <= max_width {
            return word.to_string();
        }
        let mut chunk = String::new();
        let mut chunk_width = 0.0;
        for ch in word.chars() {
            let w = self.fonts.char_width(ch, self.font, font_size);
            if !chunk.is_empty() && chunk_width + w > max_width {
                out.push(std::mem::take(&mut chunk));
                *produced = true;
                chunk_width = 0.0;
            }
            chunk.push(ch);
            chunk_width += w;
        }
        chunk
    }

    /// Wrap and cut to the line budget of `max_height`, ellipsizing the last
    /// kept line when anything was dropped.
    ///
    /// Without a height every wrapped line is kept.
    pub fn layout_block(
        &self,
        text: &str,
        max_width: f64,
        max_height: Option<f64>,
        font_size: f64,
    ) -> WrappedBlock {
        let mut lines = self.wrap(text, max_width, font_size);
        let mut truncated = false;

        if let Some(max_height) = max_height {
            let budget = self.line_budget(max_height, font_size);
            if lines.len() > budget {
                lines.truncate(budget);
                truncated = true;
                if let Some(last) = lines.last_mut() {
                    *last = self.ellipsize(last, max_width, font_size);
                }
            }
        }

        WrappedBlock {
            lines,
            font_size,
            line_height: self.line_height(font_size),
            truncated,
        }
    }

    /// Trim characters off `line` until it plus the ellipsis fits.
    ///
    /// If not even the bare ellipsis fits, the line is returned trimmed of
    /// trailing whitespace only.
    pub fn ellipsize(&self, line: &str, max_width: f64, font_size: f64) -> String {
        if self.measure(ELLIPSIS, font_size) > max_width {
            return line.trim_end().to_string();
        }
        let mut kept: Vec<char> = line.trim_end().chars().collect();
        loop {
            let candidate: String = kept.iter().collect::<String>() + ELLIPSIS;
            if self.measure(&candidate, font_size) <= max_width {
                return candidate;
            }
            if kept.pop().is_none() {
                return ELLIPSIS.to_string();
            }
            while kept.last().is_some_and(|c| c.is_whitespace()) {
                kept.pop();
            }
        }
    }

    /// Try `base`, `base - 1`, ... for `steps` extra sizes and return the
    /// first layout whose full wrap fits the height budget. If none fits,
    /// the base size is used and the text is truncated.
    pub fn fit(
        &self,
        text: &str,
        max_width: f64,
        max_height: f64,
        base_size: f64,
        steps: usize,
    ) -> WrappedBlock {
        for step in 0..=steps {
            let size = base_size - step as f64;
            if size <= 0.0 {
                break;
            }
            let lines = self.wrap(text, max_width, size);
            if lines.len() <= self.line_budget(max_height, size) {
                return WrappedBlock {
                    lines,
                    font_size: size,
                    line_height: self.line_height(size),
                    truncated: false,
                };
            }
        }
        self.layout_block(text, max_width, Some(max_height), base_size)
    }

    /// The first wrapped line of `text`, used for single-line cells.
    pub fn first_line(&self, text: &str, max_width: f64, font_size: f64) -> Option<String> {
        self.wrap(text, max_width, font_size)
            .into_iter()
            .find(|l| !l.is_empty())
    }
}
