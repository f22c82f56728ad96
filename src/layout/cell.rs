//! Multi-value cells: several short entries stacked inside one field box.

use super::{DrawCommand, Painter, Placement, TextBox};

impl<'a> Painter<'a> {
    /// Stack `values` one per line: entry `i` sits at
    /// `bx.y_top - i * line_height`.
    ///
    /// Each value keeps only its first wrapped line so a long entry cannot
    /// take over the cell. A blank value draws nothing but keeps its slot.
    /// Entries past the box's line budget are dropped; `truncated` reports
    /// that, and `lines` counts the slots down to the last one drawn.
    pub fn draw_stacked_list(
        &self,
        out: &mut Vec<DrawCommand>,
        values: &[String],
        bx: &TextBox<'a>,
    ) -> Placement {
        let layout = self.text_layout(bx.font);
        let line_height = layout.line_height(bx.font_size);
        let budget = bx
            .max_height
            .map(|h| layout.line_budget(h, bx.font_size))
            .unwrap_or(usize::MAX);

        let mut lines = 0usize;
        let mut truncated = false;
        for (slot, value) in values.iter().enumerate() {
            if value.trim().is_empty() {
                continue;
            }
            if slot >= budget {
                truncated = true;
                break;
            }
            let line = match bx.max_width {
                Some(width) => match layout.first_line(value, width, bx.font_size) {
                    Some(line) => line,
                    None => continue,
                },
                None => value.lines().next().unwrap_or_default().to_string(),
            };
            let width = layout.measure(&line, bx.font_size);
            out.push(DrawCommand::Text {
                x: super::aligned_x(bx, width),
                y: bx.y_top - slot as f64 * line_height,
                text: line,
                font: bx.font.to_string(),
                font_size: bx.font_size,
            });
            lines = slot + 1;
        }

        Placement {
            lines,
            font_size: bx.font_size,
            truncated,
        }
    }
}
