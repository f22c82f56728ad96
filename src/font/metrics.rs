//! Glyph advance widths for the standard PDF fonts the engine references
//! without embedding. Values are in 1/1000 em, taken from the Adobe AFM files.

use super::StandardFont;

/// Helvetica widths for U+0020..=U+007E.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

/// Helvetica-Bold widths for U+0020..=U+007E.
const HELVETICA_BOLD_ASCII: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, //
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, //
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, //
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556, //
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, //
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584, //
];

const FALLBACK_WIDTH: u16 = 556;

/// Width table for one standard font.
pub struct StandardFontMetrics {
    font: StandardFont,
}

impl StandardFontMetrics {
    pub fn new(font: StandardFont) -> Self {
        Self { font }
    }

    /// Advance width of `ch` in 1/1000 em.
    pub fn glyph_width(&self, ch: char) -> u16 {
        match self.font {
            StandardFont::Courier
            | StandardFont::CourierBold
            | StandardFont::CourierOblique
            | StandardFont::CourierBoldOblique => 600,
            StandardFont::ZapfDingbats => 760,
            StandardFont::Helvetica | StandardFont::HelveticaOblique => {
                helvetica_width(ch, &HELVETICA_ASCII, false)
            }
            StandardFont::HelveticaBold | StandardFont::HelveticaBoldOblique => {
                helvetica_width(ch, &HELVETICA_BOLD_ASCII, true)
            }
        }
    }

    /// Advance width of `ch` in points.
    pub fn char_width(&self, ch: char, font_size: f64) -> f64 {
        self.glyph_width(ch) as f64 / 1000.0 * font_size
    }

    /// Width of a string in points.
    pub fn measure_string(&self, text: &str, font_size: f64) -> f64 {
        text.chars().map(|ch| self.char_width(ch, font_size)).sum()
    }
}

fn ascii_width(table: &[u16; 95], ch: char) -> Option<u16> {
    let cp = ch as usize;
    if (0x20..=0x7E).contains(&cp) {
        table.get(cp - 0x20).copied()
    } else {
        None
    }
}

fn helvetica_width(ch: char, table: &[u16; 95], bold: bool) -> u16 {
    if let Some(w) = ascii_width(table, ch) {
        return w;
    }
    // Accented Latin-1 letters share the width of their base letter.
    if let Some(base) = latin1_base_letter(ch) {
        return ascii_width(table, base).unwrap_or(FALLBACK_WIDTH);
    }
    match ch {
        '\u{00A0}' => 278,
        'ì' | 'í' | 'î' | 'ï' => 278,
        'ß' => 611,
        'Æ' => 1000,
        'æ' => 889,
        'Ø' => 778,
        'Ð' => 722,
        'ø' => 611,
        'ð' | 'þ' => if bold { 611 } else { 556 },
        'Þ' => 667,
        '°' => 400,
        '±' | '×' | '÷' | '¬' => 584,
        '²' | '³' | '¹' => 333,
        '¼' | '½' | '¾' => 834,
        '©' | '®' => 737,
        '·' => 278,
        '§' | 'µ' | '¢' | '£' | '¥' | '«' | '»' | '€' | '–' => 556,
        '…' | '—' | '‰' => 1000,
        '‘' | '’' | '‚' => if bold { 278 } else { 222 },
        '“' | '”' | '„' => if bold { 500 } else { 333 },
        '•' => 350,
        _ => FALLBACK_WIDTH,
    }
}

fn latin1_base_letter(ch: char) -> Option<char> {
    let base = match ch {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'Ç' => 'C',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'Ñ' => 'N',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'Ý' | 'Ÿ' => 'Y',
        'Š' => 'S',
        'Ž' => 'Z',
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'š' => 's',
        'ž' => 'z',
        _ => return None,
    };
    Some(base)
}
