//! Excel-style cell references.

use serde::{Deserialize, Serialize};

/// Columns on a worksheet (`A` through `XFD`).
pub const MAX_COLS: u32 = 16_384;
/// Rows on a worksheet.
pub const MAX_ROWS: u32 = 1_048_576;

/// A zero-based (column, row) cell position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellAddr {
    pub col: u32,
    pub row: u32,
}

impl CellAddr {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }

    /// The cell at `(col, row)` if it lies on the worksheet grid.
    pub fn checked(col: u32, row: u32) -> Option<Self> {
        (col < MAX_COLS && row < MAX_ROWS).then_some(Self { col, row })
    }

    /// Parse `"B12"` or `"$B$12"`.
    pub fn parse(reference: &str) -> Option<Self> {
        parse_cell_ref(reference).map(|(col, row)| Self { col, row })
    }

    /// Same column, `n` rows further down.
    pub fn down(&self, n: u32) -> Self {
        Self {
            col: self.col,
            row: self.row + n,
        }
    }
}

impl std::fmt::Display for CellAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", col_to_letter(self.col), u64::from(self.row) + 1)
    }
}

impl TryFrom<String> for CellAddr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CellAddr::parse(&value).ok_or_else(|| format!("invalid cell reference '{}'", value))
    }
}

impl From<CellAddr> for String {
    fn from(addr: CellAddr) -> Self {
        addr.to_string()
    }
}

/// Parse a cell reference like "A1" into (col, row), both 0-indexed.
pub fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let mut col: u32 = 0;
    let mut row: u32 = 0;
    let mut saw_col = false;
    let mut saw_row = false;

    for ch in cell_ref.trim().chars() {
        match ch {
            '$' => continue,
            'A'..='Z' | 'a'..='z' if !saw_row => {
                let upper = ch.to_ascii_uppercase();
                col = col.checked_mul(26)?.checked_add(upper as u32 - 'A' as u32 + 1)?;
                saw_col = true;
            }
            '0'..='9' if saw_col => {
                row = row.checked_mul(10)?.checked_add(ch as u32 - '0' as u32)?;
                saw_row = true;
            }
            _ => return None,
        }
    }

    if !saw_col || !saw_row || row == 0 || col > MAX_COLS || row > MAX_ROWS {
        return None;
    }
    Some((col - 1, row - 1))
}

/// Parse a bare column reference like "C" into its 0-based index.
pub fn parse_col(col_ref: &str) -> Option<u32> {
    parse_cell_ref(&format!("{}1", col_ref.trim())).map(|(col, _)| col)
}

/// Convert a 0-based column index to letters: 0 = A, 25 = Z, 26 = AA.
pub fn col_to_letter(col: u32) -> String {
    let mut result = String::new();
    let mut n = u64::from(col) + 1;
    while n > 0 {
        n -= 1;
        result.insert(0, char::from(b'A' + (n % 26) as u8));
        n /= 26;
    }
    result
}
