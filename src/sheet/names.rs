//! Worksheet names for cloned sheets.
//!
//! Excel rejects names longer than 31 characters, names containing any of
//! `[ ] : * ? / \`, names starting or ending with an apostrophe, and the
//! reserved name `History`. Comparison is case-insensitive.

/// Longest sheet name Excel accepts.
pub const MAX_SHEET_NAME_LEN: usize = 31;

const FORBIDDEN: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
const RESERVED: &[&str] = &["History"];

/// Replace forbidden characters and trim to the length limit.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').trim();
    let truncated: String = cleaned.chars().take(MAX_SHEET_NAME_LEN).collect();
    let truncated = truncated.trim_end().to_string();
    if truncated.is_empty() {
        "Sheet".to_string()
    } else {
        truncated
    }
}

fn clashes(candidate: &str, taken: &[String]) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(candidate))
        || taken.iter().any(|t| t.to_lowercase() == candidate.to_lowercase())
}

/// A valid name based on `desired` that clashes with neither `taken` nor the
/// reserved names.
///
/// Clashes get a ` (2)`, ` (3)`, ... suffix; the base is shortened so the
/// result still fits the length limit.
pub fn unique_sheet_name(desired: &str, taken: &[String]) -> String {
    let base = sanitize_sheet_name(desired);
    if !clashes(&base, taken) {
        return base;
    }
    let mut n = 2usize;
    loop {
        let suffix = format!(" ({})", n);
        let room = MAX_SHEET_NAME_LEN - suffix.chars().count();
        let stem: String = base.chars().take(room).collect();
        let candidate = format!("{}{}", stem.trim_end(), suffix);
        if !clashes(&candidate, taken) {
            return candidate;
        }
        n += 1;
    }
}
