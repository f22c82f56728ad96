//! Structured error types for the stamping engine.
//!
//! Only configuration and template problems are errors. Bad field data never
//! reaches this type: it degrades to a blank or truncated value instead.

use thiserror::Error;

/// The unified error type returned by all public formstamp API functions.
#[derive(Debug, Error)]
pub enum StampError {
    /// JSON input (record, layout or offsets) failed to parse.
    #[error("Failed to parse {what}: {source}{}", hint_suffix(.hint))]
    Json {
        what: &'static str,
        source: serde_json::Error,
        hint: String,
    },

    /// The template store has no resource under this logical name.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// The template PDF is encrypted and cannot be annotated.
    #[error("Template is encrypted: {0}")]
    EncryptedTemplate(String),

    /// A section, override or flow references a field key the registry lacks.
    #[error("Unknown field key: {0}")]
    UnknownField(String),

    /// A field key appears twice in a layout.
    #[error("Duplicate field key: {0}")]
    DuplicateField(String),

    /// A section references a row set the layout does not define.
    #[error("Unknown row set: {0}")]
    UnknownRowSet(String),

    /// A field or flow addresses a page the template does not have.
    #[error("Field {key} targets page {page} but the template has {page_count} pages")]
    PageOutOfRange {
        key: String,
        page: usize,
        page_count: usize,
    },

    /// A page flow plan is internally inconsistent.
    #[error("Invalid flow plan for row set {set}: {reason}")]
    InvalidFlowPlan { set: String, reason: String },

    /// A sheet unit references a template sheet the workbook lacks.
    #[error("Unknown template sheet: {0}")]
    UnknownSheet(String),

    /// A layout targets the wrong output kind for the requested render.
    #[error("Layout {layout} produces {actual} output, not {expected}")]
    OutputMismatch {
        layout: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A layout document is inconsistent with itself or its template.
    #[error("Layout error: {0}")]
    Layout(String),

    /// A custom font could not be loaded or parsed.
    #[error("Font error: {0}")]
    Font(String),

    /// The template workbook package is structurally broken.
    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StampError>;

fn hint_suffix(hint: &str) -> String {
    if hint.is_empty() {
        String::new()
    } else {
        format!("\n  Hint: {}", hint)
    }
}

impl StampError {
    /// Wrap a serde error with a hint describing what was being parsed.
    pub fn json(what: &'static str, e: serde_json::Error) -> Self {
        let hint = match e.classify() {
            serde_json::error::Category::Syntax => {
                "Check for trailing commas, missing quotes, or unescaped characters.".to_string()
            }
            serde_json::error::Category::Data => {
                format!("The JSON is valid but doesn't match the {} schema. Check field names and types.", what)
            }
            serde_json::error::Category::Eof => {
                "Unexpected end of input — is the JSON truncated?".to_string()
            }
            serde_json::error::Category::Io => String::new(),
        };
        StampError::Json {
            what,
            source: e,
            hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_carries_hint() {
        let err = serde_json::from_str::<serde_json::Value>("{\"a\": 1,}").unwrap_err();
        let err = StampError::json("record", err);
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to parse record"));
        assert!(msg.contains("Hint: Check for trailing commas"));
    }

    #[test]
    fn test_page_out_of_range_message() {
        let err = StampError::PageOutOfRange {
            key: "projectName".to_string(),
            page: 3,
            page_count: 2,
        };
        assert_eq!(
            err.to_string(),
            "Field projectName targets page 3 but the template has 2 pages"
        );
    }
}
