//! # formstamp
//!
//! Fills fixed-layout report forms. A field-service report (drill log,
//! daily report, pump test) arrives as a JSON record; formstamp places its
//! values onto a template PDF or into a template workbook at positions
//! described by a per-template layout.
//!
//! The template stays authoritative. Nothing is re-laid-out around it:
//! every value lands at a known anchor, nudged by offsets that operators
//! tune per template version, per field and per row. Repeating rows flow
//! across template pages by a fixed rows-per-page plan, and whatever does
//! not fit is reported rather than squeezed in.
//!
//! ## Architecture
//!
//! ```text
//! Record (JSON) + FormLayout (JSON)
//!       ↓
//!   [registry] + [offsets] — Where each field goes, and how far to nudge it
//!       ↓
//!   [assemble] — Run the layout's sections against the record
//!       ↓                       ↓
//!   [layout] → StampPlan    [sheet] → WorkbookEdit
//!       ↓                       ↓
//!   [pdf] — stamp template   XLSX package
//! ```

pub mod assemble;
pub mod error;
pub mod font;
pub mod layout;
pub mod marks;
pub mod model;
pub mod offsets;
pub mod pdf;
pub mod registry;
pub mod sheet;
pub mod store;
pub mod text;

pub use assemble::{Assembler, FormLayout, OutputKind, RenderOutput, RenderWarning};
pub use error::{Result, StampError};
pub use model::ReportRecord;
pub use store::{DirTemplateStore, MemoryTemplateStore, TemplateStore};

/// Render one record with a layout, loading the template from `store`.
///
/// This is the primary entry point. Callers rendering many records with
/// the same layout should build an [`Assembler`] once instead.
pub fn render(layout: FormLayout, record: &ReportRecord, store: &dyn TemplateStore) -> Result<RenderOutput> {
    Assembler::new(layout)?.render(store, record)
}

/// Render a record described as JSON with a layout described as JSON.
pub fn render_json(layout_json: &str, record_json: &str, store: &dyn TemplateStore) -> Result<RenderOutput> {
    let layout = FormLayout::from_json(layout_json)?;
    let record: ReportRecord = serde_json::from_str(record_json).map_err(|e| StampError::json("record", e))?;
    render(layout, &record, store)
}
