//! # Row Flow
//!
//! Distributes an ordered list of repeating rows over a fixed run of template
//! pages. Each page has its own row capacity and first-row baseline; rows
//! move down the page by a constant pitch, optionally corrected per slot for
//! forms whose printed rows are not evenly spaced.
//!
//! Rows past the total capacity have no slot. They are dropped from the
//! output; callers decide whether to report that.

use crate::error::{Result, StampError};
use serde::{Deserialize, Serialize};

/// Geometry of one repeating row set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFlowPlan {
    /// Row capacity of each flow page. Zero is legal.
    pub rows_per_page: Vec<usize>,
    /// Baseline of the first row on each flow page.
    pub base_y_offset: Vec<f64>,
    /// Vertical distance between consecutive rows.
    pub row_pitch: f64,
    /// Extra downward shift per local row slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_uniform_row_offsets: Option<Vec<f64>>,
    /// Flow pages the slot corrections apply to; all pages when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_uniform_pages: Option<Vec<usize>>,
    /// Template page for each flow page; flow page `i` is template page `i`
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<usize>>,
}

/// Where a row lands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowSlot {
    /// Template page index.
    pub page_index: usize,
    /// Index of the flow page within the plan.
    pub flow_page: usize,
    /// Slot on that page, counting from 0 at the top.
    pub local_row: usize,
    /// Baseline of the slot.
    pub y: f64,
}

impl PageFlowPlan {
    pub fn new(rows_per_page: Vec<usize>, base_y_offset: Vec<f64>, row_pitch: f64) -> Self {
        Self {
            rows_per_page,
            base_y_offset,
            row_pitch,
            non_uniform_row_offsets: None,
            non_uniform_pages: None,
            pages: None,
        }
    }

    pub fn with_non_uniform_offsets(mut self, offsets: Vec<f64>, pages: Option<Vec<usize>>) -> Self {
        self.non_uniform_row_offsets = Some(offsets);
        self.non_uniform_pages = pages;
        self
    }

    /// Total number of rows the plan can place.
    pub fn capacity(&self) -> usize {
        self.rows_per_page.iter().sum()
    }

    /// Template page of flow page `flow_page`.
    pub fn template_page(&self, flow_page: usize) -> usize {
        self.pages
            .as_ref()
            .and_then(|p| p.get(flow_page).copied())
            .unwrap_or(flow_page)
    }

    /// Check the plan's arrays agree with each other. `set` names the row
    /// set in the error.
    pub fn validate(&self, set: &str) -> Result<()> {
        let invalid = |reason: String| StampError::InvalidFlowPlan {
            set: set.to_string(),
            reason,
        };
        let page_count = self.rows_per_page.len();
        if self.base_y_offset.len() != page_count {
            return Err(invalid(format!(
                "{} base offsets for {} pages",
                self.base_y_offset.len(),
                page_count
            )));
        }
        if !self.row_pitch.is_finite() {
            return Err(invalid("row pitch is not a finite number".to_string()));
        }
        if let Some(pages) = &self.pages {
            if pages.len() != page_count {
                return Err(invalid(format!(
                    "{} template pages listed for {} flow pages",
                    pages.len(),
                    page_count
                )));
            }
        }
        if let Some(targets) = &self.non_uniform_pages {
            if let Some(bad) = targets.iter().find(|&&p| p >= page_count) {
                return Err(invalid(format!("non-uniform offsets target missing flow page {}", bad)));
            }
        }
        Ok(())
    }

    /// Resolve a global row index to its page slot, or `None` when the row
    /// is past capacity.
    pub fn locate(&self, global_row: usize) -> Option<RowSlot> {
        let mut start = 0usize;
        for (flow_page, &capacity) in self.rows_per_page.iter().enumerate() {
            if global_row < start + capacity {
                let local_row = global_row - start;
                let base = self.base_y_offset.get(flow_page).copied()?;
                let y = base - local_row as f64 * self.row_pitch - self.slot_correction(flow_page, local_row);
                return Some(RowSlot {
                    page_index: self.template_page(flow_page),
                    flow_page,
                    local_row,
                    y,
                });
            }
            start += capacity;
        }
        None
    }

    fn slot_correction(&self, flow_page: usize, local_row: usize) -> f64 {
        let applies = match &self.non_uniform_pages {
            Some(pages) => pages.contains(&flow_page),
            None => true,
        };
        if !applies {
            return 0.0;
        }
        self.non_uniform_row_offsets
            .as_ref()
            .and_then(|offsets| offsets.get(local_row).copied())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> PageFlowPlan {
        PageFlowPlan::new(vec![4, 8], vec![600.0, 600.0], 18.0)
    }

    #[test]
    fn test_coverage_four_then_eight() {
        let plan = plan();
        for row in 0..4 {
            let slot = plan.locate(row).unwrap();
            assert_eq!((slot.page_index, slot.local_row), (0, row));
        }
        for row in 4..12 {
            let slot = plan.locate(row).unwrap();
            assert_eq!((slot.page_index, slot.local_row), (1, row - 4));
        }
        assert!(plan.locate(12).is_none());
        assert_eq!(plan.capacity(), 12);
    }

    #[test]
    fn test_baseline_moves_down_by_pitch() {
        let plan = plan();
        assert_eq!(plan.locate(0).unwrap().y, 600.0);
        assert_eq!(plan.locate(2).unwrap().y, 600.0 - 36.0);
        assert_eq!(plan.locate(5).unwrap().y, 600.0 - 18.0);
    }

    #[test]
    fn test_non_uniform_offsets_on_selected_pages() {
        let plan = plan().with_non_uniform_offsets(vec![0.0, 1.5, 3.0], Some(vec![1]));
        // page 0 is evenly spaced
        assert_eq!(plan.locate(1).unwrap().y, 600.0 - 18.0);
        // page 1 row 1
        assert_eq!(plan.locate(5).unwrap().y, 600.0 - 18.0 - 1.5);
        // past the correction list
        assert_eq!(plan.locate(8).unwrap().y, 600.0 - 4.0 * 18.0);
    }

    #[test]
    fn test_zero_capacity_page_is_skipped() {
        let plan = PageFlowPlan::new(vec![2, 0, 3], vec![700.0, 700.0, 500.0], 10.0);
        assert_eq!(plan.locate(1).unwrap().page_index, 0);
        let slot = plan.locate(2).unwrap();
        assert_eq!((slot.page_index, slot.local_row, slot.y), (2, 0, 500.0));
        assert!(plan.locate(5).is_none());
    }

    #[test]
    fn test_template_page_mapping() {
        let mut plan = plan();
        plan.pages = Some(vec![1, 3]);
        assert_eq!(plan.locate(0).unwrap().page_index, 1);
        assert_eq!(plan.locate(4).unwrap().page_index, 3);
        assert_eq!(plan.locate(4).unwrap().flow_page, 1);
    }

    #[test]
    fn test_validate_rejects_mismatched_offsets() {
        let plan = PageFlowPlan::new(vec![4, 8], vec![600.0], 18.0);
        assert!(matches!(
            plan.validate("layers"),
            Err(StampError::InvalidFlowPlan { set, .. }) if set == "layers"
        ));
        let plan = self::plan().with_non_uniform_offsets(vec![1.0], Some(vec![2]));
        assert!(plan.validate("layers").is_err());
        assert!(self::plan().validate("layers").is_ok());
    }

    #[test]
    fn test_plan_deserializes_camel_case() {
        let plan: PageFlowPlan = serde_json::from_str(
            r#"{"rowsPerPage":[4,8],"baseYOffset":[600,600],"rowPitch":18,"nonUniformRowOffsets":[0,2]}"#,
        )
        .unwrap();
        assert_eq!(plan.locate(5).unwrap().y, 600.0 - 18.0 - 2.0);
    }
}
