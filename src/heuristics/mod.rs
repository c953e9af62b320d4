// src/heuristics/mod.rs

mod date;
mod weight;

pub use date::extract_export_date;
pub use weight::{extract_total_weight, is_row_adjacent};

use crate::ocr::RegionTextMap;
use crate::region::RegionName;
use serde::Serialize;

/// Fields recovered from token geometry and patterns, without the LLM.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeuristicFields {
    pub total_weight: Option<String>,
    pub export_date: Option<String>,
}

impl HeuristicFields {
    pub fn coverage(&self) -> (usize, usize) {
        let filled = [self.total_weight.is_some(), self.export_date.is_some()]
            .iter()
            .filter(|&&v| v)
            .count();
        (filled, 2)
    }
}

/// Weight is searched across every region (the quantity table straddles the
/// middle/bottom boundary); the export date only in the middle band.
pub fn extract(regions: &RegionTextMap) -> HeuristicFields {
    HeuristicFields {
        total_weight: extract_total_weight(&regions.flatten()),
        export_date: extract_export_date(regions.get(RegionName::Middle)),
    }
}
