// src/reconcile.rs

use crate::error::PipelineError;
use crate::heuristics::HeuristicFields;
use crate::llm_extract::Pq7Fields;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Destinations PQ7 certificates in this flow are issued for. Matched as
/// lowercase substrings ("lao" also covers "LAO PEOPLE'S DEMOCRATIC ...").
pub const COUNTRY_WHITELIST: [&str; 4] = ["vietnam", "china", "lao", "campuchia"];

/// Final answer for one certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub receipt_number: String,
    pub destination_country: String,
    pub transportation_mode: String,
    pub total_weight: String,
    pub number_of_boxes: u32,
    pub export_date: String,
    pub is_blur: bool,
}

impl ExtractionResult {
    /// The short-circuit result for an unreadable page.
    pub fn blurred() -> Self {
        Self {
            is_blur: true,
            ..Self::default()
        }
    }

    /// `(empty, total)` over the six extracted fields.
    pub fn missing_fields(&self) -> (usize, usize) {
        let missing = [
            self.receipt_number.is_empty(),
            self.destination_country.is_empty(),
            self.transportation_mode.is_empty(),
            self.total_weight.is_empty(),
            self.number_of_boxes == 0,
            self.export_date.is_empty(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (missing, 6)
    }

    /// Reject a sharp page that still yielded no receipt number or left more
    /// than half the fields empty. Blurry results always pass.
    pub fn ensure_usable(&self) -> Result<(), PipelineError> {
        if self.is_blur {
            return Ok(());
        }
        let (missing, total) = self.missing_fields();
        if missing * 2 > total || self.receipt_number.is_empty() {
            return Err(PipelineError::MissingFields { missing, total });
        }
        Ok(())
    }
}

/// Drop placeholder output, then keep only the `NP<digits>` part.
///
/// A value containing `**` is cleared before the pattern is tried, so a
/// masked number such as `NP****123` is never rescued.
pub fn validate_receipt_number(value: &str) -> String {
    if value.contains("**") {
        return String::new();
    }
    let Ok(re) = Regex::new(r"(?i)NP\d+") else {
        return value.to_string();
    };
    match re.find(value) {
        Some(m) => m.as_str().to_string(),
        None => value.to_string(),
    }
}

pub fn validate_transportation_mode(value: &str) -> String {
    if value.to_lowercase().contains("by") {
        value.to_string()
    } else {
        String::new()
    }
}

pub fn validate_destination_country(value: &str) -> String {
    let lower = value.to_lowercase();
    if COUNTRY_WHITELIST.iter().any(|c| lower.contains(c)) {
        value.to_string()
    } else {
        String::new()
    }
}

/// Merge the heuristic fields into the LLM answer and validate the
/// format-sensitive ones. Heuristics win for weight and export date.
pub fn reconcile(llm: Pq7Fields, heuristics: &HeuristicFields) -> ExtractionResult {
    let total_weight = match &heuristics.total_weight {
        Some(w) if !w.is_empty() => w.clone(),
        _ => llm.total_weight,
    };
    let export_date = match &heuristics.export_date {
        Some(d) if !d.is_empty() => d.clone(),
        _ => llm.export_date,
    };

    ExtractionResult {
        receipt_number: validate_receipt_number(&llm.receipt_number),
        destination_country: validate_destination_country(&llm.destination_country),
        transportation_mode: validate_transportation_mode(&llm.transportation_mode),
        total_weight,
        number_of_boxes: llm.number_of_boxes,
        export_date,
        is_blur: false,
    }
}
