//! Field extraction for scanned Phytosanitary Certificates (form P.Q.7).
//!
//! A page goes through a blur gate, is cut into fixed layout regions, each
//! region is OCR'd, two fields are recovered geometrically from the tokens,
//! and an LLM fills in the rest from the assembled region text. The LLM
//! answer is then validated and merged with the heuristic fields.
//!
//! The OCR engine and the completion service are injected as
//! [`ocr::OcrEngine`] and [`llm_extract::CompletionService`] handles; see
//! [`pipeline::Pq7Pipeline`] for the entry point.

pub mod assemble;
pub mod blur;
pub mod config;
pub mod error;
pub mod heuristics;
pub mod llm_extract;
pub mod ocr;
pub mod pipeline;
pub mod reconcile;
pub mod region;
pub mod source;

pub use config::Config;
pub use error::{LlmError, OcrError, PipelineError};
pub use pipeline::Pq7Pipeline;
pub use reconcile::ExtractionResult;
