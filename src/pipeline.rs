// src/pipeline.rs

use crate::assemble::assemble;
use crate::blur;
use crate::config::Config;
use crate::error::PipelineError;
use crate::heuristics;
use crate::llm_extract::{CompletionService, LlmFieldExtractor};
use crate::ocr::{OcrEngine, TokenFilter, recognize_regions};
use crate::reconcile::{ExtractionResult, reconcile};
use crate::region::{RegionImage, RegionLayout, partition};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, error, info, info_span, warn};

/// Region OCR + LLM extraction for PQ7 certificates.
///
/// Holds long-lived handles to the OCR engine and completion service; build
/// it once at startup and share it across requests.
pub struct Pq7Pipeline {
    ocr: Arc<dyn OcrEngine>,
    llm: LlmFieldExtractor,
    layout: RegionLayout,
    filter: TokenFilter,
    blur_threshold: f64,
    ocr_timeout: Duration,
    debug_dir: Option<PathBuf>,
}

impl Pq7Pipeline {
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        completion: Arc<dyn CompletionService>,
        cfg: &Config,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            ocr,
            llm: LlmFieldExtractor::new(completion, &cfg.llm),
            layout: cfg.pipeline.layout()?,
            filter: cfg.pipeline.filter,
            blur_threshold: cfg.pipeline.blur_threshold,
            ocr_timeout: Duration::from_secs(cfg.pipeline.ocr_timeout_secs),
            debug_dir: cfg.pipeline.debug_dir.clone(),
        })
    }

    /// Extract the certificate fields from a decoded first page.
    ///
    /// Blurry pages return [`ExtractionResult::blurred`] without touching
    /// OCR or the LLM. OCR failures of single regions are absorbed; LLM
    /// failures are returned.
    pub async fn extract(&self, image: &DynamicImage) -> Result<ExtractionResult, PipelineError> {
        let span = info_span!("pq7", width = image.width(), height = image.height());
        self.run(image).instrument(span).await
    }

    async fn run(&self, image: &DynamicImage) -> Result<ExtractionResult, PipelineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PipelineError::InvalidImage(format!(
                "degenerate dimensions {}x{}",
                image.width(),
                image.height()
            )));
        }

        // full-page convolution, keep it off the async workers
        let page = image.clone();
        let threshold = self.blur_threshold;
        let report = tokio::task::spawn_blocking(move || blur::assess(&page, threshold))
            .await
            .map_err(|e| PipelineError::InvalidImage(format!("blur check aborted: {e}")))?;
        info!(
            variance = report.variance,
            threshold = report.threshold,
            blurry = report.is_blurry,
            "Blur check"
        );
        if report.is_blurry {
            return Ok(ExtractionResult::blurred());
        }

        let parts = partition(image, &self.layout)?;
        if let Some(dir) = &self.debug_dir {
            dump_regions(dir, &parts);
        }

        let regions = recognize_regions(Arc::clone(&self.ocr), parts, self.filter, self.ocr_timeout).await;

        let heuristic = heuristics::extract(&regions);
        let (filled, total) = heuristic.coverage();
        info!(
            filled,
            total,
            total_weight = ?heuristic.total_weight,
            export_date = ?heuristic.export_date,
            "Heuristic fields"
        );
        if !regions.failed_regions().is_empty() {
            let failed: Vec<&str> = regions.failed_regions().iter().map(|n| n.as_str()).collect();
            warn!(failed = ?failed, "Regions without OCR text, extraction continues on the rest");
        }

        let text = assemble(&regions);
        let fields = self.llm.extract(&text).await.map_err(|e| {
            error!(error = %e, retryable = e.is_retryable(), "LLM extraction failed");
            PipelineError::Llm(e)
        })?;
        let (filled, total) = fields.coverage();
        info!(filled, total, receipt_number = %fields.receipt_number, "LLM extraction result");

        let result = reconcile(fields, &heuristic);
        let (missing, total) = result.missing_fields();
        info!(missing, total, "Extraction complete");
        Ok(result)
    }
}

/// Write region crops for layout calibration. Failures only warn.
fn dump_regions(dir: &Path, parts: &[RegionImage]) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "Cannot create debug directory");
        return;
    }
    for part in parts {
        let path = dir.join(format!("region_{}.png", part.region.name));
        if let Err(e) = part.image.save(&path) {
            warn!(path = %path.display(), error = %e, "Failed to write region crop");
        }
    }
}
