// src/ocr/http.rs

use super::{Detection, OcrEngine};
use crate::config::OcrSection;
use crate::error::OcrError;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

/// Client for a PaddleOCR-serving style HTTP endpoint.
///
/// Built once at startup and shared; `reqwest::Client` pools connections
/// internally so concurrent region calls reuse them.
pub struct HttpOcrEngine {
    client: Client,
    endpoint: String,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct OcrRequest {
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    results: Vec<Vec<OcrLine>>,
}

#[derive(Debug, Deserialize)]
struct OcrLine {
    text: String,
    confidence: f64,
    text_region: Vec<[f64; 2]>,
}

impl HttpOcrEngine {
    pub fn new(cfg: &OcrSection) -> Result<Self, OcrError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| OcrError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            timeout_secs: cfg.timeout_secs,
        })
    }
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, OcrError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| OcrError::Engine(format!("failed to encode region: {e}")))?;
    Ok(buf)
}

/// Detector output sometimes carries more than four points for curved text;
/// collapse those to their bounding quadrilateral.
fn to_quad(points: &[[f64; 2]]) -> Result<[[f64; 2]; 4], OcrError> {
    match points {
        [a, b, c, d] => Ok([*a, *b, *c, *d]),
        [] => Err(OcrError::Malformed("detection without text_region".into())),
        many => {
            let (mut x1, mut y1, mut x2, mut y2) = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
            for [x, y] in many {
                x1 = x1.min(*x);
                y1 = y1.min(*y);
                x2 = x2.max(*x);
                y2 = y2.max(*y);
            }
            Ok([[x1, y1], [x2, y1], [x2, y2], [x1, y2]])
        }
    }
}

fn into_detections(resp: OcrResponse) -> Result<Vec<Detection>, OcrError> {
    if let Some(status) = resp.status.as_deref() {
        if status != "000" && status != "0" {
            return Err(OcrError::Engine(format!(
                "status {status}: {}",
                resp.msg.unwrap_or_default()
            )));
        }
    }

    // one image per request, so only the first result list matters
    let Some(lines) = resp.results.into_iter().next() else {
        return Ok(Vec::new());
    };

    lines
        .into_iter()
        .map(|line| {
            Ok(Detection {
                quad: to_quad(&line.text_region)?,
                text: line.text,
                confidence: line.confidence,
            })
        })
        .collect()
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize(&self, image: &DynamicImage) -> Result<Vec<Detection>, OcrError> {
        let png = encode_png(image)?;
        let request = OcrRequest {
            images: vec![STANDARD.encode(&png)],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OcrError::Timeout(self.timeout_secs)
                } else {
                    OcrError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Transport(format!("OCR service returned {status}: {body}")));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| OcrError::Malformed(e.to_string()))?;

        let detections = into_detections(parsed)?;
        debug!(
            width = image.width(),
            height = image.height(),
            detections = detections.len(),
            "OCR service responded"
        );
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paddle_serving_response() {
        let raw = r#"{
            "msg": "",
            "status": "000",
            "results": [[
                {"confidence": 0.98, "text": "NP0012345", "text_region": [[10, 5], [90, 5], [90, 20], [10, 20]]},
                {"confidence": 0.71, "text": "By Truck", "text_region": [[1, 1], [5, 0], [9, 1], [9, 9], [1, 9]]}
            ]]
        }"#;
        let resp: OcrResponse = serde_json::from_str(raw).unwrap();
        let dets = into_detections(resp).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].text, "NP0012345");
        assert_eq!(dets[0].quad[2], [90.0, 20.0]);
        assert_eq!(dets[1].quad, [[1.0, 0.0], [9.0, 0.0], [9.0, 9.0], [1.0, 9.0]]);
    }

    #[test]
    fn error_status_is_reported() {
        let resp: OcrResponse =
            serde_json::from_str(r#"{"msg": "model not loaded", "status": "101", "results": []}"#).unwrap();
        let err = into_detections(resp).unwrap_err();
        assert!(matches!(err, OcrError::Engine(m) if m.contains("model not loaded")));
    }

    #[test]
    fn empty_results_mean_no_text() {
        let resp: OcrResponse = serde_json::from_str(r#"{"status": "000", "results": [[]]}"#).unwrap();
        assert!(into_detections(resp).unwrap().is_empty());
    }

    #[test]
    fn png_encoding_roundtrips_dimensions() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(12, 7));
        let png = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 7));
    }
}
