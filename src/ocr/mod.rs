// src/ocr/mod.rs

mod http;

pub use http::HttpOcrEngine;

use crate::error::OcrError;
use crate::region::{Region, RegionImage, RegionName};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// An `(x, y)` pixel coordinate.
pub type Point = [f64; 2];

/// Four corner points as returned by the OCR detector, clockwise from top-left.
pub type Quad = [Point; 4];

/// One raw OCR hit, in the coordinate space of the image it was run on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub quad: Quad,
    pub text: String,
    pub confidence: f64,
}

/// Something that can read text off an image.
///
/// Implementations are shared across requests and invoked concurrently for
/// every region, so they must be `Send + Sync`.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &DynamicImage) -> Result<Vec<Detection>, OcrError>;
}

/// A filtered OCR hit with its box in full-image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub text: String,
    pub confidence: f64,
    pub bbox: Quad,
}

/// Axis-aligned box `(x1, y1, x2, y2)` with `x1 <= x2`, `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Token {
    pub fn new(text: impl Into<String>, confidence: f64, bbox: Quad) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
        }
    }

    /// Mean of the four corners.
    pub fn center(&self) -> (f64, f64) {
        let (sx, sy) = self
            .bbox
            .iter()
            .fold((0.0_f64, 0.0_f64), |(sx, sy), [x, y]| (sx + x, sy + y));
        (sx / 4.0, sy / 4.0)
    }

    pub fn rect(&self) -> Rect {
        let mut r = Rect {
            x1: f64::INFINITY,
            y1: f64::INFINITY,
            x2: f64::NEG_INFINITY,
            y2: f64::NEG_INFINITY,
        };
        for [x, y] in self.bbox {
            r.x1 = r.x1.min(x);
            r.y1 = r.y1.min(y);
            r.x2 = r.x2.max(x);
            r.y2 = r.y2.max(y);
        }
        r
    }
}

/// Noise and script filter applied to every detection.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TokenFilter {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default = "default_max_non_ascii_ratio")]
    pub max_non_ascii_ratio: f64,
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_min_text_chars() -> usize {
    2
}

fn default_max_non_ascii_ratio() -> f64 {
    0.5
}

impl Default for TokenFilter {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            min_text_chars: default_min_text_chars(),
            max_non_ascii_ratio: default_max_non_ascii_ratio(),
        }
    }
}

impl TokenFilter {
    pub fn accepts(&self, text: &str, confidence: f64) -> bool {
        let chars = text.chars().count();
        if confidence < self.min_confidence || chars < self.min_text_chars {
            return false;
        }
        if chars == 0 {
            return true;
        }
        let non_ascii = text.chars().filter(|c| (*c as u32) > 127).count();
        (non_ascii as f64 / chars as f64) <= self.max_non_ascii_ratio
    }
}

/// Translate a region-local detection into full-image coordinates.
pub fn remap(mut detection: Detection, origin: (f64, f64)) -> Detection {
    for point in &mut detection.quad {
        point[0] += origin.0;
        point[1] += origin.1;
    }
    detection
}

/// Order tokens top-to-bottom, then left-to-right, by box centre.
pub fn sort_reading_order(tokens: &mut [Token]) {
    tokens.sort_by(|a, b| {
        let (ax, ay) = a.center();
        let (bx, by) = b.center();
        ay.total_cmp(&by).then(ax.total_cmp(&bx))
    });
}

/// Turn raw detections of one region into sorted full-image tokens.
///
/// Remapping happens before filtering so every token leaving this function
/// lives in the same coordinate space.
pub fn normalize(detections: Vec<Detection>, region: &Region, filter: &TokenFilter) -> Vec<Token> {
    let origin = region.origin();
    let mut tokens: Vec<Token> = detections
        .into_iter()
        .map(|d| remap(d, origin))
        .filter_map(|d| {
            let text = d.text.trim();
            filter
                .accepts(text, d.confidence)
                .then(|| Token::new(text, d.confidence, d.quad))
        })
        .collect();

    sort_reading_order(&mut tokens);
    tokens
}

/// Tokens per region, in region-table order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionTextMap {
    entries: Vec<(RegionName, Vec<Token>)>,
    failed: Vec<RegionName>,
}

impl RegionTextMap {
    pub fn new(entries: Vec<(RegionName, Vec<Token>)>) -> Self {
        Self {
            entries,
            failed: Vec::new(),
        }
    }

    pub fn get(&self, name: RegionName) -> &[Token] {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, tokens)| tokens.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegionName, &[Token])> {
        self.entries.iter().map(|(n, t)| (*n, t.as_slice()))
    }

    pub fn names(&self) -> Vec<RegionName> {
        self.entries.iter().map(|(n, _)| *n).collect()
    }

    /// All tokens, region by region.
    pub fn flatten(&self) -> Vec<Token> {
        self.entries
            .iter()
            .flat_map(|(_, tokens)| tokens.iter().cloned())
            .collect()
    }

    /// Regions whose OCR call failed and were left empty.
    pub fn failed_regions(&self) -> &[RegionName] {
        &self.failed
    }

    pub fn token_count(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.len()).sum()
    }
}

/// Run OCR on every region concurrently and collect the normalized tokens.
///
/// A region whose OCR call fails or times out is logged and kept with an
/// empty token list; the other regions are unaffected.
pub async fn recognize_regions(
    engine: Arc<dyn OcrEngine>,
    parts: Vec<RegionImage>,
    filter: TokenFilter,
    timeout: Duration,
) -> RegionTextMap {
    let regions: Vec<Region> = parts.iter().map(|p| p.region).collect();
    let mut slots: Vec<Option<Vec<Token>>> = vec![None; regions.len()];

    let mut set = JoinSet::new();
    for (idx, part) in parts.into_iter().enumerate() {
        let engine = Arc::clone(&engine);
        set.spawn(async move {
            let outcome = match tokio::time::timeout(timeout, engine.recognize(&part.image)).await {
                Ok(res) => res,
                Err(_) => Err(OcrError::Timeout(timeout.as_secs())),
            };
            (idx, outcome.map(|dets| normalize(dets, &part.region, &filter)))
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, Ok(tokens))) => {
                debug!(region = %regions[idx].name, tokens = tokens.len(), "Region OCR complete");
                slots[idx] = Some(tokens);
            }
            Ok((idx, Err(e))) => {
                warn!(region = %regions[idx].name, error = %e, "Region OCR failed, continuing without it");
            }
            Err(e) => {
                warn!(error = %e, "Region OCR task aborted");
            }
        }
    }

    let mut map = RegionTextMap::default();
    for (region, slot) in regions.iter().zip(slots) {
        match slot {
            Some(tokens) => map.entries.push((region.name, tokens)),
            None => {
                map.entries.push((region.name, Vec::new()));
                map.failed.push(region.name);
            }
        }
    }

    info!(
        regions = map.entries.len(),
        tokens = map.token_count(),
        failed = map.failed.len(),
        "OCR finished"
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{RegionLayout, partition};
    use image::RgbImage;

    fn quad(x: f64, y: f64, w: f64, h: f64) -> Quad {
        [[x, y], [x + w, y], [x + w, y + h], [x, y + h]]
    }

    fn det(text: &str, confidence: f64, q: Quad) -> Detection {
        Detection {
            quad: q,
            text: text.to_string(),
            confidence,
        }
    }

    fn region(name: RegionName, x: u32, y: u32) -> Region {
        Region {
            name,
            x_start: x,
            y_start: y,
            x_end: x + 100,
            y_end: y + 100,
        }
    }

    #[test]
    fn remap_adds_region_origin() {
        let d = det("NP123", 0.9, [[3.0, 4.0]; 4]);
        let out = remap(d, (500.0, 600.0));
        assert!(out.quad.iter().all(|p| *p == [503.0, 604.0]));
    }

    #[test]
    fn filter_rejects_noise_and_non_latin() {
        let f = TokenFilter::default();
        assert!(f.accepts("NP0012345", 0.95));
        assert!(!f.accepts("NP0012345", 0.59));
        assert!(!f.accepts("A", 0.99));
        assert!(!f.accepts("ใบรับรอง", 0.99));
        // exactly half non-ASCII is still kept
        assert!(f.accepts("aé", 0.99));
    }

    #[test]
    fn normalize_filters_after_remap_and_sorts() {
        let r = region(RegionName::Middle, 0, 300);
        let dets = vec![
            det("second line", 0.9, quad(10.0, 50.0, 40.0, 10.0)),
            det("right", 0.9, quad(60.0, 10.0, 20.0, 10.0)),
            det("x", 0.99, quad(0.0, 0.0, 5.0, 5.0)),
            det("left", 0.9, quad(5.0, 10.0, 20.0, 10.0)),
            det("blurry", 0.3, quad(0.0, 0.0, 5.0, 5.0)),
        ];
        let tokens = normalize(dets, &r, &TokenFilter::default());
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["left", "right", "second line"]);
        assert_eq!(tokens[0].bbox[0], [5.0, 310.0]);
    }

    #[test]
    fn normalize_trims_text() {
        let r = region(RegionName::Bottom, 0, 0);
        let tokens = normalize(vec![det("  By Truck ", 0.9, quad(0.0, 0.0, 1.0, 1.0))], &r, &TokenFilter::default());
        assert_eq!(tokens[0].text, "By Truck");
    }

    #[test]
    fn rect_and_center_from_quad() {
        let t = Token::new("ab", 1.0, [[10.0, 20.0], [30.0, 22.0], [31.0, 40.0], [9.0, 38.0]]);
        let r = t.rect();
        assert_eq!((r.x1, r.y1, r.x2, r.y2), (9.0, 20.0, 31.0, 40.0));
        assert_eq!(t.center(), (20.0, 30.0));
    }

    /// Returns one detection at local (1, 2), or fails for tall regions.
    struct FakeEngine;

    #[async_trait]
    impl OcrEngine for FakeEngine {
        async fn recognize(&self, image: &DynamicImage) -> Result<Vec<Detection>, OcrError> {
            if image.height() > 50 {
                return Err(OcrError::Engine("boom".into()));
            }
            Ok(vec![det("hello", 0.9, [[1.0, 2.0]; 4])])
        }
    }

    #[tokio::test]
    async fn failed_region_is_kept_empty() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let parts = partition(&img, &RegionLayout::default()).unwrap();
        let map = recognize_regions(Arc::new(FakeEngine), parts, TokenFilter::default(), Duration::from_secs(5)).await;

        assert_eq!(map.names(), RegionName::ALL.to_vec());
        // upper_right is 30px tall, middle 40px, bottom 40px
        assert_eq!(map.get(RegionName::UpperRight)[0].bbox[0], [101.0, 2.0]);
        assert_eq!(map.get(RegionName::Middle)[0].bbox[0], [1.0, 32.0]);
        assert_eq!(map.get(RegionName::Bottom)[0].bbox[0], [1.0, 62.0]);
        assert!(map.failed_regions().is_empty());

        let tall = DynamicImage::ImageRgb8(RgbImage::new(200, 400));
        let parts = partition(&tall, &RegionLayout::default()).unwrap();
        let map = recognize_regions(Arc::new(FakeEngine), parts, TokenFilter::default(), Duration::from_secs(5)).await;
        assert_eq!(map.names().len(), 3);
        assert_eq!(map.token_count(), 0);
        assert_eq!(map.failed_regions().len(), 3);
    }

    /// Hangs on the 30px-tall upper_right crop, answers at once elsewhere.
    struct SlowHeaderEngine;

    #[async_trait]
    impl OcrEngine for SlowHeaderEngine {
        async fn recognize(&self, image: &DynamicImage) -> Result<Vec<Detection>, OcrError> {
            if image.height() == 30 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(vec![det("hello", 0.9, [[1.0, 2.0]; 4])])
        }
    }

    #[tokio::test]
    async fn slow_region_times_out_alone() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let parts = partition(&img, &RegionLayout::default()).unwrap();
        let map = recognize_regions(
            Arc::new(SlowHeaderEngine),
            parts,
            TokenFilter::default(),
            Duration::from_millis(50),
        )
        .await;

        assert_eq!(map.failed_regions(), &[RegionName::UpperRight]);
        assert!(map.get(RegionName::UpperRight).is_empty());
        assert_eq!(map.get(RegionName::Middle).len(), 1);
        assert_eq!(map.get(RegionName::Bottom).len(), 1);
        assert_eq!(map.names(), RegionName::ALL.to_vec());
    }
}
