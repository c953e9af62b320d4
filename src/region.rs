// src/region.rs

use crate::error::PipelineError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The named areas of a PQ7 certificate we OCR separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionName {
    /// Form header and receipt number.
    UpperRight,
    /// Destination, transport mode and date of exportation.
    Middle,
    /// Quantity, packages and weight.
    Bottom,
}

impl RegionName {
    pub const ALL: [RegionName; 3] = [RegionName::UpperRight, RegionName::Middle, RegionName::Bottom];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionName::UpperRight => "upper_right",
            RegionName::Middle => "middle",
            RegionName::Bottom => "bottom",
        }
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fractional boundaries of one region, `[start, end]` per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub name: RegionName,
    pub x: [f64; 2],
    pub y: [f64; 2],
}

impl RegionSpec {
    const fn new(name: RegionName, x: [f64; 2], y: [f64; 2]) -> Self {
        Self { name, x, y }
    }
}

/// Built-in boundary table. Bottom starts at 0.6 so it overlaps the middle
/// band and catches text sitting on the boundary.
pub const DEFAULT_REGIONS: [RegionSpec; 3] = [
    RegionSpec::new(RegionName::UpperRight, [0.5, 1.0], [0.0, 0.3]),
    RegionSpec::new(RegionName::Middle, [0.0, 1.0], [0.3, 0.7]),
    RegionSpec::new(RegionName::Bottom, [0.0, 1.0], [0.6, 1.0]),
];

/// An ordered, validated region table. Iteration order is the order regions
/// appear in the assembled LLM text.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionLayout {
    specs: Vec<RegionSpec>,
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            specs: DEFAULT_REGIONS.to_vec(),
        }
    }
}

impl RegionLayout {
    /// Validate a custom table: every [`RegionName`] exactly once and
    /// `0 <= start < end <= 1` on both axes.
    pub fn new(specs: Vec<RegionSpec>) -> Result<Self, PipelineError> {
        for name in RegionName::ALL {
            let count = specs.iter().filter(|s| s.name == name).count();
            if count != 1 {
                return Err(PipelineError::Config(format!(
                    "region table must list '{name}' exactly once, found {count}"
                )));
            }
        }
        if specs.len() != RegionName::ALL.len() {
            return Err(PipelineError::Config(format!(
                "region table has {} entries, expected {}",
                specs.len(),
                RegionName::ALL.len()
            )));
        }

        for spec in &specs {
            for (axis, [start, end]) in [("x", spec.x), ("y", spec.y)] {
                if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) || start >= end {
                    return Err(PipelineError::Config(format!(
                        "region '{}' has invalid {axis} range [{start}, {end}]",
                        spec.name
                    )));
                }
            }
        }

        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[RegionSpec] {
        &self.specs
    }

    /// Resolve the table to pixel rectangles for an image of the given size.
    pub fn resolve(&self, width: u32, height: u32) -> Result<Vec<Region>, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidImage(format!(
                "degenerate dimensions {width}x{height}"
            )));
        }

        Ok(self
            .specs
            .iter()
            .map(|spec| {
                let (x_start, x_end) = pixel_bounds(spec.x, width);
                let (y_start, y_end) = pixel_bounds(spec.y, height);
                Region {
                    name: spec.name,
                    x_start,
                    y_start,
                    x_end,
                    y_end,
                }
            })
            .collect())
    }
}

/// Truncate fractions to pixels, keeping at least one pixel per axis so
/// tiny images still produce `start < end <= dim`.
fn pixel_bounds([start, end]: [f64; 2], dim: u32) -> (u32, u32) {
    let lo = ((start * dim as f64) as u32).min(dim - 1);
    let hi = ((end * dim as f64) as u32).clamp(lo + 1, dim);
    (lo, hi)
}

/// A region resolved against concrete image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub name: RegionName,
    pub x_start: u32,
    pub y_start: u32,
    pub x_end: u32,
    pub y_end: u32,
}

impl Region {
    /// Offset added to region-local OCR coordinates.
    pub fn origin(&self) -> (f64, f64) {
        (self.x_start as f64, self.y_start as f64)
    }

    pub fn width(&self) -> u32 {
        self.x_end - self.x_start
    }

    pub fn height(&self) -> u32 {
        self.y_end - self.y_start
    }
}

/// A region together with its cropped pixels.
#[derive(Debug, Clone)]
pub struct RegionImage {
    pub region: Region,
    pub image: DynamicImage,
}

/// Slice `image` into the regions of `layout`.
pub fn partition(image: &DynamicImage, layout: &RegionLayout) -> Result<Vec<RegionImage>, PipelineError> {
    let regions = layout.resolve(image.width(), image.height())?;

    Ok(regions
        .into_iter()
        .map(|region| {
            let image = image.crop_imm(region.x_start, region.y_start, region.width(), region.height());
            RegionImage { region, image }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn default_layout_resolves_expected_rectangles() {
        let regions = RegionLayout::default().resolve(1000, 2000).unwrap();
        let names: Vec<_> = regions.iter().map(|r| r.name).collect();
        assert_eq!(names, RegionName::ALL.to_vec());

        assert_eq!(
            regions[0],
            Region {
                name: RegionName::UpperRight,
                x_start: 500,
                y_start: 0,
                x_end: 1000,
                y_end: 600
            }
        );
        assert_eq!((regions[1].y_start, regions[1].y_end), (600, 1400));
        assert_eq!((regions[2].y_start, regions[2].y_end), (1200, 2000));
    }

    #[test]
    fn bounds_hold_for_odd_and_tiny_sizes() {
        let layout = RegionLayout::default();
        for (w, h) in [(1, 1), (2, 3), (7, 5), (333, 101), (1501, 2122)] {
            for r in layout.resolve(w, h).unwrap() {
                assert!(r.x_start < r.x_end && r.x_end <= w, "{r:?} for {w}x{h}");
                assert!(r.y_start < r.y_end && r.y_end <= h, "{r:?} for {w}x{h}");
            }
        }
    }

    #[test]
    fn partition_crops_every_region() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let parts = partition(&img, &RegionLayout::default()).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].image.width(), 100);
        assert_eq!(parts[0].image.height(), 30);
        assert_eq!(parts[2].image.height(), 40);
    }

    #[test]
    fn zero_sized_image_is_rejected() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 10));
        let err = partition(&img, &RegionLayout::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn custom_layout_validation() {
        let mut specs = DEFAULT_REGIONS.to_vec();
        specs[0].x = [0.6, 1.0];
        assert!(RegionLayout::new(specs.clone()).is_ok());

        specs[1].y = [0.7, 0.3];
        assert!(RegionLayout::new(specs).is_err());

        let missing = DEFAULT_REGIONS[..2].to_vec();
        assert!(RegionLayout::new(missing).is_err());

        let mut dup = DEFAULT_REGIONS.to_vec();
        dup.push(DEFAULT_REGIONS[0]);
        assert!(RegionLayout::new(dup).is_err());
    }
}
