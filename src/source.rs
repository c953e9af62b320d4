// src/source.rs

use crate::error::PipelineError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader, RgbImage};
use lopdf::{Document, Object, Stream};
use reqwest::Client;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Download a document over http(s).
pub async fn fetch_url(client: &Client, url: &str) -> Result<Vec<u8>, PipelineError> {
    if url.starts_with("s3://") {
        return Err(PipelineError::Source("S3 URL support is not yet implemented".into()));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(PipelineError::Source(format!(
            "unsupported URL scheme in '{url}', only http(s) is supported"
        )));
    }

    let response = client
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .map_err(|e| PipelineError::Source(format!("download failed: {e}")))?;

    if !response.status().is_success() {
        return Err(PipelineError::Source(format!(
            "download returned {}",
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::Source(format!("download interrupted: {e}")))?;
    info!(url = %url, bytes = bytes.len(), "Downloaded document");
    Ok(bytes.to_vec())
}

/// Decode a base64 payload, with or without a `data:image/...;base64,` prefix.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, PipelineError> {
    let data = match payload.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    STANDARD
        .decode(data.trim())
        .map_err(|e| PipelineError::Source(format!("invalid base64 payload: {e}")))
}

pub fn read_file(path: &Path) -> Result<Vec<u8>, PipelineError> {
    std::fs::read(path).map_err(|e| PipelineError::Source(format!("{}: {e}", path.display())))
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// Decode raster bytes (with EXIF orientation applied) or pull the first
/// page image out of a scanned PDF.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::InvalidImage("empty input".into()));
    }
    if is_pdf(bytes) {
        return first_page_image(bytes);
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::InvalidImage(e.to_string()))?;
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| PipelineError::InvalidImage(e.to_string()))?;
    let orientation = decoder
        .orientation()
        .map_err(|e| PipelineError::InvalidImage(e.to_string()))?;
    let mut image =
        DynamicImage::from_decoder(decoder).map_err(|e| PipelineError::InvalidImage(e.to_string()))?;
    image.apply_orientation(orientation);

    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::InvalidImage("image has no pixels".into()));
    }
    Ok(image)
}

fn filter_name(stream: &Stream) -> Option<Vec<u8>> {
    match stream.dict.get(b"Filter").ok()? {
        Object::Name(name) => Some(name.clone()),
        Object::Array(filters) => filters.last().and_then(|f| f.as_name().ok()).map(|n| n.to_vec()),
        _ => None,
    }
}

fn dict_i64(stream: &Stream, key: &[u8]) -> Option<i64> {
    stream.dict.get(key).ok().and_then(|v| v.as_i64().ok())
}

/// Decode one image XObject. Handles JPEG (`DCTDecode`) directly and raw
/// 8-bit RGB / gray samples after Flate decompression.
fn decode_xobject(stream: &Stream) -> Result<DynamicImage, PipelineError> {
    match filter_name(stream).as_deref() {
        Some(b"DCTDecode") => image::load_from_memory(&stream.content)
            .map_err(|e| PipelineError::InvalidImage(format!("embedded JPEG: {e}"))),
        Some(b"FlateDecode") | None => {
            let width = dict_i64(stream, b"Width").unwrap_or(0) as u32;
            let height = dict_i64(stream, b"Height").unwrap_or(0) as u32;
            let bits = dict_i64(stream, b"BitsPerComponent").unwrap_or(8);
            if bits != 8 {
                return Err(PipelineError::InvalidImage(format!(
                    "unsupported {bits}-bit embedded image"
                )));
            }
            let samples = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            let pixels = (width as usize) * (height as usize);

            if samples.len() >= pixels * 3 {
                RgbImage::from_raw(width, height, samples[..pixels * 3].to_vec()).map(DynamicImage::ImageRgb8)
            } else if samples.len() >= pixels {
                GrayImage::from_raw(width, height, samples[..pixels].to_vec()).map(DynamicImage::ImageLuma8)
            } else {
                None
            }
            .ok_or_else(|| PipelineError::InvalidImage("embedded image sample data too short".into()))
        }
        Some(other) => Err(PipelineError::InvalidImage(format!(
            "unsupported embedded image filter {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// The largest image XObject on the first page. Scanned certificates are a
/// single full-page image, so this is the page itself.
pub fn first_page_image(pdf_bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    let doc = Document::load_mem(pdf_bytes)
        .map_err(|e| PipelineError::InvalidImage(format!("Failed to parse PDF: {e}")))?;

    let pages = doc.get_pages();
    let Some((_, page_id)) = pages.iter().next() else {
        return Err(PipelineError::InvalidImage("PDF has no pages".into()));
    };
    if pages.len() > 1 {
        info!(pages = pages.len(), "Multi-page PDF, using the first page only");
    }

    let xobjects = doc
        .get_object(*page_id)
        .ok()
        .and_then(|page| page.as_dict().ok())
        .and_then(|page| page.get(b"Resources").ok())
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .and_then(|res| res.get(b"XObject").ok())
        .and_then(|x| doc.dereference(x).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .ok_or_else(|| PipelineError::InvalidImage("first page has no images; text PDFs are not supported".into()))?;

    let largest = xobjects
        .iter()
        .filter_map(|(_, obj)| doc.dereference(obj).ok())
        .filter_map(|(_, obj)| obj.as_stream().ok())
        .filter(|s| matches!(s.dict.get(b"Subtype").and_then(|t| t.as_name()), Ok(b"Image")))
        .max_by_key(|s| dict_i64(s, b"Width").unwrap_or(0) * dict_i64(s, b"Height").unwrap_or(0))
        .ok_or_else(|| PipelineError::InvalidImage("first page has no image XObject".into()))?;

    let image = decode_xobject(largest)?;
    if image.width() == 0 || image.height() == 0 {
        warn!("Embedded page image is empty");
        return Err(PipelineError::InvalidImage("embedded image has no pixels".into()));
    }
    info!(width = image.width(), height = image.height(), "Extracted page image from PDF");
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use lopdf::dictionary;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(w, h))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn decodes_png() {
        let img = decode_image(&png_bytes(8, 5)).unwrap();
        assert_eq!((img.width(), img.height()), (8, 5));
    }

    #[test]
    fn garbage_and_empty_are_invalid() {
        assert!(matches!(decode_image(b"this is not an image"), Err(PipelineError::InvalidImage(_))));
        assert!(matches!(decode_image(b""), Err(PipelineError::InvalidImage(_))));
        assert!(matches!(decode_image(b"%PDF-1.4 broken"), Err(PipelineError::InvalidImage(_))));
    }

    #[test]
    fn base64_with_and_without_data_uri() {
        let raw = png_bytes(3, 3);
        let encoded = STANDARD.encode(&raw);
        assert_eq!(decode_base64(&encoded).unwrap(), raw);
        assert_eq!(decode_base64(&format!("data:image/png;base64,{encoded}")).unwrap(), raw);
        assert!(decode_base64("@@@").is_err());
    }

    #[tokio::test]
    async fn rejects_unsupported_schemes() {
        let client = Client::new();
        assert!(matches!(fetch_url(&client, "s3://bucket/key.pdf").await, Err(PipelineError::Source(m)) if m.contains("S3")));
        assert!(fetch_url(&client, "ftp://host/file").await.is_err());
    }

    #[test]
    fn pulls_raw_image_from_first_pdf_page() {
        let mut doc = Document::with_version("1.5");
        let pixels: Vec<u8> = (0..4 * 2 * 3).map(|i| i as u8).collect();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 4,
                "Height" => 2,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            pixels,
        ));
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
            "MediaBox" => vec![0.into(), 0.into(), 4.into(), 2.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        assert!(is_pdf(&bytes));

        let img = decode_image(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (4, 2));
        assert_eq!(img.to_rgb8().get_pixel(1, 0).0, [3, 4, 5]);
    }
}
