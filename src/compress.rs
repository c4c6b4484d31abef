use std::io::Cursor;

use base64::{prelude::BASE64_STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("unable to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("unable to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Longest permitted edge in pixels.
    pub max_edge: u32,
    /// JPEG quality, 1..=100.
    pub quality: u8,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_edge: 1280,
            quality: 85,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl CompressedImage {
    pub fn to_data_url(&self) -> String {
        to_data_url(&self.jpeg)
    }
}

/// Dimensions after shrinking so the longer edge fits `max_edge`. Never upscales.
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_edge {
        return (width, height);
    }
    let scale = |edge: u32| -> u32 {
        let scaled = (edge as f64 * max_edge as f64 / longer as f64).round() as u32;
        scaled.max(1)
    };
    if width >= height {
        (max_edge, scale(height))
    } else {
        (scale(width), max_edge)
    }
}

pub fn compress_image(bytes: &[u8], config: &CompressionConfig) -> Result<CompressedImage, CompressError> {
    let img = image::load_from_memory(bytes).map_err(CompressError::Decode)?;
    compress_decoded(&img, config)
}

pub fn compress_decoded(img: &DynamicImage, config: &CompressionConfig) -> Result<CompressedImage, CompressError> {
    let (width, height) = img.dimensions();
    let (new_width, new_height) = fit_within(width, height, config.max_edge);

    let resized = if (new_width, new_height) == (width, height) {
        img.to_rgb8()
    } else {
        img.resize_exact(new_width, new_height, FilterType::Triangle)
            .to_rgb8()
    };

    encode_jpeg(&resized, config.quality).map(|jpeg| CompressedImage {
        jpeg,
        width: new_width,
        height: new_height,
    })
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, CompressError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(CompressError::Encode)?;
    Ok(buf.into_inner())
}

pub fn to_data_url(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(jpeg))
}

/// Base64 body of a data URL; bare base64 is returned unchanged.
pub fn strip_data_url(image: &str) -> &str {
    match image.split_once(',') {
        Some((_, payload)) => payload,
        None => image,
    }
}

pub fn decode_image_payload(image: &str) -> Result<DynamicImage, CompressError> {
    let bytes = BASE64_STANDARD.decode(strip_data_url(image).trim())?;
    image::load_from_memory(&bytes).map_err(CompressError::Decode)
}
