use std::fs;
use std::path::PathBuf;

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::compress::{encode_jpeg, CompressError};
use crate::config::OverlayConfig;
use crate::models::Prediction;

const BOX_COLOR: Rgb<u8> = Rgb([0x10, 0xB9, 0x81]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LINE_WIDTH: i32 = 4;
const FONT_SIZE: f32 = 16.0;
const LABEL_HEIGHT: i32 = 24;
const LABEL_PADDING: i32 = 6;
// Used to size the label tab when no font is loaded.
const LABEL_CHAR_WIDTH: i32 = 9;

#[derive(Debug, Error)]
#[error("unable to load overlay font {path}: {reason}")]
pub struct FontError {
    path: PathBuf,
    reason: String,
}

/// Draws detection boxes with `CLASS 87.5%` label tabs.
#[derive(Clone, Default)]
pub struct Overlay {
    font: Option<FontArc>,
}

impl Overlay {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    pub fn from_config(config: &OverlayConfig) -> Result<Self, FontError> {
        let Some(path) = &config.font_path else {
            return Ok(Self::default());
        };
        let data = fs::read(path).map_err(|e| FontError {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let font = FontArc::try_from_vec(data).map_err(|e| FontError {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(Some(font)))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw(&self, image: &mut RgbImage, predictions: &[Prediction]) {
        for prediction in predictions {
            self.draw_one(image, prediction);
        }
    }

    /// Draws onto a copy of `img` and returns it as JPEG bytes.
    pub fn annotate(&self, img: &DynamicImage, predictions: &[Prediction], quality: u8) -> Result<Vec<u8>, CompressError> {
        let mut canvas = img.to_rgb8();
        self.draw(&mut canvas, predictions);
        encode_jpeg(&canvas, quality)
    }

    fn draw_one(&self, image: &mut RgbImage, prediction: &Prediction) {
        let (img_w, img_h) = (image.width() as i32, image.height() as i32);
        if img_w == 0 || img_h == 0 {
            return;
        }

        let left = (prediction.x - prediction.width / 2.0).round() as i32;
        let top = (prediction.y - prediction.height / 2.0).round() as i32;
        let right = (prediction.x + prediction.width / 2.0).round() as i32;
        let bottom = (prediction.y + prediction.height / 2.0).round() as i32;

        let x0 = left.clamp(0, img_w - 1);
        let y0 = top.clamp(0, img_h - 1);
        let x1 = right.clamp(0, img_w);
        let y1 = bottom.clamp(0, img_h);
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        for inset in 0..LINE_WIDTH {
            let (w, h) = (x1 - x0 - 2 * inset, y1 - y0 - 2 * inset);
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x0 + inset, y0 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }

        let label = format!(
            "{} {:.1}%",
            prediction.class,
            prediction.confidence * 100.0
        );
        let scale = PxScale::from(FONT_SIZE);
        let text_width = match &self.font {
            Some(font) => text_size(scale, font, &label).0 as i32,
            None => label.chars().count() as i32 * LABEL_CHAR_WIDTH,
        };

        // Above the box when there is room, otherwise tucked inside its top edge.
        let tab_y = if y0 >= LABEL_HEIGHT { y0 - LABEL_HEIGHT } else { y0 };
        let tab_w = (text_width + 2 * LABEL_PADDING).min(img_w - x0);
        let tab_h = LABEL_HEIGHT.min(img_h - tab_y);
        if tab_w > 0 && tab_h > 0 {
            let tab = Rect::at(x0, tab_y).of_size(tab_w as u32, tab_h as u32);
            draw_filled_rect_mut(image, tab, BOX_COLOR);
        }

        if let Some(font) = &self.font {
            let text_y = tab_y + (LABEL_HEIGHT - FONT_SIZE as i32) / 2;
            draw_text_mut(image, TEXT_COLOR, x0 + LABEL_PADDING, text_y, scale, font, &label);
        }
    }
}
