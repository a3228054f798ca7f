// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Watermarking for public image derivatives

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

use crate::errors::ArtifactError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkOptions {
    pub corner: Corner,
    /// 0.0 (invisible) to 1.0 (opaque)
    pub opacity: f32,
    /// Mark width as a fraction of the image width
    pub scale: f32,
    pub margin_px: u32,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            corner: Corner::BottomRight,
            opacity: 0.5,
            scale: 0.25,
            margin_px: 16,
        }
    }
}

pub trait Watermarker: Send + Sync {
    /// Returns the marked image encoded as PNG
    fn watermark(&self, bytes: &[u8], options: &WatermarkOptions)
        -> Result<Vec<u8>, ArtifactError>;
}

/// Overlays a logo (or a generated badge when no logo is configured)
pub struct LogoWatermarker {
    logo: Option<RgbaImage>,
}

impl LogoWatermarker {
    pub fn badge() -> Self {
        Self { logo: None }
    }

    pub fn from_logo_file(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let logo = image::open(path)?.to_rgba8();
        Ok(Self { logo: Some(logo) })
    }

    pub fn from_logo_bytes(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let logo = image::load_from_memory(bytes)?.to_rgba8();
        Ok(Self { logo: Some(logo) })
    }

    fn mark_for(&self, target_width: u32) -> RgbaImage {
        let width = target_width.max(8);
        match &self.logo {
            Some(logo) if logo.width() > 0 && logo.height() > 0 => {
                let height = ((logo.height() as u64 * width as u64) / logo.width() as u64).max(1);
                image::imageops::resize(logo, width, height as u32, FilterType::Triangle)
            }
            _ => badge(width, (width / 4).max(4)),
        }
    }
}

impl Default for LogoWatermarker {
    fn default() -> Self {
        Self::badge()
    }
}

/// White plate with a dark border and three diagonal bars
fn badge(width: u32, height: u32) -> RgbaImage {
    let border = (height / 8).max(1);
    RgbaImage::from_fn(width, height, |x, y| {
        let on_border =
            x < border || y < border || x >= width - border || y >= height - border;
        let stripe = (x + y) % (height.max(3)) < border * 2 && x > width / 4 && x < width * 3 / 4;
        if on_border || stripe {
            Rgba([40, 40, 40, 255])
        } else {
            Rgba([255, 255, 255, 220])
        }
    })
}

fn position(base: (u32, u32), mark: (u32, u32), corner: Corner, margin: u32) -> (u32, u32) {
    let right = base.0.saturating_sub(mark.0 + margin);
    let bottom = base.1.saturating_sub(mark.1 + margin);
    let left = margin.min(base.0.saturating_sub(mark.0));
    let top = margin.min(base.1.saturating_sub(mark.1));
    match corner {
        Corner::TopLeft => (left, top),
        Corner::TopRight => (right, top),
        Corner::BottomLeft => (left, bottom),
        Corner::BottomRight => (right, bottom),
    }
}

fn blend(base: &mut RgbaImage, mark: &RgbaImage, origin: (u32, u32), opacity: f32) {
    for (x, y, src) in mark.enumerate_pixels() {
        let (bx, by) = (origin.0 + x, origin.1 + y);
        if bx >= base.width() || by >= base.height() {
            continue;
        }
        let alpha = (src[3] as f32 / 255.0) * opacity;
        if alpha <= 0.0 {
            continue;
        }
        let dst = base.get_pixel_mut(bx, by);
        for channel in 0..3 {
            let mixed = dst[channel] as f32 * (1.0 - alpha) + src[channel] as f32 * alpha;
            dst[channel] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }
}

impl Watermarker for LogoWatermarker {
    fn watermark(
        &self,
        bytes: &[u8],
        options: &WatermarkOptions,
    ) -> Result<Vec<u8>, ArtifactError> {
        let mut base = image::load_from_memory(bytes)?.to_rgba8();
        let scale = options.scale.clamp(0.01, 1.0);
        let mark = self.mark_for((base.width() as f32 * scale) as u32);
        let origin = position(
            base.dimensions(),
            mark.dimensions(),
            options.corner,
            options.margin_px,
        );
        blend(&mut base, &mark, origin, options.opacity.clamp(0.0, 1.0));

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(base).write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }
}
