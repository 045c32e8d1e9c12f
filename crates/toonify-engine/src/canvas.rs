use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::PipelineError;

pub const TARGET_WIDTH: u32 = 720;
pub const TARGET_HEIGHT: u32 = 1280;

/// Decodes `bytes` and cover-fits them to 720x1280 PNG.
pub fn resize_to_canonical(bytes: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let image =
        image::load_from_memory(bytes).map_err(|err| PipelineError::MalformedImage(err.to_string()))?;
    encode_png(&cover_fit(image))
}

/// Scales until both target edges are covered, then crops the overflow around
/// the center. Already-canonical images pass through untouched.
pub fn cover_fit(image: DynamicImage) -> DynamicImage {
    if image.dimensions() == (TARGET_WIDTH, TARGET_HEIGHT) {
        return image;
    }
    image.resize_to_fill(TARGET_WIDTH, TARGET_HEIGHT, FilterType::Lanczos3)
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, PipelineError> {
    let mut out = Cursor::new(Vec::new());
    let result = match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut out, ImageFormat::Png)
        }
        _ => image.write_to(&mut out, ImageFormat::Png),
    };
    result.map_err(|err| PipelineError::MalformedImage(format!("png encode failed: {err}")))?;
    Ok(out.into_inner())
}
