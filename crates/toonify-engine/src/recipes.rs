use image::{DynamicImage, Rgba, RgbaImage};
use toonify_contracts::styles::StyleId;

use crate::canvas::encode_png;
use crate::{PipelineError, SourceImage};

pub const EDGE_ENHANCE_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Finish {
    None,
    Sharpen { sigma: f32, threshold: i32 },
    Convolve3x3([f32; 9]),
}

/// A deterministic local filter chain, applied in field order:
/// blur, normalize, brightness/saturation, finish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recipe {
    pub name: &'static str,
    pub blur_sigma: Option<f32>,
    pub normalize: bool,
    pub brightness: f32,
    pub saturation: f32,
    pub finish: Finish,
}

pub const VIVID_EDGES: Recipe = Recipe {
    name: "vivid_edges",
    blur_sigma: None,
    normalize: false,
    brightness: 1.1,
    saturation: 1.2,
    finish: Finish::Sharpen {
        sigma: 1.0,
        threshold: 1,
    },
};

pub const SOFT_BLUR: Recipe = Recipe {
    name: "soft_blur",
    blur_sigma: Some(0.5),
    normalize: false,
    brightness: 1.05,
    saturation: 1.15,
    finish: Finish::Sharpen {
        sigma: 0.5,
        threshold: 1,
    },
};

pub const NORMALIZED_EDGE_ENHANCE: Recipe = Recipe {
    name: "normalized_edge_enhance",
    blur_sigma: None,
    normalize: true,
    brightness: 0.98,
    saturation: 1.1,
    finish: Finish::Convolve3x3(EDGE_ENHANCE_KERNEL),
};

pub const GENTLE_BOOST: Recipe = Recipe {
    name: "gentle_boost",
    blur_sigma: None,
    normalize: false,
    brightness: 1.05,
    saturation: 1.1,
    finish: Finish::None,
};

pub fn recipe_for(style: &StyleId) -> &'static Recipe {
    match style {
        StyleId::Cartoon1 => &VIVID_EDGES,
        StyleId::Cartoon2 => &SOFT_BLUR,
        StyleId::Cartoon3 => &NORMALIZED_EDGE_ENHANCE,
        StyleId::Unknown(_) => &GENTLE_BOOST,
    }
}

impl Recipe {
    pub fn apply(&self, image: DynamicImage) -> DynamicImage {
        let mut image = image;
        if let Some(sigma) = self.blur_sigma {
            image = image.blur(sigma);
        }
        if self.normalize {
            image = normalize(image);
        }
        image = modulate(image, self.brightness, self.saturation);
        match self.finish {
            Finish::None => image,
            Finish::Sharpen { sigma, threshold } => image.unsharpen(sigma, threshold),
            Finish::Convolve3x3(kernel) => image.filter3x3(&kernel),
        }
    }
}

/// Styles the original source with the recipe for `style`, returning PNG bytes
/// at the source's own size together with the recipe that was used.
pub fn apply_local_style(
    source: &SourceImage,
    style: &StyleId,
) -> Result<(Vec<u8>, &'static Recipe), PipelineError> {
    let recipe = recipe_for(style);
    let image = image::load_from_memory(source.bytes())
        .map_err(|err| PipelineError::LocalProcessingFailed(err.to_string()))?;
    let styled = recipe.apply(image);
    let png = encode_png(&styled)
        .map_err(|err| PipelineError::LocalProcessingFailed(err.to_string()))?;
    Ok((png, recipe))
}

/// Multiplies brightness, then pushes each channel away from (or toward) the
/// pixel's luma by `saturation`.
pub fn modulate(image: DynamicImage, brightness: f32, saturation: f32) -> DynamicImage {
    let mut rgba = image.into_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let r = r as f32 * brightness;
        let g = g as f32 * brightness;
        let b = b as f32 * brightness;
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        let adjust = |channel: f32| (luma + (channel - luma) * saturation).round().clamp(0.0, 255.0) as u8;
        *pixel = Rgba([adjust(r), adjust(g), adjust(b), a]);
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Stretches luma between its 1st and 99th percentile to the full range.
pub fn normalize(image: DynamicImage) -> DynamicImage {
    let rgba = image.into_rgba8();
    let mut histogram = [0u64; 256];
    for pixel in rgba.pixels() {
        histogram[luma_of(pixel) as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return DynamicImage::ImageRgba8(rgba);
    }
    let low = percentile(&histogram, total, 0.01);
    let high = percentile(&histogram, total, 0.99);
    if high <= low {
        return DynamicImage::ImageRgba8(rgba);
    }

    let scale = 255.0 / (high - low) as f32;
    let stretch = |channel: u8| ((channel as f32 - low as f32) * scale).round().clamp(0.0, 255.0) as u8;
    let mut out = RgbaImage::new(rgba.width(), rgba.height());
    for (target, pixel) in out.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = pixel.0;
        *target = Rgba([stretch(r), stretch(g), stretch(b), a]);
    }
    DynamicImage::ImageRgba8(out)
}

fn luma_of(pixel: &Rgba<u8>) -> u8 {
    let [r, g, b, _] = pixel.0;
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round().clamp(0.0, 255.0) as u8
}

fn percentile(histogram: &[u64; 256], total: u64, fraction: f64) -> u8 {
    let threshold = (total as f64 * fraction).ceil().max(1.0) as u64;
    let mut seen = 0u64;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= threshold {
            return value as u8;
        }
    }
    255
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, GenericImageView, Rgb, RgbImage, Rgba};
    use toonify_contracts::styles::StyleId;

    use super::{
        apply_local_style, modulate, normalize, recipe_for, Finish, EDGE_ENHANCE_KERNEL,
        GENTLE_BOOST, NORMALIZED_EDGE_ENHANCE, SOFT_BLUR, VIVID_EDGES,
    };
    use crate::canvas::encode_png;
    use crate::{PipelineError, SourceImage};

    #[test]
    fn recipe_table_matches_styles() {
        assert_eq!(recipe_for(&StyleId::Cartoon1), &VIVID_EDGES);
        assert_eq!(recipe_for(&StyleId::Cartoon2), &SOFT_BLUR);
        assert_eq!(recipe_for(&StyleId::Cartoon3), &NORMALIZED_EDGE_ENHANCE);
        assert_eq!(recipe_for(&StyleId::parse("oil")), &GENTLE_BOOST);
        assert_eq!(recipe_for(&StyleId::parse("CARTOON1")), &GENTLE_BOOST);
        assert_eq!(recipe_for(&StyleId::parse("cartoon1 ")), &GENTLE_BOOST);
    }

    #[test]
    fn recipe_parameters() {
        assert_eq!((VIVID_EDGES.brightness, VIVID_EDGES.saturation), (1.1, 1.2));
        assert!(matches!(VIVID_EDGES.finish, Finish::Sharpen { sigma, .. } if sigma == 1.0));

        assert_eq!(SOFT_BLUR.blur_sigma, Some(0.5));
        assert_eq!((SOFT_BLUR.brightness, SOFT_BLUR.saturation), (1.05, 1.15));

        assert!(NORMALIZED_EDGE_ENHANCE.normalize);
        assert_eq!(
            (NORMALIZED_EDGE_ENHANCE.brightness, NORMALIZED_EDGE_ENHANCE.saturation),
            (0.98, 1.1)
        );
        assert_eq!(NORMALIZED_EDGE_ENHANCE.finish, Finish::Convolve3x3(EDGE_ENHANCE_KERNEL));
        assert_eq!(EDGE_ENHANCE_KERNEL[4], 9.0);
        assert_eq!(EDGE_ENHANCE_KERNEL.iter().filter(|w| **w == -1.0).count(), 8);

        assert_eq!(GENTLE_BOOST.finish, Finish::None);
        assert_eq!(GENTLE_BOOST.blur_sigma, None);
        assert!(!GENTLE_BOOST.normalize);
    }

    #[test]
    fn modulate_identity_leaves_pixels_alone() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([10, 120, 250])));
        let out = modulate(image, 1.0, 1.0).to_rgba8();
        assert_eq!(out.get_pixel(2, 2).0, [10, 120, 250, 255]);
    }

    #[test]
    fn zero_saturation_is_grayscale_and_brightness_scales() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([200, 100, 50])));
        let gray = modulate(image.clone(), 1.0, 0.0).to_rgba8();
        let [r, g, b, _] = gray.get_pixel(0, 0).0;
        assert_eq!(r, g);
        assert_eq!(g, b);

        let bright = modulate(image, 1.1, 1.0).to_rgba8();
        assert_eq!(bright.get_pixel(0, 0).0, [220, 110, 55, 255]);
    }

    #[test]
    fn normalize_stretches_low_contrast_images() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(100, 1, |x, _| {
            let level = 100 + (x as u8 % 50);
            Rgb([level, level, level])
        }));
        let out = normalize(image).to_rgba8();
        let levels: Vec<u8> = out.pixels().map(|pixel| pixel.0[0]).collect();
        assert_eq!(levels.iter().min().copied(), Some(0));
        assert_eq!(levels.iter().max().copied(), Some(255));
    }

    #[test]
    fn normalize_keeps_flat_images() {
        let image = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(3, 3, Rgba([9, 9, 9, 128])));
        let out = normalize(image).to_rgba8();
        assert_eq!(out.get_pixel(1, 1).0, [9, 9, 9, 128]);
    }

    #[test]
    fn every_recipe_keeps_source_dimensions() -> anyhow::Result<()> {
        let png = encode_png(&DynamicImage::ImageRgb8(RgbImage::from_fn(37, 23, |x, y| {
            Rgb([(x * 6) as u8, (y * 11) as u8, 90])
        })))?;
        let source = SourceImage::new(png);
        for style in ["cartoon1", "cartoon2", "cartoon3", "unknown"] {
            let (styled, recipe) = apply_local_style(&source, &StyleId::parse(style))?;
            assert_eq!(recipe, recipe_for(&StyleId::parse(style)));
            assert_eq!(image::load_from_memory(&styled)?.dimensions(), (37, 23));
        }
        Ok(())
    }

    #[test]
    fn undecodable_source_is_local_processing_failure() {
        let source = SourceImage::new(vec![0xff, 0xd8, 0x00]);
        let err = apply_local_style(&source, &StyleId::Cartoon1).expect_err("bad jpeg");
        assert!(matches!(err, PipelineError::LocalProcessingFailed(_)));
    }
}
