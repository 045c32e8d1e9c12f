use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, Luma};
use qrcode::QrCode;

use crate::canvas::encode_png;

pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

const MODULE_PX: u32 = 8;

pub fn download_url(frontend_url: &str, file_name: &str) -> String {
    format!("{}/download/{file_name}", frontend_url.trim_end_matches('/'))
}

/// Renders `data` as a black-on-white QR code PNG with a four-module quiet zone.
pub fn qr_png(data: &str) -> Result<Vec<u8>> {
    let code = QrCode::new(data.as_bytes()).context("QR generation failed")?;
    let image = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .module_dimensions(MODULE_PX, MODULE_PX)
        .build();
    Ok(encode_png(&DynamicImage::ImageLuma8(image))?)
}

pub fn qr_png_base64(data: &str) -> Result<String> {
    Ok(BASE64.encode(qr_png(data)?))
}

/// Base64 PNG QR code pointing at the download route for `file_name`.
pub fn download_qr_base64(frontend_url: &str, file_name: &str) -> Result<String> {
    qr_png_base64(&download_url(frontend_url, file_name))
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use image::GenericImageView;

    use super::{download_qr_base64, download_url, qr_png, BASE64, MODULE_PX};

    #[test]
    fn download_url_joins_without_double_slash() {
        assert_eq!(
            download_url("http://localhost:3000", "a.png"),
            "http://localhost:3000/download/a.png"
        );
        assert_eq!(
            download_url("https://toon.example/", "b.png"),
            "https://toon.example/download/b.png"
        );
    }

    #[test]
    fn qr_png_is_square_with_white_border_and_dark_finder() -> anyhow::Result<()> {
        let png = qr_png("http://localhost:3000/download/x.png")?;
        let image = image::load_from_memory(&png)?.to_luma8();
        let (width, height) = image.dimensions();
        assert_eq!(width, height);
        assert_eq!(width % MODULE_PX, 0);
        assert_eq!(image.get_pixel(0, 0).0, [255]);
        // Top-left finder pattern starts right after the four-module quiet zone.
        let corner = 4 * MODULE_PX;
        assert_eq!(image.get_pixel(corner, corner).0, [0]);
        Ok(())
    }

    #[test]
    fn base64_payload_decodes_to_png() -> anyhow::Result<()> {
        let encoded = download_qr_base64("http://localhost:3000", "abc.png")?;
        let bytes = BASE64.decode(encoded)?;
        assert!(bytes.starts_with(&[0x89, 0x50, 0x4e, 0x47]));
        assert!(image::load_from_memory(&bytes)?.dimensions().0 > 0);
        Ok(())
    }
}
