use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageMime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }
}

/// Magic-number sniffing; anything unrecognized is treated as PNG.
pub fn sniff_mime(bytes: &[u8]) -> ImageMime {
    if bytes.starts_with(&[0xff, 0xd8]) {
        return ImageMime::Jpeg;
    }
    if bytes.starts_with(&[0x89, 0x50, 0x4e, 0x47]) {
        return ImageMime::Png;
    }
    if bytes.starts_with(b"GIF") {
        return ImageMime::Gif;
    }
    let riff_webp = bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(&b"WEBP"[..]);
    if riff_webp || bytes.starts_with(b"WEBP") {
        return ImageMime::Webp;
    }
    ImageMime::Png
}

/// The caller's image, read once and never mutated during a run.
#[derive(Debug, Clone)]
pub struct SourceImage {
    bytes: Vec<u8>,
    mime: ImageMime,
}

impl SourceImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        let mime = sniff_mime(&bytes);
        Self { bytes, mime }
    }

    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let bytes = fs::read(path).map_err(|err| PipelineError::io(path, err))?;
        Ok(Self::new(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> ImageMime {
        self.mime
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}
