use std::fs;
use std::path::{Path, PathBuf};

use image::imageops;
use tracing::debug;

use crate::canvas::encode_png;
use crate::PipelineError;

/// Composites `overlay` onto `input` at the top-left corner and writes PNG to
/// `output`. When `input` and `output` are the same file the result is staged
/// as `temp_<name>` next to it and renamed over the original.
pub fn apply_watermark(input: &Path, overlay: &Path, output: &Path) -> Result<(), PipelineError> {
    let mut base = load(input)?.into_rgba8();
    let mark = load(overlay)?.into_rgba8();
    imageops::overlay(&mut base, &mark, 0, 0);
    let png = encode_png(&image::DynamicImage::ImageRgba8(base))?;

    if input != output {
        return write_file(output, &png);
    }
    let staged = staging_path(output);
    write_file(&staged, &png)?;
    fs::rename(&staged, output).map_err(|err| {
        let _ = fs::remove_file(&staged);
        PipelineError::io(output, err)
    })?;
    debug!(path = %output.display(), "watermark applied in place");
    Ok(())
}

fn load(path: &Path) -> Result<image::DynamicImage, PipelineError> {
    let bytes = fs::read(path).map_err(|err| PipelineError::io(path, err))?;
    image::load_from_memory(&bytes)
        .map_err(|err| PipelineError::MalformedImage(format!("{}: {err}", path.display())))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
    }
    fs::write(path, bytes).map_err(|err| PipelineError::io(path, err))
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("temp_{name}"))
}
