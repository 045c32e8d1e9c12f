use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use uuid::Uuid;

use crate::PipelineError;

pub const UPLOADS_DIR: &str = "uploads";
pub const OUTPUTS_DIR: &str = "outputs";

/// On-disk layout for one deployment: `<root>/uploads` holds sources,
/// `<root>/outputs` holds processed images and their records.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join(OUTPUTS_DIR)
    }

    /// Fresh `<uuid>.png` name; one per run so concurrent runs never collide.
    pub fn new_artifact_name() -> String {
        format!("{}.png", Uuid::new_v4())
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>, PipelineError> {
        fs::read(path).map_err(|err| PipelineError::io(path, err))
    }

    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
        fs::write(path, bytes).map_err(|err| PipelineError::io(path, err))
    }

    pub fn save_upload(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, PipelineError> {
        let path = self.uploads_dir().join(name);
        self.write(&path, bytes)?;
        Ok(path)
    }

    pub fn save_base64_upload(&self, name: &str, data: &str) -> Result<PathBuf, PipelineError> {
        let bytes = decode_base64_image(data)?;
        self.save_upload(name, &bytes)
    }

    pub fn save_output(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, PipelineError> {
        let path = self.outputs_dir().join(name);
        self.write(&path, bytes)?;
        Ok(path)
    }

    pub fn record_path(&self, name: &str) -> PathBuf {
        self.outputs_dir().join(name).with_extension("json")
    }

    /// Resolves a processed image by bare file name. Anything that is not a
    /// plain name inside `outputs/` is reported as not found.
    pub fn locate_output(&self, file_name: &str) -> Result<PathBuf, PipelineError> {
        let candidate = self.outputs_dir().join(file_name);
        let plain = !file_name.is_empty()
            && Path::new(file_name).file_name().and_then(|name| name.to_str()) == Some(file_name);
        if !plain || !candidate.is_file() {
            return Err(PipelineError::NotFound(candidate));
        }
        Ok(candidate)
    }

    /// Path relative to the store root with forward slashes, as stored in records.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

pub fn download_name(file_name: &str) -> String {
    format!("cartoonized-{file_name}")
}

/// Decodes a base64 image, with or without a `data:image/<type>;base64,` prefix.
pub fn decode_base64_image(data: &str) -> Result<Vec<u8>, PipelineError> {
    let trimmed = data.trim();
    let payload = match trimmed.strip_prefix("data:image/") {
        Some(rest) => rest
            .split_once(";base64,")
            .map(|(_, payload)| payload)
            .ok_or_else(|| PipelineError::MalformedImage("data URI is not base64".to_string()))?,
        None => trimmed,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|err| PipelineError::MalformedImage(format!("invalid base64 upload: {err}")))
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;

    use super::{decode_base64_image, download_name, ArtifactStore, BASE64};
    use crate::PipelineError;

    #[test]
    fn write_creates_missing_directories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ArtifactStore::new(temp.path().join("data"));
        let path = store.save_output("a.png", b"bytes")?;
        assert!(path.starts_with(store.outputs_dir()));
        assert_eq!(store.read(&path)?, b"bytes");
        assert_eq!(store.relative(&path), "outputs/a.png");
        Ok(())
    }

    #[test]
    fn read_missing_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(temp.path());
        let err = store.read(&temp.path().join("uploads/none.png")).expect_err("missing");
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[test]
    fn artifact_names_are_unique_pngs() {
        let first = ArtifactStore::new_artifact_name();
        let second = ArtifactStore::new_artifact_name();
        assert_ne!(first, second);
        assert!(first.ends_with(".png"));
        assert_eq!(first.len(), 36 + 4);
    }

    #[test]
    fn base64_upload_strips_data_uri_prefix() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ArtifactStore::new(temp.path());
        let encoded = format!("data:image/jpeg;base64,{}", BASE64.encode(b"\xff\xd8raw"));
        let path = store.save_base64_upload("x.png", &encoded)?;
        assert_eq!(std::fs::read(path)?, b"\xff\xd8raw");
        assert_eq!(decode_base64_image(&BASE64.encode(b"plain"))?, b"plain");
        Ok(())
    }

    #[test]
    fn bad_base64_is_malformed() {
        assert!(matches!(
            decode_base64_image("data:image/png;base64,@@@"),
            Err(PipelineError::MalformedImage(_))
        ));
        assert!(matches!(
            decode_base64_image("data:image/png,rawtext"),
            Err(PipelineError::MalformedImage(_))
        ));
    }

    #[test]
    fn locate_rejects_traversal_and_missing_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ArtifactStore::new(temp.path());
        store.save_output("ok.png", b"x")?;
        std::fs::write(temp.path().join("secret.png"), b"s")?;

        assert_eq!(store.locate_output("ok.png")?, store.outputs_dir().join("ok.png"));
        assert!(matches!(store.locate_output("../secret.png"), Err(PipelineError::NotFound(_))));
        assert!(matches!(store.locate_output("missing.png"), Err(PipelineError::NotFound(_))));
        assert!(matches!(store.locate_output(""), Err(PipelineError::NotFound(_))));
        assert_eq!(download_name("ok.png"), "cartoonized-ok.png");
        Ok(())
    }

    #[test]
    fn record_path_sits_next_to_output() {
        let store = ArtifactStore::new("/srv/toonify");
        assert_eq!(
            store.record_path("abc.png"),
            std::path::PathBuf::from("/srv/toonify/outputs/abc.json")
        );
    }
}
