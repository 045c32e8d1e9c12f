use std::io::Cursor;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageReader;
use serde_json::{json, Map, Value};
use toonify_contracts::events::{payload, EventKind, EventWriter};
use toonify_contracts::styles::{select_prompt, StyleId};
use tracing::{error, info, warn};

pub mod canvas;
pub mod qr;
pub mod recipes;
pub mod remote;
pub mod source;
pub mod store;
pub mod watermark;

pub use canvas::{resize_to_canonical, TARGET_HEIGHT, TARGET_WIDTH};
pub use recipes::{apply_local_style, recipe_for, Finish, Recipe};
pub use remote::{classify_remote_failure, GeminiTransformer, RemoteConfig, RemoteTransformer};
pub use source::{sniff_mime, ImageMime, SourceImage};
pub use store::{download_name, ArtifactStore};
pub use watermark::apply_watermark;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("remote transform unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("malformed image: {0}")]
    MalformedImage(String),
    #[error("local processing failed: {0}")]
    LocalProcessingFailed(String),
    #[error("all image processing methods failed: {source}")]
    PipelineFailed {
        #[source]
        source: Box<PipelineError>,
    },
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path);
        }
        Self::Io { path, source }
    }
}

/// How a run ended. Only the three success kinds ever reach a `TransformResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    RemoteSuccess,
    LocalFallbackSuccess,
    UltimateFallbackSuccess,
    Failure(String),
}

impl PipelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteSuccess => "remote_success",
            Self::LocalFallbackSuccess => "local_fallback_success",
            Self::UltimateFallbackSuccess => "ultimate_fallback_success",
            Self::Failure(_) => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Remote,
    LocalStyle,
    Passthrough,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::LocalStyle => "local_style",
            Self::Passthrough => "passthrough",
        }
    }

    pub fn outcome(self) -> PipelineOutcome {
        match self {
            Self::Remote => PipelineOutcome::RemoteSuccess,
            Self::LocalStyle => PipelineOutcome::LocalFallbackSuccess,
            Self::Passthrough => PipelineOutcome::UltimateFallbackSuccess,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageOutput {
    pub png: Vec<u8>,
    pub recipe: Option<&'static Recipe>,
}

/// One step of the degrade chain. Each stage runs at most once per pipeline run.
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;
    fn run(&self, source: &SourceImage, style: &StyleId) -> Result<StageOutput, PipelineError>;
}

pub struct RemoteStage {
    transformer: Box<dyn RemoteTransformer>,
}

impl RemoteStage {
    pub fn new<T: RemoteTransformer + 'static>(transformer: T) -> Self {
        Self {
            transformer: Box::new(transformer),
        }
    }
}

impl Stage for RemoteStage {
    fn kind(&self) -> StageKind {
        StageKind::Remote
    }

    fn run(&self, source: &SourceImage, style: &StyleId) -> Result<StageOutput, PipelineError> {
        let prompt = select_prompt(style);
        let bytes = self.transformer.transform(source, prompt)?;
        info!(
            transformer = self.transformer.name(),
            bytes = bytes.len(),
            "remote transform returned image data"
        );
        Ok(StageOutput {
            png: resize_to_canonical(&bytes)?,
            recipe: None,
        })
    }
}

pub struct LocalStyleStage;

impl Stage for LocalStyleStage {
    fn kind(&self) -> StageKind {
        StageKind::LocalStyle
    }

    fn run(&self, source: &SourceImage, style: &StyleId) -> Result<StageOutput, PipelineError> {
        let (styled, recipe) = apply_local_style(source, style)?;
        Ok(StageOutput {
            png: resize_to_canonical(&styled)?,
            recipe: Some(recipe),
        })
    }
}

pub struct PassthroughStage;

impl Stage for PassthroughStage {
    fn kind(&self) -> StageKind {
        StageKind::Passthrough
    }

    fn run(&self, source: &SourceImage, _style: &StyleId) -> Result<StageOutput, PipelineError> {
        Ok(StageOutput {
            png: passthrough_resize(source)?,
            recipe: None,
        })
    }
}

/// Last-resort output: the untouched source, cover-fit to the canonical size.
pub fn passthrough_resize(source: &SourceImage) -> Result<Vec<u8>, PipelineError> {
    resize_to_canonical(source.bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: StageKind,
    pub cause: String,
}

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub png: Vec<u8>,
    pub outcome: PipelineOutcome,
    pub recipe: Option<&'static Recipe>,
    pub failures: Vec<StageFailure>,
}

impl TransformResult {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.png)
    }

    pub fn failures_as_json(&self) -> Vec<Map<String, Value>> {
        self.failures
            .iter()
            .map(|failure| {
                let mut row = Map::new();
                row.insert("stage".to_string(), json!(failure.stage.as_str()));
                row.insert("cause".to_string(), json!(failure.cause));
                row
            })
            .collect()
    }
}

/// Ordered degrade chain: remote, then local style recipe, then plain resize.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    events: Option<EventWriter>,
}

impl Pipeline {
    pub fn new<T: RemoteTransformer + 'static>(remote: T) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(RemoteStage::new(remote)),
            Box::new(LocalStyleStage),
            Box::new(PassthroughStage),
        ];
        Self::with_stages(stages)
    }

    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|stage| stage.kind()).collect()
    }

    pub fn run(
        &self,
        source: &SourceImage,
        style: &StyleId,
    ) -> Result<TransformResult, PipelineError> {
        let mut failures = Vec::new();
        let mut last_error = None;

        for stage in &self.stages {
            let kind = stage.kind();
            let attempt = stage
                .run(source, style)
                .and_then(|output| ensure_canonical(&output.png).map(|_| output));
            match attempt {
                Ok(output) => {
                    let outcome = kind.outcome();
                    info!(
                        outcome = outcome.as_str(),
                        style = %style,
                        recipe = output.recipe.map(|recipe| recipe.name),
                        degraded_stages = failures.len(),
                        "pipeline finished"
                    );
                    self.emit(
                        EventKind::PipelineOutcome,
                        json!({
                            "outcome": outcome.as_str(),
                            "style": style.as_str(),
                            "stage": kind.as_str(),
                            "recipe": output.recipe.map(|recipe| recipe.name),
                            "width": TARGET_WIDTH,
                            "height": TARGET_HEIGHT,
                        }),
                    );
                    return Ok(TransformResult {
                        png: output.png,
                        outcome,
                        recipe: output.recipe,
                        failures,
                    });
                }
                Err(err) => {
                    let category = match (&kind, &err) {
                        (StageKind::Remote, PipelineError::RemoteUnavailable(message)) => {
                            Some(classify_remote_failure(message))
                        }
                        _ => None,
                    };
                    warn!(
                        stage = kind.as_str(),
                        style = %style,
                        category,
                        error = %err,
                        "stage failed; falling back"
                    );
                    self.emit(
                        EventKind::StageFailed,
                        json!({
                            "stage": kind.as_str(),
                            "style": style.as_str(),
                            "category": category,
                            "error": err.to_string(),
                        }),
                    );
                    failures.push(StageFailure {
                        stage: kind,
                        cause: err.to_string(),
                    });
                    last_error = Some(err);
                }
            }
        }

        let cause = last_error.unwrap_or_else(|| {
            PipelineError::LocalProcessingFailed("no stages configured".to_string())
        });
        error!(style = %style, error = %cause, "all image processing methods failed");
        self.emit(
            EventKind::PipelineOutcome,
            json!({
                "outcome": PipelineOutcome::Failure(cause.to_string()).as_str(),
                "style": style.as_str(),
                "error": cause.to_string(),
            }),
        );
        Err(PipelineError::PipelineFailed {
            source: Box::new(cause),
        })
    }

    fn emit(&self, kind: EventKind, body: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(kind, payload(body)) {
            warn!(event = kind.as_str(), error = %err, "failed to append pipeline event");
        }
    }
}

fn ensure_canonical(png: &[u8]) -> Result<(), PipelineError> {
    let (width, height) = ImageReader::new(Cursor::new(png))
        .with_guessed_format()
        .map_err(|err| PipelineError::MalformedImage(err.to_string()))?
        .into_dimensions()
        .map_err(|err| PipelineError::MalformedImage(err.to_string()))?;
    if (width, height) != (TARGET_WIDTH, TARGET_HEIGHT) {
        return Err(PipelineError::MalformedImage(format!(
            "stage produced {width}x{height}, expected {TARGET_WIDTH}x{TARGET_HEIGHT}"
        )));
    }
    Ok(())
}
