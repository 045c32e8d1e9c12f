use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use toonify_contracts::events::{payload, EventKind, EventWriter};
use toonify_contracts::runs::{write_record, ImageRecord};
use toonify_contracts::styles::{StyleId, StyleRegistry};
use toonify_engine::qr::{download_qr_base64, DEFAULT_FRONTEND_URL};
use toonify_engine::{
    apply_watermark, download_name, recipe_for, ArtifactStore, GeminiTransformer, Pipeline,
    RemoteConfig, SourceImage,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "toonify=info";

#[derive(Debug, Parser)]
#[command(name = "toonify", version, about = "Cartoonize portraits with graceful fallback")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Process(ProcessArgs),
    Styles,
    Locate(LocateArgs),
}

#[derive(Debug, Parser)]
struct ProcessArgs {
    #[arg(long, required_unless_present = "image_base64", conflicts_with = "image_base64")]
    image: Option<PathBuf>,
    /// File holding a base64 image, optionally with a data-URI prefix.
    #[arg(long)]
    image_base64: Option<PathBuf>,
    #[arg(long, default_value = "cartoon1")]
    style: String,
    #[arg(long, default_value = ".")]
    root: PathBuf,
    #[arg(long)]
    user: Option<String>,
    /// Transparent PNG composited over the result.
    #[arg(long)]
    watermark: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    timeout: Option<f64>,
    #[arg(long)]
    frontend_url: Option<String>,
    /// Include the final PNG as base64 in the summary.
    #[arg(long)]
    emit_base64: bool,
}

#[derive(Debug, Parser)]
struct LocateArgs {
    #[arg(long, default_value = ".")]
    root: PathBuf,
    file: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("toonify error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Process(args) => {
            let config = remote_config(&args);
            let summary = process_image(&args, config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(0)
        }
        Command::Styles => {
            println!("{}", serde_json::to_string_pretty(&list_styles())?);
            Ok(0)
        }
        Command::Locate(args) => {
            println!("{}", serde_json::to_string_pretty(&locate(&args)?)?);
            Ok(0)
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // Logs go to stderr so stdout stays machine-readable JSON.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn remote_config(args: &ProcessArgs) -> RemoteConfig {
    let mut config = RemoteConfig::from_env();
    if let Some(model) = args.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        config.model = model.to_string();
    }
    if let Some(base) = args.api_base.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        config.api_base = base.trim_end_matches('/').to_string();
    }
    match args.timeout {
        Some(seconds) => config.with_timeout_secs(seconds),
        None => config,
    }
}

fn frontend_url(args: &ProcessArgs) -> String {
    args.frontend_url
        .clone()
        .or_else(|| env::var("FRONTEND_URL").ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string())
}

fn process_image(args: &ProcessArgs, config: RemoteConfig) -> Result<Value> {
    let store = ArtifactStore::new(&args.root);
    let file_name = ArtifactStore::new_artifact_name();
    let run_id = file_name.trim_end_matches(".png").to_string();

    let upload_path = intake(&store, args, &file_name)?;
    let source = SourceImage::from_path(&upload_path)?;
    let style = StyleId::parse(&args.style);

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.root.join("events.jsonl"));
    let events = EventWriter::new(&events_path, &run_id);
    let style_label = StyleRegistry::default()
        .get(&style)
        .map(|spec| spec.label.clone());
    let model = config.model.clone();

    let transformer = GeminiTransformer::new(config)?;
    let pipeline = Pipeline::new(transformer).with_events(events.clone());
    let stages: Vec<&str> = pipeline
        .stage_kinds()
        .into_iter()
        .map(|kind| kind.as_str())
        .collect();

    events.emit(
        EventKind::RunStarted,
        payload(json!({
            "style": style.as_str(),
            "known_style": style.is_known(),
            "style_label": style_label,
            "stages": stages,
            "source_mime": source.mime().as_str(),
            "source_bytes": source.bytes().len(),
            "model": model,
        })),
    )?;
    info!(run_id = %run_id, style = %style, stages = ?stages, "processing image");

    let result = pipeline.run(&source, &style)?;

    let output_path = store.save_output(&file_name, &result.png)?;

    let mut watermarked = false;
    if let Some(overlay) = args.watermark.as_deref() {
        match apply_watermark(&output_path, overlay, &output_path) {
            Ok(()) => {
                watermarked = true;
                events.emit(
                    EventKind::WatermarkApplied,
                    payload(json!({ "overlay": overlay.display().to_string() })),
                )?;
            }
            Err(err) => {
                warn!(error = %err, overlay = %overlay.display(), "watermark failed; keeping unmarked output");
                events.emit(
                    EventKind::WatermarkFailed,
                    payload(json!({
                        "overlay": overlay.display().to_string(),
                        "error": err.to_string(),
                    })),
                )?;
            }
        }
    }

    let mut record = ImageRecord::new(
        &run_id,
        args.user.clone(),
        store.relative(&upload_path),
        store.relative(&output_path),
        style.as_str(),
        result.outcome.as_str(),
        result.recipe.map(|recipe| recipe.name.to_string()),
        source.sha256_hex(),
    );
    record.degraded_stages = result.failures_as_json();
    record.watermarked = watermarked;
    let record_path = store.record_path(&file_name);
    write_record(&record_path, &record)?;
    events.emit(
        EventKind::RecordWritten,
        payload(json!({ "path": store.relative(&record_path) })),
    )?;

    let qr_code = download_qr_base64(&frontend_url(args), &file_name)?;

    let mut summary = json!({
        "success": true,
        "run_id": run_id,
        "processed_image": record.processed_image,
        "outcome": record.outcome,
        "recipe": record.recipe,
        "degraded_stages": record.degraded_stages,
        "watermarked": watermarked,
        "record": store.relative(&record_path),
        "qr_code": qr_code,
    });
    if args.emit_base64 {
        let final_png = store.read(&output_path)?;
        summary["image_base64"] = Value::String(BASE64.encode(final_png));
    }
    Ok(summary)
}

fn intake(store: &ArtifactStore, args: &ProcessArgs, file_name: &str) -> Result<PathBuf> {
    if let Some(path) = args.image.as_deref() {
        let bytes = read_input(path)?;
        return Ok(store.save_upload(file_name, &bytes)?);
    }
    let Some(path) = args.image_base64.as_deref() else {
        anyhow::bail!("one of --image or --image-base64 is required");
    };
    let encoded = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    Ok(store.save_base64_upload(file_name, &encoded)?)
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed reading {}", path.display()))
}

fn list_styles() -> Value {
    let registry = StyleRegistry::default();
    let rows: Vec<Value> = registry
        .list()
        .map(|spec| {
            json!({
                "id": spec.id.as_str(),
                "label": spec.label,
                "prompt": spec.prompt,
                "recipe": recipe_for(&spec.id).name,
            })
        })
        .collect();
    json!({ "styles": rows })
}

fn locate(args: &LocateArgs) -> Result<Value> {
    let store = ArtifactStore::new(&args.root);
    let path = store.locate_output(&args.file)?;
    Ok(json!({
        "path": path.display().to_string(),
        "download_name": download_name(&args.file),
    }))
}
