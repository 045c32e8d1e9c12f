use std::path::Path;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RECORD_SCHEMA_VERSION: u64 = 1;

/// Persisted metadata for one processed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    pub run_id: String,
    pub user_id: Option<String>,
    pub original_image: String,
    pub processed_image: String,
    pub style: String,
    pub outcome: String,
    pub recipe: Option<String>,
    pub source_sha256: String,
    #[serde(default)]
    pub degraded_stages: Vec<Map<String, Value>>,
    #[serde(default)]
    pub watermarked: bool,
    pub created_at: String,
}

impl ImageRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: impl Into<String>,
        user_id: Option<String>,
        original_image: impl Into<String>,
        processed_image: impl Into<String>,
        style: impl Into<String>,
        outcome: impl Into<String>,
        recipe: Option<String>,
        source_sha256: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            run_id: run_id.into(),
            user_id,
            original_image: original_image.into(),
            processed_image: processed_image.into(),
            style: style.into(),
            outcome: outcome.into(),
            recipe,
            source_sha256: source_sha256.into(),
            degraded_stages: Vec::new(),
            watermarked: false,
            created_at: now_utc_iso(),
        }
    }
}

pub fn write_record(path: &Path, record: &ImageRecord) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let payload = sanitize_payload(&serde_json::to_value(record)?);
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_record(path: &Path) -> anyhow::Result<ImageRecord> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let record = serde_json::from_str(&raw)
        .with_context(|| format!("invalid image record {}", path.display()))?;
    Ok(record)
}

// Stage failure causes can echo remote payloads; keep image data out of records.
fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(text) if looks_like_inline_image(text) => {
            Value::String("<omitted>".to_string())
        }
        Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(lowered.as_str(), "inlinedata" | "inline_data" | "data") {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

fn looks_like_inline_image(text: &str) -> bool {
    text.starts_with("data:image/") && text.contains(";base64,")
}

fn default_schema_version() -> u64 {
    RECORD_SCHEMA_VERSION
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
