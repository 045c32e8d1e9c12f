use std::env;
use std::time::Duration;

use base64::alphabet;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use regex::Regex;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{PipelineError, SourceImage};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_TIMEOUT_SECS: f64 = 90.0;
const API_KEY_HEADER: &str = "x-goog-api-key";

const TEXT_IMAGE_PATTERNS: [&str; 3] = [
    r"data:image/[^;]+;base64,([A-Za-z0-9+/=]+)",
    r"base64:([A-Za-z0-9+/=]+)",
    r"([A-Za-z0-9+/=]{100,})",
];

// Scraped payloads may have lost their padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// External generative-image service: given a source image and a prompt, it
/// either hands back image bytes or fails with `RemoteUnavailable`.
pub trait RemoteTransformer: Send + Sync {
    fn name(&self) -> &str;
    fn transform(&self, source: &SourceImage, prompt: &str) -> Result<Vec<u8>, PipelineError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RemoteConfig {
    pub fn from_env() -> Self {
        let timeout_s = non_empty_env("TOONIFY_REMOTE_TIMEOUT")
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: non_empty_env("TOONIFY_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            timeout: clamp_timeout(timeout_s),
        }
    }

    pub fn with_timeout_secs(mut self, seconds: f64) -> Self {
        self.timeout = clamp_timeout(seconds);
        self
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!(
            "{}/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            model_path
        )
    }
}

fn clamp_timeout(seconds: f64) -> Duration {
    let seconds = if seconds.is_finite() {
        seconds
    } else {
        DEFAULT_TIMEOUT_SECS
    };
    Duration::from_secs_f64(seconds.clamp(5.0, 300.0))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub strategy: &'static str,
}

/// One way of pulling image bytes out of a `generateContent` response.
pub trait ResponseExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, response: &Value) -> Option<ExtractedImage>;
}

/// `inlineData` / `inline_data` parts on any candidate; first decodable one wins.
pub struct InlineDataExtractor;

impl ResponseExtractor for InlineDataExtractor {
    fn name(&self) -> &'static str {
        "inline_data"
    }

    fn extract(&self, response: &Value) -> Option<ExtractedImage> {
        for part in response_parts(response) {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let Ok(bytes) = BASE64.decode(data.as_bytes()) else {
                debug!("skipping inline part with undecodable base64");
                continue;
            };
            return Some(ExtractedImage {
                bytes,
                mime_type: inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                strategy: self.name(),
            });
        }
        None
    }
}

/// Scrapes base64 image payloads out of the response's text parts.
///
/// Patterns are tried in order (data URI, `base64:` prefix, any long base64
/// run); within a pattern, matches are tried left to right. A match only
/// counts if it decodes and the bytes carry a recognizable image signature.
pub struct EmbeddedTextExtractor {
    patterns: Vec<Regex>,
}

impl EmbeddedTextExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = TEXT_IMAGE_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn scan(&self, text: &str) -> Option<Vec<u8>> {
        for pattern in &self.patterns {
            for captures in pattern.captures_iter(text) {
                let Some(found) = captures.get(1).or_else(|| captures.get(0)) else {
                    continue;
                };
                let Ok(bytes) = LENIENT_BASE64.decode(found.as_str().trim_end_matches('=')) else {
                    continue;
                };
                if image::guess_format(&bytes).is_ok() {
                    return Some(bytes);
                }
            }
        }
        None
    }
}

impl ResponseExtractor for EmbeddedTextExtractor {
    fn name(&self) -> &'static str {
        "embedded_text"
    }

    fn extract(&self, response: &Value) -> Option<ExtractedImage> {
        let text = response_text(response);
        if text.is_empty() {
            return None;
        }
        debug!(chars = text.len(), "scanning response text for image data");
        self.scan(&text).map(|bytes| ExtractedImage {
            bytes,
            mime_type: None,
            strategy: self.name(),
        })
    }
}

pub fn default_extractors() -> Result<Vec<Box<dyn ResponseExtractor>>, regex::Error> {
    let extractors: Vec<Box<dyn ResponseExtractor>> = vec![
        Box::new(InlineDataExtractor),
        Box::new(EmbeddedTextExtractor::new()?),
    ];
    Ok(extractors)
}

/// Runs the extractors in order and returns the first hit.
pub fn extract_image(
    response: &Value,
    extractors: &[Box<dyn ResponseExtractor>],
) -> Option<ExtractedImage> {
    extractors
        .iter()
        .find_map(|extractor| extractor.extract(response))
}

fn response_parts(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
}

fn response_text(response: &Value) -> String {
    response_parts(response)
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

pub struct GeminiTransformer {
    config: RemoteConfig,
    http: HttpClient,
    extractors: Vec<Box<dyn ResponseExtractor>>,
}

impl GeminiTransformer {
    pub fn new(config: RemoteConfig) -> anyhow::Result<Self> {
        Ok(Self {
            config,
            http: HttpClient::new(),
            extractors: default_extractors()?,
        })
    }

    pub fn build_payload(source: &SourceImage, prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    {
                        "inlineData": {
                            "mimeType": source.mime().as_str(),
                            "data": BASE64.encode(source.bytes()),
                        }
                    }
                ]
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
            }
        })
    }

    /// Pulls image bytes out of a parsed response body.
    pub fn image_from_response(&self, response: &Value) -> Result<ExtractedImage, PipelineError> {
        if is_empty_response(response) {
            let reason = response
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
                .map(|reason| format!("Gemini returned no candidates (blocked: {reason})"))
                .unwrap_or_else(|| "Gemini returned an empty response".to_string());
            return Err(PipelineError::RemoteUnavailable(reason));
        }
        extract_image(response, &self.extractors).ok_or_else(|| {
            PipelineError::RemoteUnavailable(
                "No image data found in Gemini response. The model may not have generated an image."
                    .to_string(),
            )
        })
    }

    fn post(&self, api_key: &str, payload: &Value) -> Result<Value, PipelineError> {
        let endpoint = self.config.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.config.timeout)
            .json(payload)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    return PipelineError::RemoteUnavailable(format!(
                        "Gemini request timed out after {:.0}s",
                        self.config.timeout.as_secs_f64()
                    ));
                }
                // Causes land in events and records; keep the endpoint out of them.
                PipelineError::RemoteUnavailable(format!(
                    "Gemini request failed: {}",
                    err.without_url()
                ))
            })?;
        response_json_or_error(response)
    }
}

impl RemoteTransformer for GeminiTransformer {
    fn name(&self) -> &str {
        "gemini"
    }

    fn transform(&self, source: &SourceImage, prompt: &str) -> Result<Vec<u8>, PipelineError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(PipelineError::RemoteUnavailable(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
            ));
        };
        info!(
            model = %self.config.model,
            mime = source.mime().as_str(),
            bytes = source.bytes().len(),
            "calling Gemini"
        );
        let payload = Self::build_payload(source, prompt);
        let response = self.post(api_key, &payload)?;
        let image = self.image_from_response(&response)?;
        info!(
            strategy = image.strategy,
            mime = image.mime_type.as_deref().unwrap_or("unknown"),
            bytes = image.bytes.len(),
            "extracted image from Gemini response"
        );
        Ok(image.bytes)
    }
}

fn is_empty_response(response: &Value) -> bool {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .map(|candidates| candidates.is_empty())
        .unwrap_or(true)
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, PipelineError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        PipelineError::RemoteUnavailable(format!("Gemini response body read failed: {err}"))
    })?;
    if !status.is_success() {
        return Err(PipelineError::RemoteUnavailable(format!(
            "Gemini request failed ({code}): {}",
            truncate_text(&body, 512)
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        PipelineError::RemoteUnavailable(format!("Gemini returned invalid JSON payload: {err}"))
    })
}

/// Coarse bucket for a remote failure message, used when logging fallbacks.
pub fn classify_remote_failure(message: &str) -> &'static str {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("api_key") || lowered.contains("api key") || lowered.contains("(401)")
        || lowered.contains("(403)")
    {
        return "credentials";
    }
    if lowered.contains("quota") || lowered.contains("limit") || lowered.contains("(429)") {
        return "quota";
    }
    if lowered.contains("timed out") || lowered.contains("request failed:") {
        return "transport";
    }
    if lowered.contains("model") {
        return "model";
    }
    "response"
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
