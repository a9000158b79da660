//! Annotation backend using the Gemini `generateContent` REST API.
//!
//! Each tile is one request carrying the two JPEG crops as inline base64
//! parts. The model is asked for a JSON array matching
//! [`prompt::response_schema`](super::prompt::response_schema).

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::prompt::{USER_PROMPT, response_schema, system_instruction};
use super::{AnnotationRequest, AnnotationResponse, Annotator, EncodedCrop};
use crate::config::GeminiConfig;
use crate::error::AnnotationError;

/// Gemini HTTP client
pub struct GeminiAnnotator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
    thinking_budget: u32,
    language: String,
    coordinate_range: f64,
}

impl GeminiAnnotator {
    pub fn new(config: &GeminiConfig, coordinate_range: f64) -> Result<Self, AnnotationError> {
        let api_key = config.resolve_api_key().ok_or(AnnotationError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnnotationError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
            thinking_budget: config.thinking_budget,
            language: config.language.clone(),
            coordinate_range,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_body(&self, request: &AnnotationRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(system_instruction(request.mode, &self.language, self.coordinate_range))],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![
                    Part::text(USER_PROMPT.to_string()),
                    Part::inline(&request.before),
                    Part::inline(&request.after),
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: response_schema(),
                thinking_config: ThinkingConfig {
                    thinking_budget: self.thinking_budget,
                },
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn inline(crop: &EncodedCrop) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: crop.mime_type,
                data: base64::engine::general_purpose::STANDARD.encode(&crop.data),
            }),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
    thinking_config: ThinkingConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

/// Response body of `generateContent`
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    /// Thought summaries are not part of the answer
    #[serde(default)]
    thought: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u64>,
}

impl GenerateContentResponse {
    fn answer_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought.unwrap_or(false))
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl Annotator for GeminiAnnotator {
    async fn annotate(&self, request: &AnnotationRequest) -> Result<AnnotationResponse, AnnotationError> {
        tracing::debug!(
            model = %self.model,
            tile_index = request.tile_index,
            before_bytes = request.before.data.len(),
            after_bytes = request.after.data.len(),
            "sending annotation request"
        );
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    AnnotationError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    AnnotationError::Timeout(self.timeout_secs)
                } else {
                    AnnotationError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnnotationError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AnnotationError::ResponseParsing(e.to_string()))?;

        let tokens_used = parsed.usage_metadata.as_ref().and_then(|u| u.total_token_count);
        let raw_text = parsed.answer_text();

        tracing::debug!(
            model = %self.model,
            tile_index = request.tile_index,
            elapsed_ms = %start.elapsed().as_millis(),
            tokens = tokens_used.unwrap_or(0),
            answer_len = raw_text.len(),
            "annotation response received"
        );

        Ok(AnnotationResponse { raw_text, tokens_used })
    }
}
