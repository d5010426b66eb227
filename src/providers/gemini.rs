/*!
 * Gemini client for the `generateContent` REST endpoint.
 *
 * The request embeds the chunk document as JSON text and asks for a JSON
 * response MIME type; the reply's first text part is parsed back into
 * [`ResponseData`]. A bare top-level array is accepted as if it were the
 * `translations` field. HTTP failures are classified into retryable and
 * terminal kinds with safe messages; response bodies are capped while
 * streaming to bound memory.
 */

use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, ErrorKind};

use super::{ModelClient, RequestData, ResponseData, TranslatedSegment, UsageMetadata};

/// Upper bound for one model round-trip. Generation can be slow on large
/// chunks; anything beyond this is treated as a transient failure.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Response bodies larger than this are rejected.
pub const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// HTTP client for a single Gemini model.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    system_instruction: RwLock<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ContentPayload<'a>>,
    contents: Vec<ContentPayload<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct ContentPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig<'a> {
    response_mime_type: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u64,
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    translations: Vec<TranslatedSegment>,
}

impl GeminiClient {
    /// Create a client for the public endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, model, DEFAULT_ENDPOINT)
    }

    /// Create a client against a custom endpoint (tests, proxies).
    pub fn with_endpoint(
        api_key: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            system_instruction: RwLock::new(String::new()),
        }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }

    async fn send_request(&self, request: &RequestData) -> Result<ResponseData, AppError> {
        let request_json = serde_json::to_string(request)
            .map_err(|e| AppError::validation(anyhow!(e).context("failed to encode request")))?;

        let system_instruction = {
            let guard = self
                .system_instruction
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.clone()
        };

        let payload = GenerateRequest {
            system_instruction: (!system_instruction.is_empty()).then(|| ContentPayload {
                role: None,
                parts: vec![TextPart { text: &system_instruction }],
            }),
            contents: vec![ContentPayload {
                role: Some("user"),
                parts: vec![TextPart { text: &request_json }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(self.api_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let body = read_capped_body(response).await?;

        if !status.is_success() {
            return Err(classify_status(status, &body, &self.model));
        }

        let parsed: GenerateResponse = serde_json::from_slice(&body).map_err(|e| {
            AppError::validation(anyhow!(e).context("failed to decode model response envelope"))
        })?;

        let text = extract_response_text(&parsed)?;
        let translations = parse_translations(&text)?;

        let usage = match parsed.usage_metadata {
            Some(u) => UsageMetadata {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
                call_count: 1,
            },
            None => UsageMetadata { call_count: 1, ..Default::default() },
        };

        Ok(ResponseData { translations, usage })
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        request: &RequestData,
    ) -> Result<ResponseData, AppError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AppError::transient(anyhow!("request canceled"))),
            result = self.send_request(request) => result,
        }
    }

    fn set_system_instruction(&self, prompt: &str) {
        let mut guard = self
            .system_instruction
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = prompt.to_string();
    }
}

async fn read_capped_body(mut response: reqwest::Response) -> Result<Vec<u8>, AppError> {
    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_BYTES as u64 {
            return Err(AppError::transient(anyhow!(
                "response body too large (limit {} bytes)",
                MAX_RESPONSE_BYTES
            )));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(classify_transport_error)? {
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(AppError::transient(anyhow!(
                "response body too large (limit {} bytes)",
                MAX_RESPONSE_BYTES
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn classify_transport_error(err: reqwest::Error) -> AppError {
    // DNS, socket, TLS, timeout: all worth retrying.
    AppError::new(
        ErrorKind::Transient,
        "Model request failed due to a temporary network error.",
        anyhow!(err).context("gemini request transport failure"),
    )
}

fn classify_status(status: StatusCode, body: &[u8], model: &str) -> AppError {
    let body_text = String::from_utf8_lossy(body).into_owned();
    let cause = anyhow!("gemini generate content failed: status={} body={}", status, body_text);

    match status.as_u16() {
        404 => AppError::new(
            ErrorKind::BadRequest,
            format!("Model not found or no access: {} (404).", model),
            cause,
        ),
        400 => AppError::new(ErrorKind::BadRequest, "Model request rejected (400).", cause),
        401 | 403 => AppError::new(
            ErrorKind::Auth,
            format!("Model authentication/authorization failed ({}).", status.as_u16()),
            cause,
        ),
        429 => AppError::new(
            ErrorKind::RateLimit,
            "Model rate limit exceeded (429). Please try again later.",
            cause,
        ),
        code if code >= 500 => AppError::new(
            ErrorKind::Transient,
            format!("Model service temporary error ({}). Please retry.", code),
            cause,
        ),
        code => AppError::new(ErrorKind::BadRequest, format!("Model API error ({}).", code), cause),
    }
}

fn extract_response_text(resp: &GenerateResponse) -> Result<String, AppError> {
    if resp.candidates.is_empty() {
        return Err(AppError::validation(anyhow!("no candidates returned by model")));
    }
    for candidate in &resp.candidates {
        let Some(content) = &candidate.content else { continue };
        let combined: String = content.parts.iter().map(|p| p.text.as_str()).collect();
        if !combined.is_empty() {
            return Ok(combined);
        }
    }
    Err(AppError::validation(anyhow!("no text parts found in model response")))
}

/// Parse `{"translations": [...]}`; a bare array is accepted as a fallback.
fn parse_translations(text: &str) -> Result<Vec<TranslatedSegment>, AppError> {
    if let Ok(envelope) = serde_json::from_str::<ResponseEnvelope>(text) {
        return Ok(envelope.translations);
    }
    serde_json::from_str::<Vec<TranslatedSegment>>(text).map_err(|e| {
        AppError::validation(
            anyhow!(e).context("failed to decode translations from model response"),
        )
    })
}
