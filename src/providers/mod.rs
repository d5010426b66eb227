/*!
 * Model provider abstraction.
 *
 * The translation engine drives a remote generative model through the
 * `ModelClient` capability: one JSON round-trip per chunk plus a mutable
 * system instruction. Concrete clients classify their failures into
 * [`crate::errors::ErrorKind`] so retry policy stays a pure function of the
 * error.
 */

pub mod gemini;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::AppError;

/// One subtitle segment on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentData {
    pub id: usize,
    pub lines: Vec<String>,
}

/// The document sent to the model: context windows are reference only, the
/// target window is what must come back translated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestData {
    pub context_before: Vec<SegmentData>,
    pub target: Vec<SegmentData>,
    pub context_after: Vec<SegmentData>,
}

/// A single translated segment as returned by the model.
///
/// `line1`/`line2` may still contain literal `\n` sequences; normalisation
/// happens at merge time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslatedSegment {
    pub id: usize,
    #[serde(default)]
    pub line1: String,
    #[serde(default)]
    pub line2: String,
}

/// Token usage accumulated across model calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageMetadata {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Number of model calls that produced a response.
    pub call_count: u64,
}

impl UsageMetadata {
    pub fn add(&mut self, other: &UsageMetadata) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.call_count += other.call_count;
    }
}

/// The model's answer for one request.
#[derive(Debug, Clone, Default)]
pub struct ResponseData {
    pub translations: Vec<TranslatedSegment>,
    pub usage: UsageMetadata,
}

/// Capability needed by the translation engine.
///
/// Implementations must be cheap to share across workers; the engine calls
/// `translate` concurrently from every worker in the pool.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One request/response round-trip. Implementations observe the
    /// cancellation token while waiting on the wire.
    async fn translate(
        &self,
        cancel: &CancellationToken,
        request: &RequestData,
    ) -> Result<ResponseData, AppError>;

    /// Replace the system prompt used for subsequent requests.
    fn set_system_instruction(&self, prompt: &str);
}
