/*!
 * # subtrans
 *
 * A resilient batch pipeline for AI subtitle translation.
 *
 * The crate translates cue-aligned subtitle documents between natural
 * languages by driving a remote generative model, and its engineering
 * centre of gravity is everything around that call: chunked fan-out with
 * bounded concurrency, a shared rate limiter with worker ramp-up,
 * per-error retry classification, validation of model output against
 * hallucination and formatting limits, and a content-addressed recovery
 * log that lets a later run re-translate exactly the chunks that failed.
 *
 * ## Architecture
 *
 * - `subtitle`: segment model, SRT/VTT codec, preprocessing, postprocessing,
 *   and the canonical document checksum
 * - `chunker`: fixed-size batching with context windows
 * - `providers`: the model client capability, a Gemini HTTP client, and a
 *   scriptable mock
 * - `translator`: the worker-pool engine with retries, rate limiting, and
 *   merge-by-ID validation
 * - `recovery`: the on-disk session log and its lifecycle
 * - `pipeline`: the coordinators composing all of the above
 * - `language`, `errors`, `logging`, `file_utils`, `names`: supporting
 *   profiles and utilities
 */

pub mod chunker;
pub mod errors;
pub mod file_utils;
pub mod language;
pub mod logging;
pub mod names;
pub mod pipeline;
pub mod providers;
pub mod recovery;
pub mod subtitle;
pub mod translator;

pub use errors::{AppError, ErrorKind};
pub use language::{get_language, Language};
pub use pipeline::{run_repair, run_translation, Config, RepairResult, TranslationResult, TranslationStatus};
pub use providers::{ModelClient, RequestData, ResponseData, TranslatedSegment, UsageMetadata};
pub use subtitle::{Segment, SrtVttCodec, SubtitleCodec};
pub use translator::{TranslationProgress, TranslationState, Translator};
