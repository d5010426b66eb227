/*!
 * Translation engine: bounded worker pool, shared rate limiter, per-chunk
 * retry state machine, response validation, and merge-by-ID.
 *
 * The engine never fails as a whole. Each chunk independently ends up
 * translated or marked failed; the caller decides what a failed chunk means
 * (substitute the original text, record it in a recovery log, or both).
 */

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use futures::future::join_all;
use log::error;
use rand::Rng;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use unicode_segmentation::UnicodeSegmentation;

use crate::chunker::{self, Chunk};
use crate::errors::AppError;
use crate::language::Language;
use crate::logging;
use crate::providers::{ModelClient, RequestData, ResponseData, SegmentData, UsageMetadata};
use crate::subtitle::Segment;

/// Shared request rate across all workers, tokens per second.
const DEFAULT_QPS: u32 = 3;
/// Window over which worker start-ups are staggered.
const DEFAULT_RAMP_UP: Duration = Duration::from_secs(2);
/// Attempts per chunk, including the first.
const MAX_ATTEMPTS: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(20);
const JITTER_MAX_MS: u64 = 1_000;

/// Lifecycle of one chunk inside the engine, plus the engine-wide
/// cancellation terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationState {
    /// First attempt for a chunk is starting.
    Started,
    /// A retry attempt is starting.
    InProgress,
    /// The chunk merged successfully.
    Completed,
    /// The chunk gave up after its final attempt.
    Failed,
    /// The run's cancellation signal fired; emitted once after drain.
    Canceled,
}

/// Progress event for the UI layer. Events for one chunk are ordered;
/// events across chunks interleave arbitrarily.
#[derive(Debug, Clone)]
pub struct TranslationProgress {
    /// Index into the chunk sequence; `None` for the engine-wide event.
    pub chunk_index: Option<usize>,
    pub total_chunks: usize,
    pub attempt: u32,
    pub state: TranslationState,
    /// Safe message of the error that caused a retry or failure.
    pub error: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(TranslationProgress) + Send + Sync>;

/// Orchestrates chunked translation against a [`ModelClient`].
pub struct Translator {
    client: Arc<dyn ModelClient>,
    chunk_size: usize,
    context_size: usize,
    concurrency: usize,
    validate_cpl: bool,
    prompt_cpl: bool,
    names_mapping: BTreeMap<String, String>,
    src_lang: &'static Language,
    tgt_lang: &'static Language,
    usage: Mutex<UsageMetadata>,
    qps: u32,
    ramp_up: Duration,
}

struct EngineShared {
    queue: Mutex<VecDeque<usize>>,
    translated: Mutex<Vec<Option<Vec<Segment>>>>,
    failed: Mutex<Vec<bool>>,
    processed: Mutex<Vec<bool>>,
    limiter: RateLimiter,
}

struct EngineOutcome {
    translated: Vec<Option<Vec<Segment>>>,
    failed: Vec<bool>,
    total_chunks: usize,
}

impl Translator {
    pub fn new(
        client: Arc<dyn ModelClient>,
        chunk_size: usize,
        context_size: usize,
        concurrency: usize,
        validate_cpl: bool,
        src_lang: &'static Language,
        tgt_lang: &'static Language,
    ) -> anyhow::Result<Self> {
        if chunk_size == 0 {
            return Err(anyhow!("chunk size must be greater than 0"));
        }
        if concurrency == 0 {
            return Err(anyhow!("concurrency must be greater than 0"));
        }
        Ok(Self {
            client,
            chunk_size,
            context_size,
            concurrency,
            validate_cpl,
            prompt_cpl: true,
            names_mapping: BTreeMap::new(),
            src_lang,
            tgt_lang,
            usage: Mutex::new(UsageMetadata::default()),
            qps: DEFAULT_QPS,
            ramp_up: DEFAULT_RAMP_UP,
        })
    }

    /// Enable or disable the CPL directive in the system prompt.
    pub fn set_prompt_cpl(&mut self, enabled: bool) {
        self.prompt_cpl = enabled;
    }

    /// Set the character-name dictionary injected into the prompt.
    pub fn set_names_mapping(&mut self, mapping: BTreeMap<String, String>) {
        self.names_mapping = mapping;
    }

    /// Override rate limiting and ramp-up. A zero QPS bypasses the limiter.
    pub fn set_rate_limit(&mut self, qps: u32, ramp_up: Duration) {
        self.qps = qps;
        self.ramp_up = ramp_up;
    }

    /// Total token usage accumulated so far, across all workers.
    pub fn usage(&self) -> UsageMetadata {
        *self.usage.lock().unwrap()
    }

    /// Translate the whole document. Chunks whose every attempt failed keep
    /// their original (untranslated) segments in the output and are listed
    /// in the returned failed-chunk indices.
    pub async fn translate_document(
        &self,
        cancel: &CancellationToken,
        segments: &[Segment],
        on_progress: Option<&ProgressCallback>,
    ) -> (Vec<Segment>, Vec<usize>) {
        let outcome = self.translate_engine(cancel, segments, None, on_progress).await;

        let mut failed = outcome.failed;
        let mut all = Vec::with_capacity(segments.len());
        for i in 0..outcome.total_chunks {
            match &outcome.translated[i] {
                Some(chunk) => all.extend(chunk.iter().cloned()),
                None => {
                    failed[i] = true;
                    all.extend(self.target_range(segments, i).iter().cloned());
                }
            }
        }

        (all, marked_indices(&failed))
    }

    /// Translate only the given chunk indices. The returned list is the
    /// input with successful chunk slices overwritten; failed chunks leave
    /// the original slice untouched.
    pub async fn translate_chunks(
        &self,
        cancel: &CancellationToken,
        segments: &[Segment],
        chunk_indices: &[usize],
        on_progress: Option<&ProgressCallback>,
    ) -> (Vec<Segment>, Vec<usize>) {
        let outcome = self
            .translate_engine(cancel, segments, Some(chunk_indices), on_progress)
            .await;

        let mut out = segments.to_vec();
        for (i, translated) in outcome.translated.iter().enumerate() {
            let Some(chunk) = translated else { continue };
            let start = i * self.chunk_size;
            for (j, seg) in chunk.iter().enumerate() {
                if start + j < out.len() {
                    out[start + j] = seg.clone();
                }
            }
        }

        (out, marked_indices(&outcome.failed))
    }

    fn target_range<'a>(&self, segments: &'a [Segment], chunk_index: usize) -> &'a [Segment] {
        let start = chunk_index * self.chunk_size;
        let end = (start + self.chunk_size).min(segments.len());
        &segments[start..end]
    }

    async fn translate_engine(
        &self,
        cancel: &CancellationToken,
        segments: &[Segment],
        chunk_indices: Option<&[usize]>,
        on_progress: Option<&ProgressCallback>,
    ) -> EngineOutcome {
        self.apply_system_instruction();

        let chunks = chunker::split_into_chunks(segments, self.chunk_size, self.context_size);
        let total = chunks.len();

        let to_translate: HashSet<usize> = match chunk_indices {
            None => (0..total).collect(),
            Some(list) => list.iter().copied().filter(|&i| i < total).collect(),
        };
        let queue: VecDeque<usize> = (0..total).filter(|i| to_translate.contains(i)).collect();

        let shared = EngineShared {
            queue: Mutex::new(queue),
            translated: Mutex::new(vec![None; total]),
            failed: Mutex::new(vec![false; total]),
            processed: Mutex::new(vec![false; total]),
            limiter: RateLimiter::new(self.qps),
        };

        let workers =
            (0..self.concurrency).map(|w| self.worker_loop(w, cancel, &chunks, &shared, on_progress));
        join_all(workers).await;

        if cancel.is_cancelled() {
            if let Some(cb) = on_progress {
                cb(TranslationProgress {
                    chunk_index: None,
                    total_chunks: total,
                    attempt: 0,
                    state: TranslationState::Canceled,
                    error: Some("canceled".to_string()),
                });
            }
        }

        let mut failed = shared.failed.into_inner().unwrap();
        let processed = shared.processed.into_inner().unwrap();
        for &idx in &to_translate {
            if !processed[idx] {
                failed[idx] = true;
            }
        }

        EngineOutcome {
            translated: shared.translated.into_inner().unwrap(),
            failed,
            total_chunks: total,
        }
    }

    async fn worker_loop(
        &self,
        worker: usize,
        cancel: &CancellationToken,
        chunks: &[Chunk<'_>],
        shared: &EngineShared,
        on_progress: Option<&ProgressCallback>,
    ) {
        if let Some(delay) = ramp_delay(worker, self.concurrency, self.ramp_up) {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = time::sleep(delay) => {}
            }
        }

        loop {
            if cancel.is_cancelled() {
                return;
            }
            let next = shared.queue.lock().unwrap().pop_front();
            let Some(index) = next else { return };

            let canceled = self
                .process_chunk(index, cancel, &chunks[index], shared, chunks.len(), on_progress)
                .await;
            if canceled {
                return;
            }
        }
    }

    /// Run the per-chunk attempt state machine. Returns true when the worker
    /// observed cancellation and must exit without marking the chunk.
    async fn process_chunk(
        &self,
        index: usize,
        cancel: &CancellationToken,
        chunk: &Chunk<'_>,
        shared: &EngineShared,
        total: usize,
        on_progress: Option<&ProgressCallback>,
    ) -> bool {
        let mut last_err: Option<AppError> = None;
        let mut attempts_used = 0;

        for attempt in 1..=MAX_ATTEMPTS {
            attempts_used = attempt;
            if let Some(cb) = on_progress {
                cb(TranslationProgress {
                    chunk_index: Some(index),
                    total_chunks: total,
                    attempt,
                    state: if attempt == 1 {
                        TranslationState::Started
                    } else {
                        TranslationState::InProgress
                    },
                    error: last_err.as_ref().map(|e| e.safe_message().to_string()),
                });
            }

            if !shared.limiter.acquire(cancel).await {
                return true;
            }
            if cancel.is_cancelled() {
                return true;
            }

            let request = self.prepare_request(chunk);
            let err = match self.client.translate(cancel, &request).await {
                Ok(resp) => {
                    self.usage.lock().unwrap().add(&resp.usage);
                    match self.check_and_merge(chunk, &resp) {
                        Ok(translated) => {
                            shared.translated.lock().unwrap()[index] = Some(translated);
                            shared.processed.lock().unwrap()[index] = true;
                            if let Some(cb) = on_progress {
                                cb(TranslationProgress {
                                    chunk_index: Some(index),
                                    total_chunks: total,
                                    attempt,
                                    state: TranslationState::Completed,
                                    error: None,
                                });
                            }
                            return false;
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            if cancel.is_cancelled() {
                return true;
            }

            match retry_decision(&err, attempt) {
                Some(backoff) => {
                    last_err = Some(err);
                    tokio::select! {
                        _ = cancel.cancelled() => return true,
                        _ = time::sleep(backoff) => {}
                    }
                }
                None => {
                    last_err = Some(err);
                    break;
                }
            }
        }

        let err = last_err.expect("a chunk cannot fail without an error");
        shared.failed.lock().unwrap()[index] = true;
        shared.processed.lock().unwrap()[index] = true;
        if let Some(cb) = on_progress {
            cb(TranslationProgress {
                chunk_index: Some(index),
                total_chunks: total,
                attempt: attempts_used,
                state: TranslationState::Failed,
                error: Some(err.safe_message().to_string()),
            });
        }
        let detail = err
            .cause()
            .map(logging::redact_error)
            .unwrap_or_default();
        if attempts_used >= MAX_ATTEMPTS && err.is_retryable() {
            error!(
                "Chunk failed after maximum retries: index={} attempts={} error={} detail={}",
                index, attempts_used, err, detail
            );
        } else {
            error!(
                "Chunk failed without retry: index={} attempts={} error={} detail={}",
                index, attempts_used, err, detail
            );
        }
        false
    }

    fn prepare_request(&self, chunk: &Chunk<'_>) -> RequestData {
        RequestData {
            context_before: to_segment_data(chunk.before),
            target: to_segment_data(chunk.target),
            context_after: to_segment_data(chunk.after),
        }
    }

    fn check_and_merge(&self, chunk: &Chunk<'_>, resp: &ResponseData) -> Result<Vec<Segment>, AppError> {
        if self.validate_cpl {
            self.validate_response(resp)?;
        }
        self.merge_results(chunk.target, resp)
    }

    /// Reject any output line longer than 1.5 times the target CPL,
    /// measured in extended grapheme clusters.
    fn validate_response(&self, resp: &ResponseData) -> Result<(), AppError> {
        let limit = self.tgt_lang.default_cpl as f64 * 1.5;
        for tr in &resp.translations {
            let c1 = tr.line1.graphemes(true).count();
            if c1 as f64 > limit {
                return Err(AppError::validation(anyhow!(
                    "line 1 too long: {} chars (max {:.0}) for ID {}",
                    c1,
                    limit,
                    tr.id
                )));
            }
            if !tr.line2.is_empty() {
                let c2 = tr.line2.graphemes(true).count();
                if c2 as f64 > limit {
                    return Err(AppError::validation(anyhow!(
                        "line 2 too long: {} chars (max {:.0}) for ID {}",
                        c2,
                        limit,
                        tr.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Splice model output over the target window by ID, rejecting
    /// duplicated, hallucinated, or missing IDs and empty translations.
    fn merge_results(&self, original: &[Segment], resp: &ResponseData) -> Result<Vec<Segment>, AppError> {
        let expected: HashSet<usize> = original.iter().map(|s| s.id).collect();

        let mut by_id: HashMap<usize, &crate::providers::TranslatedSegment> = HashMap::new();
        for tr in &resp.translations {
            if by_id.contains_key(&tr.id) {
                return Err(AppError::validation(anyhow!(
                    "duplicate translation ID detected in model output: {}",
                    tr.id
                )));
            }
            if !expected.contains(&tr.id) {
                return Err(AppError::validation(anyhow!(
                    "unexpected translation ID (hallucination) from model: {}",
                    tr.id
                )));
            }
            by_id.insert(tr.id, tr);
        }

        if by_id.len() != original.len() {
            return Err(AppError::validation(anyhow!(
                "translation count mismatch: expected {}, got {}",
                original.len(),
                by_id.len()
            )));
        }

        let mut results = Vec::with_capacity(original.len());
        for orig in original {
            let tr = by_id[&orig.id];
            if tr.line1.is_empty() && tr.line2.is_empty() && !orig.lines.is_empty() {
                return Err(AppError::validation(anyhow!(
                    "hallucination detected: empty translation for segment ID {}",
                    orig.id
                )));
            }
            results.push(Segment::new(
                orig.id,
                orig.start_time.clone(),
                orig.end_time.clone(),
                normalize_lines(&[&tr.line1, &tr.line2]),
            ));
        }
        Ok(results)
    }

    fn apply_system_instruction(&self) {
        let mut prompt = system_prompt(
            self.src_lang.name,
            self.tgt_lang.name,
            self.tgt_lang.default_cpl,
            self.prompt_cpl,
        );

        if !self.names_mapping.is_empty() {
            prompt.push_str("\n\nCRITICAL: The following character names MUST be translated as specified:\n");
            for (src, tgt) in &self.names_mapping {
                prompt.push_str(&format!("- {} -> {}\n", src, tgt));
            }
        }

        self.client.set_system_instruction(&prompt);
    }
}

/// Split text on both literal `\n` sequences and real newlines, trimming
/// each resulting physical line and dropping empties.
fn normalize_lines(lines: &[&str]) -> Vec<String> {
    let mut result = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let normalized = line.replace("\\n", "\n");
        for part in normalized.split('\n') {
            let trimmed = part.trim();
            if !trimmed.is_empty() {
                result.push(trimmed.to_string());
            }
        }
    }
    result
}

fn to_segment_data(segments: &[Segment]) -> Vec<SegmentData> {
    segments
        .iter()
        .map(|s| SegmentData { id: s.id, lines: s.lines.clone() })
        .collect()
}

fn marked_indices(marks: &[bool]) -> Vec<usize> {
    marks
        .iter()
        .enumerate()
        .filter(|(_, &m)| m)
        .map(|(i, _)| i)
        .collect()
}

/// Build the language-pair system prompt.
pub fn system_prompt(source_name: &str, target_name: &str, cpl: u32, enforce_cpl: bool) -> String {
    let line_guidance = if enforce_cpl {
        format!(
            "- The output MUST be a JSON object with a 'translations' field, containing an array of objects.\n\
             - Each object in the array must have:\n  \
             - 'id': The ID from the input segment.\n  \
             - 'line1': Ensure the translated text is **strictly {cpl} characters or less (including spaces)**.\n  \
             - 'line2': Use this if the text exceeds the character limit for a single line or if a natural line break is appropriate. If provided, this line must also be **strictly {cpl} characters or less (including spaces)**.\n\
             - Respond ONLY with the JSON object.\n"
        )
    } else {
        "- The output MUST be a JSON object with a 'translations' field, containing an array of objects.\n\
         - Each object in the array must have:\n  \
         - 'id': The ID from the input segment.\n  \
         - 'line1': The main subtitle line.\n  \
         - 'line2': Optional; use only when a second line improves readability or a natural line break is needed. Do not repeat line1.\n\
         - Respond ONLY with the JSON object.\n"
            .to_string()
    };

    format!(
        "You are a professional {source_name} to {target_name} translator specializing in subtitles.\n\
         Translate the provided {source_name} subtitle segments into {target_name}.\n\
         \n\
         1. Input Structure:\n\
         - The input is provided in JSON format with 'context_before', 'target', and 'context_after'.\n\
         - 'target': Contains the segments you must translate.\n\
         - 'context_before' and 'context_after': Provided for context only. Do NOT translate them or include them in the output.\n\
         \n\
         2. Output Structure:\n\
         {line_guidance}\
         3. Rules:\n\
         - Maintain the original tone and context.\n\
         - Follow **Standard Cinematic Subtitle Punctuation** for {target_name}.\n\
         - Never use '/' as a substitute for a line break.\n\
         - Write ONLY the {target_name} translation; do not include the {source_name} source text."
    )
}

/// Whether to retry after `err` on the given attempt, and for how long to
/// back off first. Backoff doubles per attempt, doubles again for rate
/// limits, clamps at the maximum, and carries uniform jitter.
fn retry_decision(err: &AppError, attempt: u32) -> Option<Duration> {
    if attempt >= MAX_ATTEMPTS {
        return None;
    }
    if !err.is_retryable() {
        return None;
    }

    let mut backoff = BACKOFF_BASE * 2u32.pow(attempt - 1);
    if err.is_rate_limit() {
        backoff *= 2;
    }
    if backoff > BACKOFF_MAX {
        backoff = BACKOFF_MAX;
    }
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MAX_MS));
    Some(backoff + jitter)
}

/// Delay before worker `w` takes its first rate token, staggering the
/// initial burst without affecting steady-state throughput.
fn ramp_delay(worker: usize, concurrency: usize, ramp: Duration) -> Option<Duration> {
    if ramp.is_zero() || concurrency <= 1 || worker == 0 {
        return None;
    }
    Some(ramp * worker as u32 / (concurrency as u32 - 1))
}

struct RateLimiter {
    interval: Option<tokio::sync::Mutex<time::Interval>>,
}

impl RateLimiter {
    fn new(qps: u32) -> Self {
        if qps == 0 {
            return Self { interval: None };
        }
        let mut interval = time::interval(Duration::from_secs(1) / qps);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval: Some(tokio::sync::Mutex::new(interval)),
        }
    }

    /// Take one token. Returns false when the run was canceled while waiting.
    async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let Some(interval) = &self.interval else {
            return true;
        };
        let mut guard = tokio::select! {
            _ = cancel.cancelled() => return false,
            guard = interval.lock() => guard,
        };
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = guard.tick() => true,
        }
    }
}
