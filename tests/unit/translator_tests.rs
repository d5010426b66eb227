/*!
 * Engine tests against the scriptable mock model: retry classification,
 * backoff, validation, subset runs, cancellation, and usage accounting.
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use subtrans::errors::ErrorKind;
use subtrans::language::get_language;
use subtrans::providers::mock::{MockModel, MockOutcome};
use subtrans::providers::UsageMetadata;
use subtrans::subtitle::Segment;
use subtrans::translator::{ProgressCallback, TranslationState, Translator};

use crate::common::tr;

fn segments(n: usize) -> Vec<Segment> {
    (1..=n)
        .map(|i| {
            Segment::new(
                i,
                format!("00:00:{:02},000", i),
                format!("00:00:{:02},800", i),
                vec![format!("line {}", i)],
            )
        })
        .collect()
}

fn translator(client: Arc<MockModel>, chunk_size: usize, context_size: usize, concurrency: usize) -> Translator {
    let mut tr = Translator::new(
        client,
        chunk_size,
        context_size,
        concurrency,
        false,
        get_language("ja").unwrap(),
        get_language("ko").unwrap(),
    )
    .unwrap();
    // Unit tests are not about pacing.
    tr.set_rate_limit(0, Duration::ZERO);
    tr
}

#[tokio::test]
async fn test_translate_document_withEchoModel_shouldTranslateEveryChunk() {
    let mock = Arc::new(MockModel::echoing("ko:"));
    let tr = translator(mock.clone(), 2, 1, 2);
    let segs = segments(5);

    let (out, failed) = tr
        .translate_document(&CancellationToken::new(), &segs, None)
        .await;

    assert!(failed.is_empty());
    assert_eq!(out.len(), 5);
    assert_eq!(out[0].lines, vec!["ko:line 1"]);
    assert_eq!(out[4].lines, vec!["ko:line 5"]);
    // ceil(5 / 2) chunks, one call each.
    assert_eq!(mock.call_count(), 3);
    assert_eq!(tr.usage().call_count, 3);
}

#[tokio::test]
async fn test_translate_document_shouldSendContextWindows() {
    let mock = Arc::new(MockModel::echoing("x:"));
    let tr = translator(mock.clone(), 2, 1, 1);
    let segs = segments(6);

    tr.translate_document(&CancellationToken::new(), &segs, None).await;

    let requests = mock.requests();
    let middle = requests
        .iter()
        .find(|r| r.target.first().map(|s| s.id) == Some(3))
        .expect("no request targeting segment 3");
    assert_eq!(middle.context_before.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2]);
    assert_eq!(middle.target.iter().map(|s| s.id).collect::<Vec<_>>(), vec![3, 4]);
    assert_eq!(middle.context_after.iter().map(|s| s.id).collect::<Vec<_>>(), vec![5]);
}

#[tokio::test]
async fn test_translate_document_withHallucinatedId_shouldUseThreeAttemptsThenFail() {
    // The model keeps answering for a segment that was never requested.
    let mock = Arc::new(MockModel::new(vec![MockOutcome::Respond(
        vec![tr(2, "유령")],
        UsageMetadata { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2, call_count: 1 },
    )]));
    let tr = translator(mock.clone(), 1, 0, 1);
    let segs = segments(1);

    let (out, failed) = tr
        .translate_document(&CancellationToken::new(), &segs, None)
        .await;

    assert_eq!(mock.call_count(), 3);
    assert_eq!(failed, vec![0]);
    // The failed chunk keeps its original text.
    assert_eq!(out[0].lines, vec!["line 1"]);
    // Responses rejected by validation still count toward usage.
    assert_eq!(tr.usage().total_tokens, 6);
}

#[tokio::test]
async fn test_translate_document_withDuplicateIds_shouldRejectResponse() {
    let mock = Arc::new(MockModel::new(vec![MockOutcome::Respond(
        vec![tr(1, "a"), tr(1, "b")],
        UsageMetadata::default(),
    )]));
    let tr = translator(mock.clone(), 1, 0, 1);

    let (_, failed) = tr
        .translate_document(&CancellationToken::new(), &segments(1), None)
        .await;

    assert_eq!(failed, vec![0]);
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn test_translate_document_withRateLimits_shouldBackOffDoubled() {
    let mock = Arc::new(MockModel::new(vec![
        MockOutcome::Fail(ErrorKind::RateLimit),
        MockOutcome::Fail(ErrorKind::RateLimit),
        MockOutcome::Respond(vec![tr(1, "안녕")], UsageMetadata::default()),
    ]));
    let tr = translator(mock.clone(), 1, 0, 1);

    let (out, failed) = tr
        .translate_document(&CancellationToken::new(), &segments(1), None)
        .await;

    assert!(failed.is_empty());
    assert_eq!(out[0].lines, vec!["안녕"]);
    assert_eq!(mock.call_count(), 3);

    // Rate-limited backoff doubles the exponential base: >= 2s then >= 4s,
    // plus up to a second of jitter each.
    let times = mock.call_times();
    assert!(times[1] - times[0] >= Duration::from_secs(2));
    assert!(times[2] - times[1] >= Duration::from_secs(4));
}

#[tokio::test]
async fn test_translate_document_withBadRequest_shouldNotRetry() {
    let mock = Arc::new(MockModel::new(vec![MockOutcome::Fail(ErrorKind::BadRequest)]));
    let tr = translator(mock.clone(), 1, 0, 1);

    let (_, failed) = tr
        .translate_document(&CancellationToken::new(), &segments(1), None)
        .await;

    assert_eq!(mock.call_count(), 1);
    assert_eq!(failed, vec![0]);
}

#[tokio::test]
async fn test_translate_chunks_withSubset_shouldLeaveOtherChunksUntouched() {
    let mock = Arc::new(MockModel::echoing("ko:"));
    let tr = translator(mock.clone(), 1, 0, 1);
    let segs = segments(4);

    let (out, failed) = tr
        .translate_chunks(&CancellationToken::new(), &segs, &[1, 3], None)
        .await;

    assert!(failed.is_empty());
    assert_eq!(mock.call_count(), 2);
    assert_eq!(out[0].lines, vec!["line 1"]);
    assert_eq!(out[1].lines, vec!["ko:line 2"]);
    assert_eq!(out[2].lines, vec!["line 3"]);
    assert_eq!(out[3].lines, vec!["ko:line 4"]);
}

#[tokio::test]
async fn test_translate_document_withCancellation_shouldEmitOneCanceledEvent() {
    let mock = Arc::new(MockModel::new(vec![MockOutcome::Hang]));
    let tr = translator(mock.clone(), 1, 0, 2);
    let segs = segments(3);

    let events: Arc<Mutex<Vec<TranslationState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let on_progress: ProgressCallback = Arc::new(move |p| {
        sink.lock().unwrap().push(p.state);
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let (out, failed) = tr
        .translate_document(&cancel, &segs, Some(&on_progress))
        .await;

    // Nothing completed; every chunk is reported failed and keeps its text.
    assert_eq!(failed, vec![0, 1, 2]);
    assert_eq!(out.len(), 3);
    assert_eq!(out[1].lines, vec!["line 2"]);

    let events = events.lock().unwrap();
    let canceled = events.iter().filter(|s| **s == TranslationState::Canceled).count();
    assert_eq!(canceled, 1);
    assert!(!events.iter().any(|s| *s == TranslationState::Completed));
}

#[tokio::test]
async fn test_translate_document_withLongLines_shouldFailCplValidation() {
    let long_line = "이 줄은 검증 한도보다 훨씬 길어서 실패해야 합니다 정말로요".repeat(2);
    let mock = Arc::new(MockModel::new(vec![MockOutcome::Respond(
        vec![tr(1, &long_line)],
        UsageMetadata::default(),
    )]));
    let mut tr = Translator::new(
        mock.clone(),
        1,
        0,
        1,
        true,
        get_language("ja").unwrap(),
        get_language("ko").unwrap(),
    )
    .unwrap();
    tr.set_rate_limit(0, Duration::ZERO);

    let (_, failed) = tr
        .translate_document(&CancellationToken::new(), &segments(1), None)
        .await;

    // CPL overflow is a validation error: retried to exhaustion.
    assert_eq!(failed, vec![0]);
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn test_set_names_mapping_shouldInjectDictionaryIntoPrompt() {
    let mock = Arc::new(MockModel::echoing("x:"));
    let mut tr = translator(mock.clone(), 1, 0, 1);
    tr.set_names_mapping(std::collections::BTreeMap::from([(
        "桜".to_string(),
        "사쿠라".to_string(),
    )]));

    tr.translate_document(&CancellationToken::new(), &segments(1), None).await;

    let prompt = mock.system_instruction();
    assert!(prompt.contains("桜 -> 사쿠라"));
    assert!(prompt.contains("Japanese"));
    assert!(prompt.contains("Korean"));
}
