/*!
 * Repair pipeline tests: resume of failed chunks, the tamper gates, and
 * the recovery-log lifecycle.
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use subtrans::errors::ErrorKind;
use subtrans::pipeline::{run_repair, run_translation, Config, TranslationStatus};
use subtrans::providers::mock::{MockModel, MockOutcome};
use subtrans::providers::UsageMetadata;
use subtrans::recovery::{load_session_log, save_session_log};
use subtrans::subtitle::{SrtVttCodec, SubtitleCodec};

use crate::common::{base_config, create_temp_dir, mock_factory, tr, write_srt};

/// Run a three-chunk translation whose middle chunk fails terminally,
/// returning the input path, output path, and recovery log path.
async fn seed_partial_session(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let input = write_srt(
        dir,
        "in.srt",
        &[
            ("00:00:01,000", "00:00:02,000", &["こんにちは1"]),
            ("00:00:03,000", "00:00:04,000", &["こんにちは2"]),
            ("00:00:05,000", "00:00:06,000", &["こんにちは3"]),
        ],
    );
    let output = dir.join("out.srt");

    let mock = Arc::new(MockModel::new(vec![
        MockOutcome::Respond(vec![tr(1, "안녕1")], UsageMetadata::default()),
        MockOutcome::Fail(ErrorKind::BadRequest),
        MockOutcome::Respond(vec![tr(3, "안녕3")], UsageMetadata::default()),
    ]));
    let factory = mock_factory(mock);
    let cfg = base_config(&input, &output);

    let result = run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap();
    assert_eq!(result.status, TranslationStatus::PartialSuccess);

    let log_path = result.recovery_log_path.unwrap();
    (input, output, log_path)
}

fn repair_config(log_path: &Path) -> Config {
    Config {
        log_path: Some(log_path.to_path_buf()),
        api_key: "test-key".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_run_repair_withUnchangedInput_shouldRetranslateOnlyFailedChunk() {
    let dir = create_temp_dir().unwrap();
    let (_input, output, log_path) = seed_partial_session(dir.path()).await;

    let mock = Arc::new(MockModel::new(vec![MockOutcome::Respond(
        vec![tr(2, "안녕2")],
        UsageMetadata { prompt_tokens: 3, completion_tokens: 2, total_tokens: 5, call_count: 1 },
    )]));
    let factory = mock_factory(mock.clone());

    let result = run_repair(&CancellationToken::new(), repair_config(&log_path), &factory, &SrtVttCodec)
        .await
        .unwrap();

    assert_eq!(result.model, "gemini-test");
    assert_eq!(result.usage.total_tokens, 5);

    // Only the failed chunk was sent to the model.
    assert_eq!(mock.call_count(), 1);
    let requests = mock.requests();
    assert_eq!(requests[0].target.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2]);

    // Run-1 results are preserved, the repaired chunk is spliced in.
    let saved = SrtVttCodec.load(&output).unwrap();
    assert_eq!(saved[0].lines, vec!["안녕1"]);
    assert_eq!(saved[1].lines, vec!["안녕2"]);
    assert_eq!(saved[2].lines, vec!["안녕3"]);

    // A fully repaired session removes its log.
    assert!(!log_path.exists());
}

#[tokio::test]
async fn test_run_repair_withTamperedInput_shouldDetectMismatchBeforeModelCalls() {
    let dir = create_temp_dir().unwrap();
    let (input, _output, log_path) = seed_partial_session(dir.path()).await;

    // Flip one byte of the input after the session was recorded.
    let mut content = fs::read(&input).unwrap();
    let last = content.len() - 1;
    content[last] = content[last].wrapping_add(1);
    fs::write(&input, &content).unwrap();

    let mock = Arc::new(MockModel::echoing("ko:"));
    let factory = mock_factory(mock.clone());

    let err = run_repair(&CancellationToken::new(), repair_config(&log_path), &factory, &SrtVttCodec)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("input file content mismatch"));
    assert_eq!(mock.call_count(), 0);
    assert!(log_path.exists());
}

#[tokio::test]
async fn test_run_repair_withMissingOutput_shouldRequireForceRepair() {
    let dir = create_temp_dir().unwrap();
    let (_input, output, log_path) = seed_partial_session(dir.path()).await;
    fs::remove_file(&output).unwrap();

    let mock = Arc::new(MockModel::echoing("ko:"));
    let factory = mock_factory(mock.clone());

    let err = run_repair(&CancellationToken::new(), repair_config(&log_path), &factory, &SrtVttCodec)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("existing output could not be reused"));
    assert_eq!(mock.call_count(), 0);

    // With force repair the whole document is re-translated.
    let mut cfg = repair_config(&log_path);
    cfg.force_repair = true;
    run_repair(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap();

    assert_eq!(mock.call_count(), 3);
    let saved = SrtVttCodec.load(&output).unwrap();
    assert_eq!(saved[0].lines, vec!["ko:こんにちは1"]);
    assert_eq!(saved[2].lines, vec!["ko:こんにちは3"]);
    assert!(!log_path.exists());
}

#[tokio::test]
async fn test_run_repair_withStillFailingChunk_shouldRewriteLogInPlace() {
    let dir = create_temp_dir().unwrap();
    let (_input, output, log_path) = seed_partial_session(dir.path()).await;

    let mock = Arc::new(MockModel::new(vec![MockOutcome::Fail(ErrorKind::BadRequest)]));
    let factory = mock_factory(mock.clone());

    let err = run_repair(&CancellationToken::new(), repair_config(&log_path), &factory, &SrtVttCodec)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed chunks"));

    // The log survives with the fresh failure set; run-1 output is intact.
    assert!(log_path.exists());
    let session = load_session_log(&log_path).unwrap();
    assert_eq!(session.failed_chunks, vec![1]);
    let saved = SrtVttCodec.load(&output).unwrap();
    assert_eq!(saved[0].lines, vec!["안녕1"]);
}

#[tokio::test]
async fn test_run_repair_withRewrittenLog_shouldKeepItAfterSuccess() {
    let dir = create_temp_dir().unwrap();
    let (_input, _output, log_path) = seed_partial_session(dir.path()).await;

    let mock = Arc::new(MockModel::new(vec![MockOutcome::Respond(
        vec![tr(2, "안녕2")],
        UsageMetadata::default(),
    )]));

    // Another process rewrites the log while this repair is loading it: the
    // repair may finish, but must not delete bytes it did not observe.
    // Simulate by rewriting the log between load and delete via a factory
    // side effect (the factory runs after validation, before translation).
    let log_path_clone = log_path.clone();
    let mock_clone = mock.clone();
    let factory = move |_model: &str| -> anyhow::Result<Arc<dyn subtrans::providers::ModelClient>> {
        let mut session = load_session_log(&log_path_clone).unwrap();
        session.concurrency = 2;
        save_session_log(&log_path_clone, &session).unwrap();
        Ok(mock_clone.clone() as Arc<dyn subtrans::providers::ModelClient>)
    };

    run_repair(&CancellationToken::new(), repair_config(&log_path), &factory, &SrtVttCodec)
        .await
        .unwrap();

    // The rewritten log is left in place.
    assert!(log_path.exists());
}

#[tokio::test]
async fn test_run_repair_withBrokenLog_shouldFailValidation() {
    let dir = create_temp_dir().unwrap();
    let (_input, _output, log_path) = seed_partial_session(dir.path()).await;

    let mut session = load_session_log(&log_path).unwrap();
    session.output_path = "/absolute/out.srt".to_string();
    save_session_log(&log_path, &session).unwrap();

    let factory = mock_factory(Arc::new(MockModel::echoing("x:")));
    let err = run_repair(&CancellationToken::new(), repair_config(&log_path), &factory, &SrtVttCodec)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid recovery log"));
}

#[tokio::test]
async fn test_run_repair_withMissingLogPath_shouldFail() {
    let factory = mock_factory(Arc::new(MockModel::echoing("x:")));
    let cfg = Config {
        api_key: "test-key".to_string(),
        ..Default::default()
    };
    let err = run_repair(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("log file path is required"));
}
