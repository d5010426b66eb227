/*!
 * End-to-end pipeline tests over the mock model and a scratch directory.
 */

use std::fs;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use subtrans::errors::ErrorKind;
use subtrans::pipeline::{run_translation, TranslationStatus};
use subtrans::providers::mock::{MockModel, MockOutcome};
use subtrans::providers::UsageMetadata;
use subtrans::recovery::load_session_log;
use subtrans::subtitle::{SrtVttCodec, SubtitleCodec};

use crate::common::{base_config, create_temp_dir, mock_factory, tr, write_srt};

fn recovery_logs_in(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.file_name().unwrap().to_string_lossy().contains("_recovery"))
        .collect()
}

#[tokio::test]
async fn test_run_translation_withSingleChunk_shouldSucceedAndCorrectTiming() {
    let dir = create_temp_dir().unwrap();
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[("00:00:01,000", "00:00:01,200", &["こんにちは"])],
    );
    let output = dir.path().join("out.srt");

    let mock = Arc::new(MockModel::new(vec![MockOutcome::Respond(
        vec![tr(1, "안녕")],
        UsageMetadata { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15, call_count: 1 },
    )]));
    let factory = mock_factory(mock.clone());
    let cfg = base_config(&input, &output);

    let result = run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap();

    assert_eq!(result.status, TranslationStatus::Success);
    assert_eq!(result.failed_chunks, 0);
    assert_eq!(result.total_chunks, 1);
    assert_eq!(result.output_path.as_deref(), Some(output.as_path()));
    assert!(result.recovery_log_path.is_none());
    assert_eq!(result.usage.total_tokens, 15);

    let saved = SrtVttCodec.load(&output).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].lines, vec!["안녕"]);
    // The 200ms cue was stretched to the minimum display duration.
    assert_eq!(saved[0].start_time, "00:00:01,000");
    assert_eq!(saved[0].end_time, "00:00:01,800");

    assert!(recovery_logs_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_run_translation_withTerminalFailure_shouldWriteRecoveryLogAndNoOutput() {
    let dir = create_temp_dir().unwrap();
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[("00:00:01,000", "00:00:02,000", &["こんにちは"])],
    );
    let output = dir.path().join("out.srt");

    let mock = Arc::new(MockModel::new(vec![MockOutcome::Fail(ErrorKind::BadRequest)]));
    let factory = mock_factory(mock.clone());
    let cfg = base_config(&input, &output);

    let result = run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap();

    assert_eq!(result.status, TranslationStatus::Failure);
    assert!(!output.exists());
    assert_eq!(mock.call_count(), 1);

    let log_path = result.recovery_log_path.expect("recovery log path missing");
    let mut session = load_session_log(&log_path).unwrap();
    assert!(session.validate().is_ok());
    assert_eq!(session.failed_chunks, vec![0]);
    assert_eq!(session.total_chunks, 1);
    assert_eq!(session.status, "Failure");
    assert_eq!(session.input_path, "in.srt");
    assert_eq!(session.output_path, "out.srt");

    // The fingerprint binds the log to the unchanged input and its
    // preprocessed state.
    assert_eq!(session.input_hash, subtrans::recovery::hash_file_hex(&input).unwrap());
    let (preprocessed, _) = subtrans::subtitle::preprocess_with_mapping(
        SrtVttCodec.load(&input).unwrap(),
        "ja",
        &input,
        true,
    );
    assert_eq!(
        session.segments_checksum,
        subtrans::subtitle::segments_checksum_hex(&preprocessed)
    );
}

#[tokio::test]
async fn test_run_translation_withPartialFailure_shouldKeepOriginalsForFailedChunks() {
    let dir = create_temp_dir().unwrap();
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[
            ("00:00:01,000", "00:00:02,000", &["こんにちは1"]),
            ("00:00:03,000", "00:00:04,000", &["こんにちは2"]),
            ("00:00:05,000", "00:00:06,000", &["こんにちは3"]),
        ],
    );
    let output = dir.path().join("out.srt");

    // Chunks run in order on one worker: ok, terminal failure, ok.
    let mock = Arc::new(MockModel::new(vec![
        MockOutcome::Respond(vec![tr(1, "안녕1")], UsageMetadata::default()),
        MockOutcome::Fail(ErrorKind::BadRequest),
        MockOutcome::Respond(vec![tr(3, "안녕3")], UsageMetadata::default()),
    ]));
    let factory = mock_factory(mock.clone());
    let cfg = base_config(&input, &output);

    let result = run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap();

    assert_eq!(result.status, TranslationStatus::PartialSuccess);
    assert_eq!(result.failed_chunks, 1);
    assert_eq!(result.total_chunks, 3);

    // Partial output is written untouched by postprocessing, with the
    // failed chunk's original text in place.
    let saved = SrtVttCodec.load(&output).unwrap();
    assert_eq!(saved[0].lines, vec!["안녕1"]);
    assert_eq!(saved[1].lines, vec!["こんにちは2"]);
    assert_eq!(saved[2].lines, vec!["안녕3"]);
    assert_eq!(saved[1].end_time, "00:00:04,000");

    let session = load_session_log(&result.recovery_log_path.unwrap()).unwrap();
    assert_eq!(session.failed_chunks, vec![1]);
    assert_eq!(session.status, "Partial Success");
}

#[tokio::test]
async fn test_run_translation_withDeclinedOverwrite_shouldSkip() {
    let dir = create_temp_dir().unwrap();
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[("00:00:01,000", "00:00:02,000", &["こんにちは"])],
    );
    let output = dir.path().join("out.srt");
    fs::write(&output, "precious").unwrap();

    let mock = Arc::new(MockModel::echoing("ko:"));
    let factory = mock_factory(mock.clone());
    let mut cfg = base_config(&input, &output);
    cfg.on_confirm_overwrite = Some(Arc::new(|_path| false));

    let result = run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap();

    assert_eq!(result.status, TranslationStatus::Skipped);
    assert!(result.status.is_success());
    assert_eq!(fs::read_to_string(&output).unwrap(), "precious");
    // No tokens were spent.
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_run_translation_withSameLanguages_shouldAbortBeforeModelCalls() {
    let dir = create_temp_dir().unwrap();
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[("00:00:01,000", "00:00:02,000", &["hello"])],
    );
    let mock = Arc::new(MockModel::echoing("x:"));
    let factory = mock_factory(mock.clone());

    let mut cfg = base_config(&input, &dir.path().join("out.srt"));
    cfg.source_lang = "ko".to_string();
    cfg.target_lang = "ko".to_string();

    let err = run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("must be different"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_run_translation_withSameInputAndOutput_shouldAbort() {
    let dir = create_temp_dir().unwrap();
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[("00:00:01,000", "00:00:02,000", &["hello"])],
    );
    let factory = mock_factory(Arc::new(MockModel::echoing("x:")));

    let cfg = base_config(&input, &input);
    let err = run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("the same"));
}

#[tokio::test]
async fn test_run_translation_withUnsupportedExtension_shouldAbort() {
    let dir = create_temp_dir().unwrap();
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[("00:00:01,000", "00:00:02,000", &["hello"])],
    );
    let factory = mock_factory(Arc::new(MockModel::echoing("x:")));

    let cfg = base_config(&input, &dir.path().join("out.txt"));
    let err = run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unsupported subtitle extension"));
}

#[tokio::test]
async fn test_run_translation_withMissingApiKey_shouldAbort() {
    let dir = create_temp_dir().unwrap();
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[("00:00:01,000", "00:00:02,000", &["hello"])],
    );
    let factory = mock_factory(Arc::new(MockModel::echoing("x:")));

    let mut cfg = base_config(&input, &dir.path().join("out.srt"));
    cfg.api_key.clear();
    assert!(run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .is_err());
}

#[tokio::test]
async fn test_run_translation_withDocumentEmptyAfterPreprocess_shouldAbort() {
    let dir = create_temp_dir().unwrap();
    // Japanese rules strip the bracketed caption and the music glyphs,
    // leaving nothing to translate.
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[
            ("00:00:01,000", "00:00:02,000", &["（笑）"]),
            ("00:00:03,000", "00:00:04,000", &["♪〜"]),
        ],
    );
    let mock = Arc::new(MockModel::echoing("x:"));
    let factory = mock_factory(mock.clone());

    let cfg = base_config(&input, &dir.path().join("out.srt"));
    let err = run_translation(&CancellationToken::new(), cfg, &factory, &SrtVttCodec)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("after preprocessing"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_run_translation_withCancellation_shouldMarkCanceledInLog() {
    let dir = create_temp_dir().unwrap();
    let input = write_srt(
        dir.path(),
        "in.srt",
        &[
            ("00:00:01,000", "00:00:02,000", &["こんにちは1"]),
            ("00:00:03,000", "00:00:04,000", &["こんにちは2"]),
        ],
    );
    let output = dir.path().join("out.srt");

    let mock = Arc::new(MockModel::new(vec![MockOutcome::Hang]));
    let factory = mock_factory(mock.clone());
    let cfg = base_config(&input, &output);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = run_translation(&cancel, cfg, &factory, &SrtVttCodec)
        .await
        .unwrap();

    assert_eq!(result.status, TranslationStatus::Failure);
    let session = load_session_log(&result.recovery_log_path.unwrap()).unwrap();
    assert_eq!(session.status_reason, "canceled");
    assert_eq!(session.failed_chunks, vec![0, 1]);
}
