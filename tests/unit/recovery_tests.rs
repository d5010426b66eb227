/*!
 * Recovery log persistence tests: round trips, naming, and the
 * content-hash guard.
 */

use std::fs;

use subtrans::recovery::{
    self, calculate_status, generate_recovery_path, load_session_log, load_session_log_with_hash,
    save_session_log, SessionLog, CURRENT_LOG_VERSION,
};
use subtrans::pipeline::TranslationStatus;

use crate::common::create_temp_dir;

fn sample_log() -> SessionLog {
    SessionLog {
        log_version: CURRENT_LOG_VERSION,
        input_path: "input.srt".to_string(),
        output_path: "output.srt".to_string(),
        input_hash: "sha256:0011".to_string(),
        segments_checksum: "sha256:2233".to_string(),
        model: "gemini-test".to_string(),
        names_path: String::new(),
        chunk_size: 10,
        context_size: 2,
        concurrency: 3,
        no_preprocess: false,
        no_postprocess: false,
        no_lang_preprocess: false,
        no_lang_postprocess: false,
        no_prompt_cpl: false,
        source_lang: "ja".to_string(),
        target_lang: "ko".to_string(),
        failed_chunks: vec![0, 2],
        total_chunks: 5,
        status: "Partial Success".to_string(),
        status_reason: String::new(),
    }
}

#[test]
fn test_save_then_load_shouldRoundTripAndValidate() {
    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("session_recovery.json");

    save_session_log(&path, &sample_log()).unwrap();
    let mut loaded = load_session_log(&path).unwrap();

    assert!(loaded.validate().is_ok());
    assert_eq!(loaded, sample_log());
}

#[test]
fn test_save_shouldUseStableWireNames() {
    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("session_recovery.json");
    save_session_log(&path, &sample_log()).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    for key in [
        "log_version",
        "input_path",
        "output_path",
        "input_hash",
        "segments_checksum",
        "chunk_size",
        "context_size",
        "no_lang_preprocess",
        "failed_chunks",
        "total_chunks",
        "status",
    ] {
        assert!(raw.contains(&format!("\"{}\"", key)), "missing key {}", key);
    }
    // Empty optionals stay off the wire.
    assert!(!raw.contains("names_path"));
    assert!(!raw.contains("status_reason"));
}

#[cfg(unix)]
#[test]
fn test_save_shouldRestrictPermissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("session_recovery.json");
    save_session_log(&path, &sample_log()).unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_load_with_hash_shouldDetectRewrites() {
    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("session_recovery.json");
    save_session_log(&path, &sample_log()).unwrap();

    let (_, first) = load_session_log_with_hash(&path).unwrap();

    let mut changed = sample_log();
    changed.failed_chunks = vec![1];
    save_session_log(&path, &changed).unwrap();

    let (_, second) = load_session_log_with_hash(&path).unwrap();
    assert_ne!(first, second);
    assert_eq!(recovery::hash_file(&path).unwrap(), second);
}

#[test]
fn test_generate_recovery_path_shouldWalkCollisionLadder() {
    let dir = create_temp_dir().unwrap();
    let output = dir.path().join("movie.srt");

    let primary = generate_recovery_path(&output);
    assert_eq!(primary, dir.path().join("movie_recovery.json"));

    fs::write(&primary, "{}").unwrap();
    let second = generate_recovery_path(&output);
    assert_eq!(second, dir.path().join("movie_recovery_0.json"));

    fs::write(&second, "{}").unwrap();
    let third = generate_recovery_path(&output);
    assert_eq!(third, dir.path().join("movie_recovery_1.json"));
}

#[test]
fn test_generate_recovery_path_withNumberedSlotsFull_shouldFallBackToUuid() {
    let dir = create_temp_dir().unwrap();
    let output = dir.path().join("movie.srt");

    fs::write(dir.path().join("movie_recovery.json"), "{}").unwrap();
    for i in 0..=9 {
        fs::write(dir.path().join(format!("movie_recovery_{}.json", i)), "{}").unwrap();
    }

    let fallback = generate_recovery_path(&output);
    let name = fallback.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("movie_recovery_"));
    assert!(name.len() > "movie_recovery_9.json".len());
}

#[test]
fn test_calculate_status_shouldFollowCountRule() {
    assert_eq!(calculate_status(0, 4), TranslationStatus::Success);
    assert_eq!(calculate_status(2, 4), TranslationStatus::PartialSuccess);
    assert_eq!(calculate_status(4, 4), TranslationStatus::Failure);
}
