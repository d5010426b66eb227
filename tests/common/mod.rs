/*!
 * Shared helpers for unit and integration tests.
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use subtrans::pipeline::Config;
use subtrans::providers::mock::MockModel;
use subtrans::providers::{ModelClient, TranslatedSegment};

/// Create a scratch directory that cleans itself up.
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Write an SRT file from (start, end, text-lines) triples.
pub fn write_srt(dir: &Path, name: &str, entries: &[(&str, &str, &[&str])]) -> PathBuf {
    let mut content = String::new();
    for (i, (start, end, lines)) in entries.iter().enumerate() {
        content.push_str(&format!("{}\n{} --> {}\n{}\n\n", i + 1, start, end, lines.join("\n")));
    }
    let path = dir.join(name);
    fs::write(&path, content).expect("failed to write test SRT");
    path
}

/// A translated segment with a single line.
pub fn tr(id: usize, line1: &str) -> TranslatedSegment {
    TranslatedSegment {
        id,
        line1: line1.to_string(),
        line2: String::new(),
    }
}

/// Baseline config for pipeline tests: one worker, one segment per chunk.
pub fn base_config(input: &Path, output: &Path) -> Config {
    Config {
        input_path: input.to_path_buf(),
        output_path: output.to_path_buf(),
        api_key: "test-key".to_string(),
        model: "gemini-test".to_string(),
        chunk_size: 1,
        context_size: 0,
        concurrency: 1,
        source_lang: "ja".to_string(),
        target_lang: "ko".to_string(),
        ..Default::default()
    }
}

/// A model-client factory that always hands out the given mock.
pub fn mock_factory(
    mock: Arc<MockModel>,
) -> impl Fn(&str) -> Result<Arc<dyn ModelClient>> + Send + Sync {
    move |_model| Ok(mock.clone() as Arc<dyn ModelClient>)
}
