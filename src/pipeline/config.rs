/*!
 * Configuration surface for translation and repair runs.
 *
 * Out-of-range values are clamped with a recorded note rather than
 * rejected, except for zero sizes and missing credentials, which are
 * configuration errors.
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::translator::ProgressCallback;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 20;
pub const MAX_CHUNK_SIZE: usize = 200;
pub const MAX_CONTEXT_SIZE: usize = 20;

/// Callback consulted when the output file already exists and overwrite was
/// not granted up front. Returning false skips the run.
pub type ConfirmCallback = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// All configuration for a translation or repair session.
#[derive(Clone, Default)]
pub struct Config {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Recovery log path (repair input) and sidecar anchor (translation).
    pub log_path: Option<PathBuf>,

    pub api_key: String,
    pub model: String,

    pub chunk_size: usize,
    pub context_size: usize,
    pub concurrency: usize,
    pub retry_on_long_lines: bool,
    pub no_prompt_cpl: bool,

    pub no_preprocess: bool,
    pub no_postprocess: bool,
    pub no_lang_preprocess: bool,
    pub no_lang_postprocess: bool,
    pub overwrite: bool,
    pub force_repair: bool,

    pub source_lang: String,
    pub target_lang: String,

    /// Character-name dictionary (source name → target name).
    pub names_mapping: BTreeMap<String, String>,
    pub names_path: Option<PathBuf>,

    pub on_progress: Option<ProgressCallback>,
    pub on_confirm_overwrite: Option<ConfirmCallback>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("input_path", &self.input_path)
            .field("output_path", &self.output_path)
            .field("model", &self.model)
            .field("chunk_size", &self.chunk_size)
            .field("context_size", &self.context_size)
            .field("concurrency", &self.concurrency)
            .field("source_lang", &self.source_lang)
            .field("target_lang", &self.target_lang)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Apply safe bounds to sizes and return a note for each adjustment.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.concurrency < MIN_CONCURRENCY {
            notes.push(format!(
                "concurrency clamped from {} to {} (min {})",
                self.concurrency, MIN_CONCURRENCY, MIN_CONCURRENCY
            ));
            self.concurrency = MIN_CONCURRENCY;
        } else if self.concurrency > MAX_CONCURRENCY {
            notes.push(format!(
                "concurrency clamped from {} to {} (max {})",
                self.concurrency, MAX_CONCURRENCY, MAX_CONCURRENCY
            ));
            self.concurrency = MAX_CONCURRENCY;
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            notes.push(format!(
                "chunk size clamped from {} to {} (max {})",
                self.chunk_size, MAX_CHUNK_SIZE, MAX_CHUNK_SIZE
            ));
            self.chunk_size = MAX_CHUNK_SIZE;
        }
        if self.context_size > MAX_CONTEXT_SIZE {
            notes.push(format!(
                "context size clamped from {} to {} (max {})",
                self.context_size, MAX_CONTEXT_SIZE, MAX_CONTEXT_SIZE
            ));
            self.context_size = MAX_CONTEXT_SIZE;
        }
        notes
    }

    /// Check the configuration for a translation run.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow!("chunk size must be greater than 0"));
        }
        if self.concurrency == 0 {
            return Err(anyhow!("concurrency must be greater than 0"));
        }
        if self.api_key.is_empty() {
            return Err(anyhow!("API key is required"));
        }
        Ok(())
    }

    /// Check only the runtime configuration needed for repair; everything
    /// else comes from the session log and is validated there.
    pub fn validate_repair_runtime(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(anyhow!("API key is required"));
        }
        Ok(())
    }
}
