/*!
 * Terminal outcomes of pipeline runs.
 */

use std::fmt;
use std::path::PathBuf;

use crate::providers::UsageMetadata;

/// Terminal state of a translation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationStatus {
    /// Every chunk translated; output written; no recovery log.
    Success,
    /// Some chunks failed; output written; recovery log saved.
    PartialSuccess,
    /// Every chunk failed; no output; recovery log saved.
    Failure,
    /// The user declined to overwrite the existing output; nothing changed.
    Skipped,
}

impl TranslationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationStatus::Success => "Success",
            TranslationStatus::PartialSuccess => "Partial Success",
            TranslationStatus::Failure => "Failure",
            TranslationStatus::Skipped => "Skipped",
        }
    }

    /// Exit semantics: Success and Skipped count as success.
    pub fn is_success(&self) -> bool {
        matches!(self, TranslationStatus::Success | TranslationStatus::Skipped)
    }
}

impl fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured outputs of a translation run.
#[derive(Debug, Clone)]
pub struct TranslationResult {
    pub status: TranslationStatus,
    pub recovery_log_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub usage: UsageMetadata,
    pub failed_chunks: usize,
    pub total_chunks: usize,
}

impl TranslationResult {
    pub(crate) fn skipped() -> Self {
        Self {
            status: TranslationStatus::Skipped,
            recovery_log_path: None,
            output_path: None,
            usage: UsageMetadata::default(),
            failed_chunks: 0,
            total_chunks: 0,
        }
    }
}

/// Structured outputs of a repair run.
#[derive(Debug, Clone)]
pub struct RepairResult {
    pub model: String,
    pub usage: UsageMetadata,
}
