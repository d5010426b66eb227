/*!
 * Recovery log: the persisted fingerprint of an interrupted session.
 *
 * A log is written at most once per run, when a run terminates with partial
 * or full failure. It binds the failed chunk indices to a specific input
 * file (content hash) and a specific preprocessed document state (segments
 * checksum), so a later repair run can prove it is re-chunking the same
 * document before trusting the indices.
 *
 * Paths inside the log are relative to the directory containing the log
 * file and must not ascend out of it.
 */

use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::file_utils;
use crate::language::get_language;
use crate::pipeline::result::TranslationStatus;
use crate::subtitle::checksum::hex_encode;

/// Current on-disk schema version.
pub const CURRENT_LOG_VERSION: u32 = 4;

/// Persisted session state, `log_version = 4`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionLog {
    #[serde(default)]
    pub log_version: u32,
    pub input_path: String,
    pub output_path: String,
    pub input_hash: String,
    pub segments_checksum: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub names_path: String,
    pub chunk_size: usize,
    pub context_size: usize,
    pub concurrency: usize,
    pub no_preprocess: bool,
    pub no_postprocess: bool,
    pub no_lang_preprocess: bool,
    pub no_lang_postprocess: bool,
    pub no_prompt_cpl: bool,
    pub source_lang: String,
    pub target_lang: String,
    pub failed_chunks: Vec<usize>,
    pub total_chunks: usize,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_reason: String,
}

impl SessionLog {
    /// Check that the log is consistent and safe to resume from.
    pub fn validate(&mut self) -> Result<()> {
        if self.log_version == 0 {
            self.log_version = CURRENT_LOG_VERSION;
        }
        if self.log_version != CURRENT_LOG_VERSION {
            return Err(anyhow!("unsupported log_version: {}", self.log_version));
        }
        validate_relative_path("input_path", &self.input_path, false)?;
        validate_relative_path("output_path", &self.output_path, true)?;
        if !self.names_path.is_empty() {
            validate_relative_path("names_path", &self.names_path, false)?;
        }
        validate_hash("input_hash", &self.input_hash)?;
        validate_hash("segments_checksum", &self.segments_checksum)?;
        if self.chunk_size == 0 {
            return Err(anyhow!("invalid chunk_size: {}", self.chunk_size));
        }
        if self.concurrency == 0 {
            return Err(anyhow!("invalid concurrency: {}", self.concurrency));
        }
        if self.total_chunks == 0 {
            return Err(anyhow!("invalid total_chunks: {}", self.total_chunks));
        }
        if self.failed_chunks.is_empty() {
            return Err(anyhow!("failed_chunks list is empty"));
        }
        for &idx in &self.failed_chunks {
            if idx >= self.total_chunks {
                return Err(anyhow!("failed chunk index out of range: {}", idx));
            }
        }
        if get_language(&self.source_lang).is_none() {
            return Err(anyhow!("unsupported source language: {}", self.source_lang));
        }
        if get_language(&self.target_lang).is_none() {
            return Err(anyhow!("unsupported target language: {}", self.target_lang));
        }
        if self.model.is_empty() {
            return Err(anyhow!("model name is empty"));
        }
        if self.status.is_empty() {
            return Err(anyhow!("session status is empty"));
        }
        if !self.status_reason.is_empty() && self.status_reason != "canceled" {
            return Err(anyhow!("invalid status_reason: {}", self.status_reason));
        }
        Ok(())
    }
}

fn validate_relative_path(field: &str, value: &str, reject_traversal: bool) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("{} is empty", field));
    }
    let path = Path::new(value);
    if path.is_absolute() {
        return Err(anyhow!("{} must be relative, not absolute: {}", field, value));
    }
    if reject_traversal {
        // A normalised output path must stay inside the log directory.
        let mut depth: i32 = 0;
        for component in path.components() {
            match component {
                Component::ParentDir => depth -= 1,
                Component::Normal(_) => depth += 1,
                _ => {}
            }
            if depth < 0 {
                return Err(anyhow!(
                    "{} cannot traverse parent directories: {}",
                    field,
                    value
                ));
            }
        }
    }
    Ok(())
}

fn validate_hash(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("{} is empty", field));
    }
    if !value.starts_with("sha256:") {
        return Err(anyhow!("invalid {}: {}", field, value));
    }
    Ok(())
}

/// Persist the session log atomically with 0600 permissions. Returns the
/// path actually written (a suffixed sibling on improbable temp collisions).
pub fn save_session_log(path: &Path, log: &SessionLog) -> Result<PathBuf> {
    let mut log = log.clone();
    if log.log_version == 0 {
        log.log_version = CURRENT_LOG_VERSION;
    }
    let data = serde_json::to_vec_pretty(&log).context("failed to encode session log")?;
    file_utils::atomic_write_exclusive(path, &data)
}

/// Load a session log from disk.
pub fn load_session_log(path: &Path) -> Result<SessionLog> {
    let (log, _) = load_session_log_with_hash(path)?;
    Ok(log)
}

/// Load a session log together with the SHA-256 of its raw bytes, for the
/// delete-only-if-unchanged check after a successful repair.
pub fn load_session_log_with_hash(path: &Path) -> Result<(SessionLog, [u8; 32])> {
    let data = fs::read(path)
        .with_context(|| format!("failed to read session log: {}", path.display()))?;
    let mut log: SessionLog = serde_json::from_slice(&data)
        .with_context(|| format!("failed to decode session log: {}", path.display()))?;
    if log.log_version == 0 {
        log.log_version = CURRENT_LOG_VERSION;
    }
    let digest: [u8; 32] = Sha256::digest(&data).into();
    Ok((log, digest))
}

/// SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> Result<[u8; 32]> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// `sha256:`-prefixed hex digest of a file's contents.
pub fn hash_file_hex(path: &Path) -> Result<String> {
    Ok(format!("sha256:{}", hex_encode(&hash_file(path)?)))
}

/// Terminal status from failed/total chunk counts.
pub fn calculate_status(failed: usize, total: usize) -> TranslationStatus {
    if failed == 0 {
        TranslationStatus::Success
    } else if failed < total {
        TranslationStatus::PartialSuccess
    } else {
        TranslationStatus::Failure
    }
}

/// Pick a non-existing file name for a new recovery log, next to the output.
///
/// Preference order: `<base>_recovery.json`, `<base>_recovery_0..9.json`,
/// `<base>_recovery_<UUIDv7>.json` (up to 100 draws), then a deterministic
/// name carrying the process id.
pub fn generate_recovery_path(output_path: &Path) -> PathBuf {
    let dir = output_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let base = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());

    let primary = dir.join(format!("{}_recovery.json", base));
    if !primary.exists() {
        return primary;
    }

    for i in 0..=9 {
        let candidate = dir.join(format!("{}_recovery_{}.json", base, i));
        if !candidate.exists() {
            return candidate;
        }
    }

    for _ in 0..100 {
        let candidate = dir.join(format!("{}_recovery_{}.json", base, Uuid::now_v7()));
        if !candidate.exists() {
            return candidate;
        }
    }

    dir.join(format!("{}_recovery_final_{}.json", base, std::process::id()))
}

/// Resolve a log-relative path against the log file's directory.
pub fn resolve_log_relative(log_path: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|dir| dir.join(path))
        .unwrap_or_else(|| path.to_path_buf())
}

/// Express `target` relative to the log file's directory.
pub fn to_log_relative(log_path: &Path, target: &Path) -> Result<String> {
    let log_dir = absolutize(log_path)?
        .parent()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| anyhow!("log path has no parent directory: {}", log_path.display()))?;
    let target = absolutize(target)?;
    let rel = relative_path(&log_dir, &target)?;
    Ok(rel.to_string_lossy().into_owned())
}

/// As [`to_log_relative`], but refuses results that leave the log directory.
/// Used for the output path, which must stay next to the log.
pub fn to_log_relative_inside(log_path: &Path, target: &Path) -> Result<String> {
    let rel = to_log_relative(log_path, target)?;
    if Path::new(&rel)
        .components()
        .next()
        .is_some_and(|c| c == Component::ParentDir)
    {
        return Err(anyhow!("output path is not within log directory"));
    }
    Ok(rel)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(clean_path(path))
    } else {
        let cwd = std::env::current_dir().context("failed to resolve current directory")?;
        Ok(clean_path(&cwd.join(path)))
    }
}

/// Lexically normalise a path: resolve `.` and `..` without touching the
/// filesystem, mirroring how the log's relative paths are interpreted.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn relative_path(from: &Path, to: &Path) -> Result<PathBuf> {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();

    let mut common = 0;
    while common < from.len() && common < to.len() && from[common] == to[common] {
        common += 1;
    }
    if common == 0 && (from.first() != to.first()) {
        return Err(anyhow!("paths have no common prefix"));
    }

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &to[common..] {
        rel.push(component.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    Ok(rel)
}
