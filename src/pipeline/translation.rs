/*!
 * Full-run translation coordinator.
 *
 * Composes preprocessing, chunked translation, postprocessing, and output
 * persistence, and emits a recovery log next to the effective output
 * whenever a run ends in partial or full failure. All fatal configuration
 * and filesystem conditions are checked before the first model call.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chunker;
use crate::file_utils;
use crate::language::{get_language, Language};
use crate::names;
use crate::providers::ModelClient;
use crate::recovery::{self, SessionLog, CURRENT_LOG_VERSION};
use crate::subtitle::checksum::hex_encode;
use crate::subtitle::{
    is_supported_extension, postprocess_with_options, preprocess_with_mapping, segments_checksum_hex,
    validate_document, IdMap, Segment, SubtitleCodec,
};
use crate::translator::Translator;

use super::config::Config;
use super::result::{TranslationResult, TranslationStatus};

/// Builds a model client for a model name. The coordinator defers client
/// construction so repair can honour the model recorded in a session log.
pub type ModelClientFactory<'a> =
    &'a (dyn Fn(&str) -> Result<Arc<dyn ModelClient>> + Send + Sync);

/// Execute the full translation pipeline.
pub async fn run_translation(
    cancel: &CancellationToken,
    mut cfg: Config,
    client_factory: ModelClientFactory<'_>,
    codec: &dyn SubtitleCodec,
) -> Result<TranslationResult> {
    for note in cfg.normalize() {
        warn!("Config normalized: {}", note);
    }
    cfg.validate().context("invalid configuration")?;

    // Everything here must fail before the first token is spent.
    let abs_in = absolutize(&cfg.input_path)?;
    let abs_out = absolutize(&cfg.output_path)?;
    check_paths_distinct(&abs_in, &abs_out)?;
    check_supported_extension(&cfg.input_path)?;
    check_supported_extension(&cfg.output_path)?;
    file_utils::reject_symlink_path(&cfg.output_path)?;
    if let Some(log_path) = &cfg.log_path {
        file_utils::reject_symlink_path(log_path)?;
    }

    let output_exists = cfg.output_path.exists();
    let mut should_overwrite = cfg.overwrite;
    if output_exists {
        if !should_overwrite {
            if let Some(confirm) = &cfg.on_confirm_overwrite {
                should_overwrite = confirm(&cfg.output_path);
            }
        }
        if !should_overwrite {
            info!("Output file exists. Aborted by user: path={}", cfg.output_path.display());
            return Ok(TranslationResult::skipped());
        }
        info!("Overwriting output file: path={}", cfg.output_path.display());
    }

    let src_lang = lookup_language(&cfg.source_lang, "source")?;
    let tgt_lang = lookup_language(&cfg.target_lang, "target")?;
    if src_lang.code == tgt_lang.code {
        return Err(anyhow!(
            "source and target languages must be different ({})",
            src_lang.code
        ));
    }

    let mut segments = codec.load(&cfg.input_path)?;
    validate_document(&segments).context("invalid subtitle file")?;
    info!("Loaded and validated subtitles: count={} path={}", segments.len(), cfg.input_path.display());

    if !cfg.no_preprocess {
        let (cleaned, id_map) = preprocess_with_mapping(
            segments,
            src_lang.code,
            &cfg.input_path,
            !cfg.no_lang_preprocess,
        );
        segments = cleaned;
        info!("Preprocessing complete: count={}", segments.len());
        // An input that cleans down to nothing has nothing to translate.
        validate_document(&segments).context("invalid subtitle file after preprocessing")?;
        if let Some(log_path) = &cfg.log_path {
            if !id_map.is_empty() {
                if let Err(e) = write_id_map(log_path, &id_map) {
                    warn!("Failed to write segment ID mapping: error={:#}", e);
                }
            }
        }
    } else {
        info!("Preprocessing skipped");
    }

    let client = client_factory(&cfg.model).context("failed to create model client")?;
    let mut translator = Translator::new(
        client,
        cfg.chunk_size,
        cfg.context_size,
        cfg.concurrency,
        cfg.retry_on_long_lines,
        src_lang,
        tgt_lang,
    )
    .context("failed to initialize translator")?;
    translator.set_prompt_cpl(!cfg.no_prompt_cpl);

    let names_mapping = resolve_names_mapping(&cfg, src_lang, tgt_lang)?;
    if !names_mapping.is_empty() {
        info!("Loaded character name mapping: count={}", names_mapping.len());
        translator.set_names_mapping(names_mapping);
    }

    info!("Starting translation: model={}", cfg.model);
    let (translated, failed) = translator
        .translate_document(cancel, &segments, cfg.on_progress.as_ref())
        .await;

    let total_chunks = chunker::total_chunks(segments.len(), cfg.chunk_size);
    let status = recovery::calculate_status(failed.len(), total_chunks);
    let mut result = TranslationResult {
        status,
        recovery_log_path: None,
        output_path: None,
        usage: translator.usage(),
        failed_chunks: failed.len(),
        total_chunks,
    };
    info!("Translation finished: status={}", status);
    let canceled = cancel.is_cancelled();

    let mut effective_output = cfg.output_path.clone();
    if status == TranslationStatus::Success || status == TranslationStatus::PartialSuccess {
        if !(output_exists && should_overwrite) {
            let (safe, changed) = file_utils::safe_path(&cfg.output_path)?;
            if changed {
                warn!(
                    "Output path adjusted to avoid overwrite: original={} effective={}",
                    cfg.output_path.display(),
                    safe.display()
                );
                effective_output = safe;
            }
        }

        let out_segments = if status == TranslationStatus::Success {
            if !cfg.no_postprocess {
                info!("Performing post-processing");
                postprocess_with_options(
                    translated,
                    tgt_lang.code,
                    tgt_lang.default_cps,
                    !cfg.no_lang_postprocess,
                )
            } else {
                info!("Post-processing skipped");
                translated
            }
        } else {
            // A partial document will be repaired; shaping waits for the
            // run that completes it.
            info!("Skipping post-processing for partial output");
            translated
        };

        codec
            .save(&effective_output, &out_segments)
            .context("failed to save output file")?;
        result.output_path = Some(effective_output.clone());
        info!("Saved results: path={}", effective_output.display());
    }

    if status == TranslationStatus::PartialSuccess || status == TranslationStatus::Failure {
        match write_recovery_log(&cfg, &abs_in, &effective_output, &segments, &failed, total_chunks, status, canceled) {
            Ok(log_path) => {
                if status == TranslationStatus::PartialSuccess {
                    warn!("Partial success - recovery log saved: path={}", log_path.display());
                } else {
                    error!("Translation failed - recovery log saved: path={}", log_path.display());
                }
                result.recovery_log_path = Some(log_path);
            }
            Err(e) => error!("Failed to save recovery log: error={:#}", e),
        }
    }

    Ok(result)
}

#[allow(clippy::too_many_arguments)]
fn write_recovery_log(
    cfg: &Config,
    abs_in: &Path,
    effective_output: &Path,
    segments: &[Segment],
    failed: &[usize],
    total_chunks: usize,
    status: TranslationStatus,
    canceled: bool,
) -> Result<PathBuf> {
    let input_hash = recovery::hash_file_hex(abs_in)
        .context("failed to compute input hash for recovery log")?;
    let segments_checksum = segments_checksum_hex(segments);
    let log_path = recovery::generate_recovery_path(effective_output);

    let relative_input = recovery::to_log_relative(&log_path, abs_in)
        .context("failed to convert input path to relative")?;
    let relative_output = recovery::to_log_relative_inside(&log_path, effective_output)
        .context("failed to convert output path to relative")?;
    let relative_names = match &cfg.names_path {
        Some(path) => recovery::to_log_relative(&log_path, path)
            .context("failed to convert names path to relative")?,
        None => String::new(),
    };

    let session = SessionLog {
        log_version: CURRENT_LOG_VERSION,
        input_path: relative_input,
        output_path: relative_output,
        input_hash,
        segments_checksum,
        model: cfg.model.clone(),
        names_path: relative_names,
        chunk_size: cfg.chunk_size,
        context_size: cfg.context_size,
        concurrency: cfg.concurrency,
        no_preprocess: cfg.no_preprocess,
        no_postprocess: cfg.no_postprocess,
        no_lang_preprocess: cfg.no_lang_preprocess,
        no_lang_postprocess: cfg.no_lang_postprocess,
        no_prompt_cpl: cfg.no_prompt_cpl,
        source_lang: cfg.source_lang.clone(),
        target_lang: cfg.target_lang.clone(),
        failed_chunks: failed.to_vec(),
        total_chunks,
        status: status.as_str().to_string(),
        status_reason: if canceled { "canceled".to_string() } else { String::new() },
    };

    recovery::save_session_log(&log_path, &session)
}

/// Persist the preprocess ID remap next to the configured log path.
fn write_id_map(log_path: &Path, mapping: &[IdMap]) -> Result<()> {
    #[derive(serde::Serialize)]
    struct IdMapFile<'a> {
        version: u32,
        mapping: &'a [IdMap],
    }

    let dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let base = log_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "session".to_string());
    let map_path = dir.join(format!("{}_idmap_{}.json", base, Uuid::new_v4()));

    let data = serde_json::to_vec(&IdMapFile { version: 1, mapping })
        .context("failed to encode segment ID mapping")?;
    file_utils::atomic_write(&map_path, &data)?;

    let digest: [u8; 32] = Sha256::digest(&data).into();
    info!(
        "Segment ID mapping saved: mapping_path={} mapping_count={} mapping_hash=sha256:{}",
        map_path.display(),
        mapping.len(),
        hex_encode(&digest)
    );
    Ok(())
}

fn resolve_names_mapping(
    cfg: &Config,
    src_lang: &'static Language,
    tgt_lang: &'static Language,
) -> Result<std::collections::BTreeMap<String, String>> {
    if !cfg.names_mapping.is_empty() {
        return Ok(cfg.names_mapping.clone());
    }
    match &cfg.names_path {
        Some(path) => names::load_mapping_file(path, src_lang.code, tgt_lang.code),
        None => Ok(Default::default()),
    }
}

pub(crate) fn lookup_language(code: &str, role: &str) -> Result<&'static Language> {
    get_language(code).ok_or_else(|| anyhow!("unsupported {} language: {}", role, code))
}

pub(crate) fn check_supported_extension(path: &Path) -> Result<()> {
    if !is_supported_extension(path) {
        return Err(anyhow!("unsupported subtitle extension: {}", path.display()));
    }
    Ok(())
}

pub(crate) fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir().context("failed to resolve current directory")?;
        Ok(cwd.join(path))
    }
}

/// Input and output must not be the same file, neither by path nor by
/// inode identity when both exist.
fn check_paths_distinct(abs_in: &Path, abs_out: &Path) -> Result<()> {
    if abs_in == abs_out {
        return Err(anyhow!("input and output files are the same ({})", abs_in.display()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(in_meta), Ok(out_meta)) = (std::fs::metadata(abs_in), std::fs::metadata(abs_out))
        {
            if in_meta.dev() == out_meta.dev() && in_meta.ino() == out_meta.ino() {
                return Err(anyhow!(
                    "input and output files are the same ({})",
                    abs_in.display()
                ));
            }
        }
    }
    Ok(())
}
