/*!
 * Repair coordinator: deterministic resume of a partially failed session.
 *
 * Two gates protect the resume: the input file must hash to the value
 * recorded in the log, and re-running preprocessing with the logged flags
 * must reproduce the recorded segments checksum. Together they guarantee
 * that chunk index `i` in the log still denotes the same segments about to
 * be chunked. Only then are the failed chunks re-translated and spliced
 * over the preserved partial output.
 */

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::chunker;
use crate::file_utils;
use crate::names;
use crate::recovery;
use crate::subtitle::{
    postprocess_with_options, preprocess_with_mapping, segments_checksum_hex, validate_document,
    SubtitleCodec,
};
use crate::translator::Translator;

use super::config::Config;
use super::result::RepairResult;
use super::translation::{lookup_language, ModelClientFactory};

/// Execute the session repair pipeline.
pub async fn run_repair(
    cancel: &CancellationToken,
    cfg: Config,
    client_factory: ModelClientFactory<'_>,
    codec: &dyn SubtitleCodec,
) -> Result<RepairResult> {
    let log_path = cfg
        .log_path
        .clone()
        .ok_or_else(|| anyhow!("log file path is required for repair"))?;

    let (mut session, orig_hash) =
        recovery::load_session_log_with_hash(&log_path).context("failed to load recovery log")?;
    session.validate().context("invalid recovery log")?;

    let resolved_input = recovery::resolve_log_relative(&log_path, &session.input_path);
    if !resolved_input.exists() {
        return Err(anyhow!(
            "invalid recovery log: input file not found: {}",
            session.input_path
        ));
    }
    let resolved_output = recovery::resolve_log_relative(&log_path, &session.output_path);
    let resolved_names = if session.names_path.is_empty() {
        None
    } else {
        let path = recovery::resolve_log_relative(&log_path, &session.names_path);
        if !path.exists() {
            return Err(anyhow!(
                "invalid recovery log: names_path not found: {}",
                session.names_path
            ));
        }
        Some(path)
    };

    cfg.validate_repair_runtime().context("invalid configuration")?;
    file_utils::reject_symlink_path(&resolved_output)?;
    file_utils::reject_symlink_path(&log_path)?;

    // Gate 1: the input file must be byte-identical to the logged run.
    let mut segments = codec.load(&resolved_input)?;
    validate_document(&segments).context("invalid subtitle file")?;
    let input_hash = recovery::hash_file_hex(&resolved_input)
        .context("failed to compute input hash")?;
    if input_hash != session.input_hash {
        return Err(anyhow!(
            "input file content mismatch: expected {}, got {}",
            session.input_hash,
            input_hash
        ));
    }

    // Gate 2: preprocessing with the logged flags must reproduce the logged
    // segment state, so the chunk layout is identical.
    if !session.no_preprocess {
        let (cleaned, _) = preprocess_with_mapping(
            segments,
            &session.source_lang,
            &resolved_input,
            !session.no_lang_preprocess,
        );
        segments = cleaned;
    }
    let segments_checksum = segments_checksum_hex(&segments);
    if segments_checksum != session.segments_checksum {
        return Err(anyhow!(
            "segment checksum mismatch: expected {}, got {}",
            session.segments_checksum,
            segments_checksum
        ));
    }

    let src_lang = lookup_language(&session.source_lang, "source")?;
    let tgt_lang = lookup_language(&session.target_lang, "target")?;

    let client = client_factory(&session.model).context("failed to create model client")?;
    let mut translator = Translator::new(
        client,
        session.chunk_size,
        session.context_size,
        session.concurrency,
        cfg.retry_on_long_lines,
        src_lang,
        tgt_lang,
    )
    .context("failed to initialize translator")?;
    translator.set_prompt_cpl(!session.no_prompt_cpl);
    if let Some(names_path) = &resolved_names {
        let mapping = names::load_mapping_file(names_path, &session.source_lang, &session.target_lang)
            .context("failed to load names mapping")?;
        info!(
            "Loaded character name mapping: count={} path={}",
            mapping.len(),
            names_path.display()
        );
        translator.set_names_mapping(mapping);
    }

    // Seed results with the partial output so chunks that already succeeded
    // are preserved; otherwise fall back to re-translating everything, but
    // only with explicit permission.
    let mut results = segments.clone();
    let mut reuse_problem: Option<String> = None;
    match codec.load(&resolved_output) {
        Ok(current) if current.len() == segments.len() => results = current,
        Ok(current) => {
            reuse_problem = Some(format!(
                "segment count mismatch: expected {}, got {}",
                segments.len(),
                current.len()
            ));
        }
        Err(e) => reuse_problem = Some(format!("output parse failed: {:#}", e)),
    }

    let mut target_chunks = session.failed_chunks.clone();
    if let Some(reason) = reuse_problem {
        if !cfg.force_repair {
            return Err(anyhow!(
                "existing output could not be reused ({}). Enable force repair to ignore the existing output and re-translate",
                reason
            ));
        }
        warn!("Existing output unusable; re-translating all chunks: reason={}", reason);
        target_chunks = (0..chunker::total_chunks(segments.len(), session.chunk_size)).collect();
    }

    info!(
        "Starting repair: model={} failed_chunks={}",
        session.model,
        target_chunks.len()
    );
    let (translated, new_failed) = translator
        .translate_chunks(cancel, &segments, &target_chunks, cfg.on_progress.as_ref())
        .await;

    // Splice the chunks that succeeded in this run over the preserved seed.
    for &chunk_idx in &target_chunks {
        if new_failed.contains(&chunk_idx) {
            continue;
        }
        let start = chunk_idx * session.chunk_size;
        let end = (start + session.chunk_size).min(segments.len());
        results[start..end].clone_from_slice(&translated[start..end]);
    }

    if new_failed.is_empty() {
        info!("Repair finished: status=Success");

        let out_segments = if !session.no_postprocess {
            info!("Performing post-processing");
            postprocess_with_options(
                results,
                tgt_lang.code,
                tgt_lang.default_cps,
                !session.no_lang_postprocess,
            )
        } else {
            info!("Post-processing skipped");
            results
        };

        codec
            .save(&resolved_output, &out_segments)
            .context("failed to save output file")?;
        info!("Saved results: path={}", resolved_output.display());

        remove_log_if_unchanged(&log_path, orig_hash);
        Ok(RepairResult {
            model: session.model,
            usage: translator.usage(),
        })
    } else {
        let status = recovery::calculate_status(new_failed.len(), session.total_chunks);
        info!("Repair finished: status={}", status);

        session.failed_chunks = new_failed.clone();
        session.status = status.as_str().to_string();
        session.status_reason = if cancel.is_cancelled() {
            "canceled".to_string()
        } else {
            String::new()
        };
        match recovery::save_session_log(&log_path, &session) {
            Ok(path) => warn!("Partial repair - session log updated: path={}", path.display()),
            Err(e) => log::error!("Failed to update recovery log: error={:#}", e),
        }

        Err(anyhow!("repair finished with {} failed chunks", new_failed.len()))
    }
}

/// Delete the log after a fully successful repair, but only when its
/// on-disk bytes are unchanged since load; another process may have
/// rewritten it in the meantime.
fn remove_log_if_unchanged(log_path: &Path, orig_hash: [u8; 32]) {
    match recovery::hash_file(log_path) {
        Err(e) => warn!(
            "Failed to read session log for verification: path={} error={:#}",
            log_path.display(),
            e
        ),
        Ok(current) if current != orig_hash => warn!(
            "Session log content changed; skipping delete: path={}",
            log_path.display()
        ),
        Ok(_) => {
            if let Err(e) = fs::remove_file(log_path) {
                warn!(
                    "Failed to remove session log after success: path={} error={}",
                    log_path.display(),
                    e
                );
            }
        }
    }
}
