/*!
 * Rule-based cleaning applied before chunking.
 *
 * Order matters: format normalisation (VTT same-timestamp merge) runs first,
 * then per-line cleanup, then segment filtering, then dense reindexing. The
 * resulting ID remap is reported so callers can correlate output cues with
 * the original document.
 */

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::segment::Segment;

// Paired-bracket spans removed from Japanese sources. Fullwidth forms included.
static BRACKET_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]|（[^）]*）|［[^］]*］").unwrap());

/// Mapping from a post-preprocess internal ID to the original cue ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    pub internal_id: usize,
    pub original_id: usize,
}

/// Clean and filter segments, returning the surviving list (IDs reassigned
/// densely from 1) together with the internal→original ID mapping.
///
/// `source_path` selects format-specific normalisation: `.vtt` inputs first
/// have consecutive cues with identical timestamps merged in appearance
/// order. Bracket stripping and the letter-or-digit filter apply only when
/// `apply_lang_rules` is set and the source language is Japanese.
///
/// Preprocessing never fails; an input that cleans down to nothing simply
/// yields an empty list, which the pipeline rejects before chunking.
pub fn preprocess_with_mapping(
    segments: Vec<Segment>,
    source_lang_code: &str,
    source_path: &Path,
    apply_lang_rules: bool,
) -> (Vec<Segment>, Vec<IdMap>) {
    let segments = normalize_by_source_path(segments, source_path);
    let ja_rules = apply_lang_rules && source_lang_code == "ja";

    let mut cleaned: Vec<Segment> = Vec::with_capacity(segments.len());
    let mut original_ids: Vec<usize> = Vec::with_capacity(segments.len());

    for mut seg in segments {
        let mut new_lines = Vec::with_capacity(seg.lines.len());
        for line in &seg.lines {
            let mut cleaned_line = if ja_rules {
                let stripped = BRACKET_REGEX.replace_all(line, "");
                stripped.replace(['<', '>'], "")
            } else {
                line.clone()
            };
            cleaned_line = cleaned_line.trim().to_string();
            if !cleaned_line.is_empty() {
                new_lines.push(cleaned_line);
            }
        }

        if new_lines.is_empty() {
            continue;
        }
        if ja_rules && is_meaningless(&new_lines) {
            continue;
        }

        original_ids.push(seg.id);
        seg.lines = new_lines;
        cleaned.push(seg);
    }

    let mut mapping = Vec::with_capacity(cleaned.len());
    for (i, seg) in cleaned.iter_mut().enumerate() {
        seg.id = i + 1;
        mapping.push(IdMap {
            internal_id: seg.id,
            original_id: original_ids[i],
        });
    }

    (cleaned, mapping)
}

/// True when no line contains a letter or digit codepoint.
fn is_meaningless(lines: &[String]) -> bool {
    !lines
        .iter()
        .any(|line| line.chars().any(|c| c.is_alphanumeric()))
}

fn normalize_by_source_path(segments: Vec<Segment>, source_path: &Path) -> Vec<Segment> {
    let is_vtt = source_path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("vtt"))
        .unwrap_or(false);
    if !is_vtt {
        return segments;
    }
    merge_consecutive_same_timestamp(segments)
}

/// WebVTT renders simultaneous cues as separate entries; merge consecutive
/// cues that share both timestamps into one segment, lines in appearance
/// order. Non-consecutive matches stay separate.
fn merge_consecutive_same_timestamp(segments: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match merged.last_mut() {
            Some(last) if last.start_time == seg.start_time && last.end_time == seg.end_time => {
                last.lines.extend(seg.lines);
            }
            _ => merged.push(seg),
        }
    }
    merged
}
