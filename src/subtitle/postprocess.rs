/*!
 * Output shaping applied after translation.
 *
 * Two phases, in order: language-specific punctuation cleanup (optional),
 * then timing correction (always). Punctuation rules follow standard
 * cinematic subtitle conventions per target language and are fixpoints:
 * applying them twice changes nothing.
 */

use std::time::Duration;

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use super::segment::{format_timestamp, parse_timestamp, Segment};

static ELLIPSIS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{3}").unwrap());
static MULTI_SPACE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Minimum display duration for any cue, in seconds.
const MIN_DURATION_SECS: f64 = 0.8;
/// Gap enforced between adjacent cues.
const CUE_GAP: Duration = Duration::from_millis(5);
/// CPS fallback when a language profile carries no usable value.
const FALLBACK_CPS: u32 = 12;

/// Run punctuation cleanup (when `apply_lang_rules`) and timing correction.
pub fn postprocess_with_options(
    mut segments: Vec<Segment>,
    target_lang_code: &str,
    target_cps: u32,
    apply_lang_rules: bool,
) -> Vec<Segment> {
    if apply_lang_rules {
        let clean: Option<fn(&str) -> String> = match target_lang_code {
            "ko" => Some(clean_korean_line),
            "ja" => Some(clean_japanese_line),
            "zh-Hant" => Some(clean_traditional_chinese_line),
            "zh" | "zh-Hans" => Some(clean_simplified_chinese_line),
            _ => None,
        };
        if let Some(clean) = clean {
            for seg in &mut segments {
                seg.lines = seg
                    .lines
                    .iter()
                    .map(|line| clean(line))
                    .filter(|line| !line.is_empty())
                    .collect();
            }
        }
    }

    correct_timing(segments, target_cps)
}

fn clean_korean_line(line: &str) -> String {
    let line = ELLIPSIS_REGEX.replace_all(line, "…");
    let line: String = line.chars().filter(|c| *c != '<' && *c != '>').collect();
    let line = process_periods(&line);
    line.trim_end_matches(',').trim().to_string()
}

fn clean_japanese_line(line: &str) -> String {
    let line = ELLIPSIS_REGEX.replace_all(line, "…");
    // 読点: removed at line end, half-width space mid-line.
    let line = process_trailing_aware(&line, '、', Some(' '), &[' ', '　']);
    // 句点: removed at line end, full-width space mid-line.
    let line = process_trailing_aware(&line, '。', Some('　'), &[' ', '　']);
    line.trim().to_string()
}

fn clean_traditional_chinese_line(line: &str) -> String {
    let line = ELLIPSIS_REGEX.replace_all(line, "…");
    let line = process_ideographic_comma(&line);
    let line = process_chinese_comma(&line);
    let line = process_chinese_period(&line);
    let line = MULTI_SPACE_REGEX.replace_all(&line, " ");
    let line = line.replace("， ", "，");
    line.trim().to_string()
}

fn clean_simplified_chinese_line(line: &str) -> String {
    let line = ELLIPSIS_REGEX.replace_all(line, "…");
    let line = process_ideographic_comma(&line);
    let line = process_simplified_punctuation(&line);
    let line = MULTI_SPACE_REGEX.replace_all(&line, " ");
    line.trim().to_string()
}

/// Korean period handling: mid-line periods become commas, trailing periods
/// (possibly followed by spaces or trailing punctuation) are removed, and
/// multi-period runs, `3.14`, `a.b`, and `U.S.` style abbreviations are kept.
fn process_periods(line: &str) -> String {
    let runes: Vec<char> = line.chars().collect();
    let n = runes.len();
    let mut out = String::with_capacity(line.len());

    for i in 0..n {
        if runes[i] != '.' {
            out.push(runes[i]);
            continue;
        }
        if is_period_exception(&runes, i) {
            out.push('.');
            continue;
        }

        let is_end = runes[i + 1..]
            .iter()
            .all(|&c| c == ' ' || c == ',' || c == '!' || c == '?');
        if !is_end {
            out.push(',');
        }
    }
    out
}

/// Shared handling for CJK marks that vanish at line end and become a
/// replacement character mid-line, consuming any spaces that follow.
fn process_trailing_aware(line: &str, mark: char, mid_replacement: Option<char>, spaces: &[char]) -> String {
    let runes: Vec<char> = line.chars().collect();
    let n = runes.len();
    let mut out = String::with_capacity(line.len());

    let mut i = 0;
    while i < n {
        if runes[i] != mark {
            out.push(runes[i]);
            i += 1;
            continue;
        }

        // Scan the run of spaces after the mark.
        let mut j = i + 1;
        while j < n && spaces.contains(&runes[j]) {
            j += 1;
        }
        let is_end = j == n;

        if !is_end {
            if let Some(rep) = mid_replacement {
                out.push(rep);
            }
        }
        // Trailing spaces after the mark are consumed either way.
        i = j;
    }
    out
}

/// Ideographic comma: removed at line end, kept mid-line.
fn process_ideographic_comma(line: &str) -> String {
    let runes: Vec<char> = line.chars().collect();
    let n = runes.len();
    let mut out = String::with_capacity(line.len());

    for i in 0..n {
        if runes[i] != '、' {
            out.push(runes[i]);
            continue;
        }
        let is_end = runes[i + 1..].iter().all(|&c| c == ' ');
        if !is_end {
            out.push('、');
        }
    }
    out
}

/// Commas for Traditional Chinese: normalised to full-width, removed at line
/// end, with the `1,000` digit-grouping exception for the half-width form.
fn process_chinese_comma(line: &str) -> String {
    let runes: Vec<char> = line.chars().collect();
    let n = runes.len();
    let mut out = String::with_capacity(line.len());

    for i in 0..n {
        let r = runes[i];
        if r != ',' && r != '，' {
            out.push(r);
            continue;
        }
        if r == ',' && is_between_digits(&runes, i) {
            out.push(',');
            continue;
        }
        let is_end = runes[i + 1..].iter().all(|&c| c == ' ');
        if !is_end {
            out.push('，');
        }
    }
    out
}

/// Periods for Traditional Chinese: normalised to a full-width comma,
/// removed at line end, with the usual half-width exceptions.
fn process_chinese_period(line: &str) -> String {
    let runes: Vec<char> = line.chars().collect();
    let n = runes.len();
    let mut out = String::with_capacity(line.len());

    for i in 0..n {
        let r = runes[i];
        if r != '.' && r != '。' {
            out.push(r);
            continue;
        }
        if r == '.' && is_period_exception(&runes, i) {
            out.push('.');
            continue;
        }
        let is_end = runes[i + 1..].iter().all(|&c| c == ' ');
        if !is_end {
            out.push('，');
        }
    }
    out
}

/// Simplified Chinese replaces commas and periods with a half-width space
/// instead of a full-width comma.
fn process_simplified_punctuation(line: &str) -> String {
    let runes: Vec<char> = line.chars().collect();
    let n = runes.len();
    let mut out = String::with_capacity(line.len());

    for i in 0..n {
        let r = runes[i];
        if r != ',' && r != '，' && r != '.' && r != '。' {
            out.push(r);
            continue;
        }
        if (r == ',' || r == '.') && is_between_digits(&runes, i) {
            out.push(r);
            continue;
        }
        if r == '.' && is_period_exception(&runes, i) {
            out.push('.');
            continue;
        }
        let is_end = runes[i + 1..].iter().all(|&c| c == ' ');
        if !is_end {
            out.push(' ');
        }
    }
    out
}

fn is_period_exception(runes: &[char], idx: usize) -> bool {
    let n = runes.len();

    // Multi-period run (.. or ...).
    if (idx > 0 && runes[idx - 1] == '.') || (idx + 1 < n && runes[idx + 1] == '.') {
        return true;
    }
    // Decimal number (3.14).
    if is_between_digits(runes, idx) {
        return true;
    }
    // Domain or abbreviation (a.b).
    if idx > 0
        && idx + 1 < n
        && runes[idx - 1].is_ascii_alphabetic()
        && runes[idx + 1].is_ascii_alphabetic()
    {
        return true;
    }
    // Initialism (U.S.A.).
    if idx > 0 && runes[idx - 1].is_ascii_uppercase() {
        return true;
    }
    false
}

fn is_between_digits(runes: &[char], idx: usize) -> bool {
    idx > 0
        && idx + 1 < runes.len()
        && runes[idx - 1].is_ascii_digit()
        && runes[idx + 1].is_ascii_digit()
}

/// Ensure every cue is displayed long enough to read, then re-open the
/// mandatory gap between adjacent cues.
fn correct_timing(mut segments: Vec<Segment>, target_cps: u32) -> Vec<Segment> {
    if segments.is_empty() {
        return segments;
    }

    let target_cps = if target_cps == 0 { FALLBACK_CPS } else { target_cps };
    let mut invalid_timing = 0usize;

    for seg in &mut segments {
        let (start, end) = match (parse_timestamp(&seg.start_time), parse_timestamp(&seg.end_time)) {
            (Ok(s), Ok(e)) => (s, e),
            // Skip cues with damaged stamps rather than corrupt them.
            _ => {
                invalid_timing += 1;
                continue;
            }
        };

        let mut duration = end.as_secs_f64() - start.as_secs_f64();

        let total_chars: usize = seg
            .lines
            .iter()
            .map(|line| line.graphemes(true).count())
            .sum();

        if duration < MIN_DURATION_SECS {
            duration = MIN_DURATION_SECS;
        }
        let required = total_chars as f64 / target_cps as f64;
        if duration < required {
            duration = required;
        }

        let new_end = start + Duration::from_secs_f64(duration);
        seg.end_time = format_timestamp(new_end);
    }

    let mut invalid_overlap = 0usize;
    for i in 0..segments.len().saturating_sub(1) {
        let (curr_end, next_start) = match (
            parse_timestamp(&segments[i].end_time),
            parse_timestamp(&segments[i + 1].start_time),
        ) {
            (Ok(e), Ok(s)) => (e, s),
            _ => {
                invalid_overlap += 1;
                continue;
            }
        };

        let Some(target_end) = next_start.checked_sub(CUE_GAP) else {
            continue;
        };
        if curr_end > target_end {
            let Ok(curr_start) = parse_timestamp(&segments[i].start_time) else {
                continue;
            };
            // Never shrink a cue into a negative duration.
            if target_end >= curr_start {
                segments[i].end_time = format_timestamp(target_end);
            }
        }
    }

    if invalid_timing > 0 {
        warn!("Postprocess skipped segments with invalid timestamps: count={}", invalid_timing);
    }
    if invalid_overlap > 0 {
        warn!("Postprocess skipped overlap checks due to invalid timestamps: count={}", invalid_overlap);
    }
    segments
}
