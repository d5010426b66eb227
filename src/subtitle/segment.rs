/*!
 * Canonical cue representation.
 *
 * Timestamps are kept in their canonical `HH:MM:SS,mmm` string form (hours
 * may exceed 23) so the document checksum is a pure function of the parsed
 * content and cues with damaged stamps can still flow through the pipeline
 * until timing correction skips them.
 */

use std::time::Duration;

use anyhow::{anyhow, Result};

/// A single subtitle cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// 1-based identifier, unique within a document. Dense after preprocessing.
    pub id: usize,
    /// Canonical `HH:MM:SS,mmm` offset.
    pub start_time: String,
    /// Canonical `HH:MM:SS,mmm` offset, never before `start_time`.
    pub end_time: String,
    /// Ordered text lines. Never empty strings after preprocessing.
    pub lines: Vec<String>,
}

impl Segment {
    pub fn new(id: usize, start_time: impl Into<String>, end_time: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            id,
            start_time: start_time.into(),
            end_time: end_time.into(),
            lines,
        }
    }
}

/// Parse a canonical subtitle timestamp into an offset from zero.
///
/// Strict format: `H+:MM:SS,mmm` with exactly three millisecond digits,
/// minutes and seconds below 60, unbounded hours.
pub fn parse_timestamp(s: &str) -> Result<Duration> {
    let (hms, ms_str) = s
        .split_once(',')
        .ok_or_else(|| anyhow!("invalid timestamp format: {}", s))?;

    if ms_str.len() != 3 {
        return Err(anyhow!("invalid millisecond format: {}", s));
    }
    let ms: u64 = ms_str
        .parse()
        .map_err(|_| anyhow!("invalid milliseconds: {}", s))?;

    let mut parts = hms.split(':');
    let (hours, minutes, seconds) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(sec), None) => (h, m, sec),
        _ => return Err(anyhow!("invalid time format: {}", s)),
    };

    let hours: u64 = hours.parse().map_err(|_| anyhow!("invalid hours: {}", s))?;
    let minutes: u64 = minutes.parse().map_err(|_| anyhow!("invalid minutes: {}", s))?;
    if minutes > 59 {
        return Err(anyhow!("invalid minutes: {}", s));
    }
    let seconds: u64 = seconds.parse().map_err(|_| anyhow!("invalid seconds: {}", s))?;
    if seconds > 59 {
        return Err(anyhow!("invalid seconds: {}", s));
    }

    Ok(Duration::from_millis(
        ((hours * 60 + minutes) * 60 + seconds) * 1_000 + ms,
    ))
}

/// Format an offset as a canonical subtitle timestamp.
pub fn format_timestamp(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1_000;
    let ms = total_ms % 1_000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, ms)
}

/// Check that a document is usable for translation: at least one segment,
/// at least one non-blank line somewhere, parseable timestamps, and no cue
/// ending before it starts.
pub fn validate_document(segments: &[Segment]) -> Result<()> {
    if segments.is_empty() {
        return Err(anyhow!("no subtitles found in file"));
    }

    let mut has_text = false;
    for (i, seg) in segments.iter().enumerate() {
        if seg.lines.iter().any(|line| !line.trim().is_empty()) {
            has_text = true;
        }

        let start = parse_timestamp(&seg.start_time)
            .map_err(|e| anyhow!("invalid start time at segment {} (ID {}): {}", i + 1, seg.id, e))?;
        let end = parse_timestamp(&seg.end_time)
            .map_err(|e| anyhow!("invalid end time at segment {} (ID {}): {}", i + 1, seg.id, e))?;
        if end < start {
            return Err(anyhow!(
                "end time is before start time at segment {} (ID {})",
                i + 1,
                seg.id
            ));
        }
    }

    if !has_text {
        return Err(anyhow!("file contains subtitles but no dialogue text"));
    }
    Ok(())
}
