/*!
 * Subtitle file parsing and serialisation.
 *
 * The pipeline talks to subtitle formats through the `SubtitleCodec` trait
 * so format support can be swapped out. The bundled codec handles SRT and
 * WebVTT; the remaining recognised extensions are accepted by the path
 * checks but reported as unsupported by this codec at load/save time.
 */

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::file_utils;

use super::segment::{format_timestamp, parse_timestamp, Segment};

/// Extensions the pipeline accepts for input and output paths.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["srt", "vtt", "ttml", "stl", "ssa", "ass"];

/// True when the path carries a recognised subtitle extension.
pub fn is_supported_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Uniform segment stream over subtitle files.
pub trait SubtitleCodec: Send + Sync {
    /// Parse a subtitle file into segments with dense 1-based IDs.
    fn load(&self, path: &Path) -> Result<Vec<Segment>>;
    /// Serialise segments to a subtitle file, atomically.
    fn save(&self, path: &Path, segments: &[Segment]) -> Result<()>;
}

static SRT_TIMESTAMP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2,}):(\d{2}):(\d{2}),(\d{3})\s*-->\s*(\d{2,}):(\d{2}):(\d{2}),(\d{3})")
        .unwrap()
});

static VTT_TIMESTAMP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d{2,}):)?(\d{2}):(\d{2})\.(\d{3})\s*-->\s*(?:(\d{2,}):)?(\d{2}):(\d{2})\.(\d{3})")
        .unwrap()
});

/// Bundled codec for SRT and WebVTT documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct SrtVttCodec;

impl SubtitleCodec for SrtVttCodec {
    fn load(&self, path: &Path) -> Result<Vec<Segment>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read subtitle file: {}", path.display()))?;
        match extension_of(path)?.as_str() {
            "srt" => parse_srt(&content),
            "vtt" => parse_vtt(&content),
            other => Err(anyhow!("subtitle format not supported by this codec: .{}", other)),
        }
    }

    fn save(&self, path: &Path, segments: &[Segment]) -> Result<()> {
        let rendered = match extension_of(path)?.as_str() {
            "srt" => render_srt(segments)?,
            "vtt" => render_vtt(segments)?,
            other => {
                return Err(anyhow!("subtitle format not supported by this codec: .{}", other));
            }
        };
        file_utils::atomic_write(path, rendered.as_bytes())
    }
}

fn extension_of(path: &Path) -> Result<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .ok_or_else(|| anyhow!("subtitle path has no extension: {}", path.display()))
}

/// Parse SRT content. Entries are ordered by start time and renumbered so
/// IDs are always dense regardless of what the file claimed.
fn parse_srt(content: &str) -> Result<Vec<Segment>> {
    let mut entries: Vec<(Duration, Segment)> = Vec::new();

    let mut seq_seen = false;
    let mut times: Option<(Duration, Duration)> = None;
    let mut lines: Vec<String> = Vec::new();

    let flush = |seq_seen: &mut bool,
                     times: &mut Option<(Duration, Duration)>,
                     lines: &mut Vec<String>,
                     entries: &mut Vec<(Duration, Segment)>| {
        if let Some((start, end)) = times.take() {
            if !lines.is_empty() {
                entries.push((
                    start,
                    Segment::new(
                        0,
                        format_timestamp(start),
                        format_timestamp(end),
                        std::mem::take(lines),
                    ),
                ));
            }
        }
        *seq_seen = false;
        lines.clear();
    };

    for (line_no, raw) in content.lines().enumerate() {
        let trimmed = raw.trim_start_matches('\u{feff}').trim();

        if trimmed.is_empty() {
            flush(&mut seq_seen, &mut times, &mut lines, &mut entries);
            continue;
        }

        // A bare number opens a new entry.
        if !seq_seen && lines.is_empty() && times.is_none() && trimmed.parse::<usize>().is_ok() {
            seq_seen = true;
            continue;
        }

        if times.is_none() {
            if let Some(caps) = SRT_TIMESTAMP_REGEX.captures(trimmed) {
                let start = srt_caps_to_duration(&caps, 1);
                let end = srt_caps_to_duration(&caps, 5);
                match (start, end) {
                    (Ok(s), Ok(e)) => {
                        times = Some((s, e));
                        continue;
                    }
                    _ => warn!("Invalid timestamp at line {}: {}", line_no + 1, trimmed),
                }
            }
        }

        if times.is_some() {
            lines.push(trimmed.to_string());
        } else {
            warn!("Unexpected text before timestamp at line {}: {}", line_no + 1, trimmed);
        }
    }
    flush(&mut seq_seen, &mut times, &mut lines, &mut entries);

    if entries.is_empty() {
        return Err(anyhow!("no valid subtitle entries were found"));
    }

    entries.sort_by_key(|(start, _)| *start);
    Ok(renumber(entries))
}

fn srt_caps_to_duration(caps: &regex::Captures<'_>, start_idx: usize) -> Result<Duration> {
    let field = |i: usize| -> u64 {
        caps.get(start_idx + i)
            .map_or(0, |m| m.as_str().parse().unwrap_or(0))
    };
    let (h, m, s, ms) = (field(0), field(1), field(2), field(3));
    if m > 59 || s > 59 {
        return Err(anyhow!("invalid time components"));
    }
    Ok(Duration::from_millis(((h * 60 + m) * 60 + s) * 1_000 + ms))
}

/// Parse WebVTT content. Cue identifiers, NOTE/STYLE blocks, and cue
/// settings after the timestamp are tolerated and dropped.
fn parse_vtt(content: &str) -> Result<Vec<Segment>> {
    let mut entries: Vec<(Duration, Segment)> = Vec::new();
    let mut current: Option<(Duration, Duration, Vec<String>)> = None;
    let mut in_note = false;

    for raw in content.lines() {
        let trimmed = raw.trim_start_matches('\u{feff}').trim();

        if trimmed.is_empty() {
            if let Some((start, end, lines)) = current.take() {
                if !lines.is_empty() {
                    entries.push((
                        start,
                        Segment::new(0, format_timestamp(start), format_timestamp(end), lines),
                    ));
                }
            }
            in_note = false;
            continue;
        }

        if trimmed.starts_with("WEBVTT") {
            continue;
        }
        if trimmed.starts_with("NOTE") || trimmed.starts_with("STYLE") || trimmed.starts_with("REGION") {
            in_note = true;
            continue;
        }
        if in_note {
            continue;
        }

        if let Some(caps) = VTT_TIMESTAMP_REGEX.captures(trimmed) {
            let start = vtt_caps_to_duration(&caps, 1);
            let end = vtt_caps_to_duration(&caps, 5);
            current = Some((start, end, Vec::new()));
            continue;
        }

        if let Some((_, _, lines)) = current.as_mut() {
            lines.push(trimmed.to_string());
        }
        // Anything else (a cue identifier line) is dropped.
    }

    if let Some((start, end, lines)) = current.take() {
        if !lines.is_empty() {
            entries.push((
                start,
                Segment::new(0, format_timestamp(start), format_timestamp(end), lines),
            ));
        }
    }

    if entries.is_empty() {
        return Err(anyhow!("no valid subtitle entries were found"));
    }

    entries.sort_by_key(|(start, _)| *start);
    Ok(renumber(entries))
}

fn vtt_caps_to_duration(caps: &regex::Captures<'_>, start_idx: usize) -> Duration {
    let field = |i: usize| -> u64 {
        caps.get(start_idx + i)
            .map_or(0, |m| m.as_str().parse().unwrap_or(0))
    };
    let (h, m, s, ms) = (field(0), field(1), field(2), field(3));
    Duration::from_millis(((h * 60 + m) * 60 + s) * 1_000 + ms)
}

fn renumber(entries: Vec<(Duration, Segment)>) -> Vec<Segment> {
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (_, mut seg))| {
            seg.id = i + 1;
            seg
        })
        .collect()
}

fn render_srt(segments: &[Segment]) -> Result<String> {
    let mut out = String::new();
    for seg in segments {
        // Round-trip through the parser so damaged stamps fail loudly here
        // instead of producing an unreadable file.
        parse_timestamp(&seg.start_time)
            .and(parse_timestamp(&seg.end_time))
            .with_context(|| format!("segment {} has an invalid timestamp", seg.id))?;
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            seg.id,
            seg.start_time,
            seg.end_time,
            seg.lines.join("\n")
        ));
    }
    Ok(out)
}

fn render_vtt(segments: &[Segment]) -> Result<String> {
    let mut out = String::from("WEBVTT\n\n");
    for seg in segments {
        parse_timestamp(&seg.start_time)
            .and(parse_timestamp(&seg.end_time))
            .with_context(|| format!("segment {} has an invalid timestamp", seg.id))?;
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            seg.start_time.replace(',', "."),
            seg.end_time.replace(',', "."),
            seg.lines.join("\n")
        ));
    }
    Ok(out)
}
