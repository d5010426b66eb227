/*!
 * Canonical segments checksum.
 *
 * Recovery logs bind chunk indices to a specific post-preprocess document
 * state through this checksum. The serialisation is bit-exact across
 * platforms: every field is length-prefixed, so no content can alias the
 * framing.
 */

use sha2::{Digest, Sha256};

use super::segment::Segment;

/// SHA-256 over the canonical serialisation of a segment list.
///
/// Layout (UTF-8, `\n` is a single newline byte):
/// ```text
/// segments_v1\n
/// <N>\n
/// per segment:
///   <len(start)>:<start>\n
///   <len(end)>:<end>\n
///   <len(lines)>\n
///   per line: <len(line)>:<line>\n
/// ```
pub fn segments_checksum(segments: &[Segment]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"segments_v1\n");
    hasher.update(segments.len().to_string().as_bytes());
    hasher.update(b"\n");
    for seg in segments {
        write_field(&mut hasher, &seg.start_time);
        write_field(&mut hasher, &seg.end_time);
        hasher.update(seg.lines.len().to_string().as_bytes());
        hasher.update(b"\n");
        for line in &seg.lines {
            write_field(&mut hasher, line);
        }
    }
    hasher.finalize().into()
}

/// `sha256:`-prefixed hex form of [`segments_checksum`].
pub fn segments_checksum_hex(segments: &[Segment]) -> String {
    format!("sha256:{}", hex_encode(&segments_checksum(segments)))
}

fn write_field(hasher: &mut Sha256, value: &str) {
    hasher.update(value.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    hasher.update(b"\n");
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
