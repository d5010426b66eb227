/*!
 * Chunking of segment lists into model-request batches.
 *
 * Chunk indices are stable for equal inputs: the recovery log references
 * them, so a repair run on an unchanged document reproduces the same
 * layout. Chunks borrow from the segment list and must not outlive it.
 */

use crate::subtitle::Segment;

/// A contiguous batch of target segments plus read-only context windows.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Position in the chunk sequence (not the segment sequence).
    pub index: usize,
    /// Segments to translate.
    pub target: &'a [Segment],
    /// Up to `context_size` segments immediately before the target window.
    pub before: &'a [Segment],
    /// Up to `context_size` segments immediately after the target window.
    pub after: &'a [Segment],
}

/// Split segments into chunks of `chunk_size` with surrounding context.
pub fn split_into_chunks(segments: &[Segment], chunk_size: usize, context_size: usize) -> Vec<Chunk<'_>> {
    assert!(chunk_size > 0, "chunk_size must be greater than 0");

    let n = segments.len();
    let mut chunks = Vec::with_capacity(n.div_ceil(chunk_size));

    let mut start = 0;
    while start < n {
        let end = (start + chunk_size).min(n);
        let before_start = start.saturating_sub(context_size);
        let after_end = (end + context_size).min(n);

        chunks.push(Chunk {
            index: chunks.len(),
            target: &segments[start..end],
            before: &segments[before_start..start],
            after: &segments[end..after_end],
        });
        start = end;
    }

    chunks
}

/// Number of chunks a document of `n` segments splits into.
pub fn total_chunks(n: usize, chunk_size: usize) -> usize {
    n.div_ceil(chunk_size)
}
