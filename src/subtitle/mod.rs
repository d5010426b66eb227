/*!
 * Subtitle document model and transformations.
 *
 * - `segment`: the canonical cue representation and timestamp handling
 * - `codec`: parsing and serialising subtitle files behind an injectable trait
 * - `checksum`: the canonical content checksum binding recovery logs to a
 *   preprocessed document state
 * - `preprocess`: rule-based cleaning applied before translation
 * - `postprocess`: punctuation normalisation and timing correction applied
 *   after translation
 */

pub mod checksum;
pub mod codec;
pub mod postprocess;
pub mod preprocess;
pub mod segment;

pub use checksum::{segments_checksum, segments_checksum_hex};
pub use codec::{is_supported_extension, SrtVttCodec, SubtitleCodec, SUPPORTED_EXTENSIONS};
pub use postprocess::postprocess_with_options;
pub use preprocess::{preprocess_with_mapping, IdMap};
pub use segment::{format_timestamp, parse_timestamp, validate_document, Segment};
