/*!
 * Character-name mapping files.
 *
 * A mapping file is a JSON array of objects keyed by the normalised source
 * and target language codes, e.g. `[{"ja": "桜", "ko": "사쿠라"}, ...]`.
 * The decoded map feeds the mandatory name dictionary in the system prompt
 * and is re-loaded during repair through the recovery log's `names_path`.
 */

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::language::get_language;

fn normalize_code(code: &str) -> Result<&'static str> {
    get_language(code)
        .map(|lang| lang.code)
        .ok_or_else(|| anyhow!("unsupported language: {}", code))
}

/// Encode a mapping into the on-disk JSON format.
pub fn encode_mappings(
    mapping: &BTreeMap<String, String>,
    source_code: &str,
    target_code: &str,
) -> Result<Vec<u8>> {
    let source_key = normalize_code(source_code)?;
    let target_key = normalize_code(target_code)?;

    let entries: Vec<BTreeMap<&str, &str>> = mapping
        .iter()
        .map(|(src, tgt)| BTreeMap::from([(source_key, src.as_str()), (target_key, tgt.as_str())]))
        .collect();
    serde_json::to_vec_pretty(&entries).context("failed to encode names mapping")
}

/// Decode a mapping file's bytes, requiring both language fields per entry.
pub fn decode_mappings(
    data: &[u8],
    source_code: &str,
    target_code: &str,
) -> Result<BTreeMap<String, String>> {
    let source_key = normalize_code(source_code)?;
    let target_key = normalize_code(target_code)?;

    let raw: Vec<BTreeMap<String, String>> =
        serde_json::from_slice(data).context("failed to decode names mapping")?;

    let mut mapping = BTreeMap::new();
    for entry in raw {
        let src = entry
            .get(source_key)
            .ok_or_else(|| anyhow!("missing source field {:?} in names mapping", source_key))?;
        let tgt = entry
            .get(target_key)
            .ok_or_else(|| anyhow!("missing target field {:?} in names mapping", target_key))?;
        mapping.insert(src.clone(), tgt.clone());
    }
    Ok(mapping)
}

/// Load and decode a mapping file.
pub fn load_mapping_file(
    path: &Path,
    source_code: &str,
    target_code: &str,
) -> Result<BTreeMap<String, String>> {
    let data = fs::read(path)
        .with_context(|| format!("failed to read names mapping file: {}", path.display()))?;
    decode_mappings(&data, source_code, target_code)
}
