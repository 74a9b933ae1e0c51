use super::LoadOptions;
use crate::error::{Error, Result};
use crate::model::AllowListUser;
use std::fs;
use std::path::Path;

/// Loads a single JSON file of allowlist entries. Absent file yields
/// zero entries unless `allow_empty_file` is false, in which case it
/// fails with `NotFoundError`-equivalent (spec.md §4.1).
pub fn load_file(path: &str, options: &LoadOptions) -> Result<Vec<AllowListUser>> {
    if !Path::new(path).exists() {
        if options.allow_empty_file {
            return Ok(Vec::new());
        }
        return Err(Error::Load(format!("rule file not found: {path}")));
    }

    let metadata = fs::metadata(path).map_err(|e| Error::Load(format!("stat {path}: {e}")))?;
    if metadata.len() > options.max_file_size {
        return Err(Error::Load(format!(
            "rule file {path} exceeds max size ({} > {})",
            metadata.len(),
            options.max_file_size
        )));
    }

    let bytes = fs::read(path).map_err(|e| Error::Load(format!("read {path}: {e}")))?;
    parse_entries(&bytes).map_err(|e| Error::Load(format!("parse {path}: {e}")))
}

/// Expands `glob_pattern` non-recursively, sorted lexicographically by
/// filename, loading each match as an independent contribution and
/// concatenating the results (spec.md §4.1: "each file becomes an
/// independent source with incrementing priority" — here the caller
/// treats the whole directory as one source, and a parse error in one
/// file is skipped rather than failing the whole directory, matching
/// the Merge-mode failure policy for file sources).
pub fn load_dir(glob_pattern: &str, options: &LoadOptions) -> Result<Vec<AllowListUser>> {
    let mut paths: Vec<_> = glob::glob(glob_pattern)
        .map_err(|e| Error::Load(format!("invalid glob {glob_pattern}: {e}")))?
        .filter_map(|entry| entry.ok())
        .collect();
    paths.sort();

    let mut entries = Vec::new();
    for path in paths {
        let path_str = path.to_string_lossy().to_string();
        match load_file(&path_str, options) {
            Ok(mut file_entries) => entries.append(&mut file_entries),
            Err(err) => {
                tracing::warn!(path = %path_str, error = %err, "skipping unparsable rule file");
            }
        }
    }
    Ok(entries)
}

fn parse_entries(bytes: &[u8]) -> std::result::Result<Vec<AllowListUser>, serde_json::Error> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes)
}
