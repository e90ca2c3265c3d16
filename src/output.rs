// src/output.rs
//
// Candidate-patch input and per-bug JSONL result files.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::patch_id::{PatchId, PatchIdError};
use crate::state::{BugTask, CandidateSet, RecordSet, SiteReport};

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{path}: expected a JSON object keyed by patch identifier")]
    NotAnObject { path: PathBuf },

    #[error("{path}: {source}")]
    PatchId {
        path: PathBuf,
        source: PatchIdError,
    },
}

pub fn result_file_name(bug_key: &str) -> String {
    format!("{}-validated.jsonl", bug_key)
}

/// Loads `{<patch id>: {patches: [...]}}`, keeps the first `limit` entries in
/// file order, and groups them into one task per bug.
pub fn load_candidates(path: &Path, limit: Option<usize>) -> Result<Vec<BugTask>, OutputError> {
    let raw = fs::read_to_string(path).map_err(|source| OutputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let json_err = |source| OutputError::Json {
        path: path.to_path_buf(),
        source,
    };

    let root: Value = serde_json::from_str(&raw).map_err(json_err)?;
    let Value::Object(entries) = root else {
        return Err(OutputError::NotAnObject {
            path: path.to_path_buf(),
        });
    };

    let take = limit.unwrap_or(entries.len());
    let mut parsed = Vec::with_capacity(take.min(entries.len()));
    for (key, value) in entries.into_iter().take(take) {
        let id: PatchId = key.parse().map_err(|source| OutputError::PatchId {
            path: path.to_path_buf(),
            source,
        })?;
        let set: CandidateSet = serde_json::from_value(value).map_err(json_err)?;
        parsed.push((id, set));
    }

    Ok(BugTask::group(parsed))
}

/// Writes one line per patch site to `<output_dir>/<bug>-validated.jsonl`.
pub fn write_results(
    output_dir: &Path,
    bug_key: &str,
    sites: &[SiteReport],
) -> Result<PathBuf, OutputError> {
    let path = output_dir.join(result_file_name(bug_key));
    let write_err = |source| OutputError::Write {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(output_dir).map_err(write_err)?;

    let mut text = String::new();
    for site in sites {
        let mut line = Map::new();
        let records = serde_json::to_value(&site.records).map_err(|source| OutputError::Json {
            path: path.clone(),
            source,
        })?;
        line.insert(site.id.to_string(), records);
        text.push_str(&Value::Object(line).to_string());
        text.push('\n');
    }

    fs::write(&path, text).map_err(write_err)?;
    Ok(path)
}

/// Reads a result file back as `(patch id, records)` pairs.
pub fn read_results(path: &Path) -> Result<Vec<(String, RecordSet)>, OutputError> {
    let raw = fs::read_to_string(path).map_err(|source| OutputError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let json_err = |source| OutputError::Json {
        path: path.to_path_buf(),
        source,
    };

    let mut out = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let entries: Map<String, Value> = serde_json::from_str(line).map_err(json_err)?;
        for (key, value) in entries {
            let records: RecordSet = serde_json::from_value(value).map_err(json_err)?;
            out.push((key, records));
        }
    }

    Ok(out)
}
