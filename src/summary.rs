// src/summary.rs
//
// pass@k over a directory of `-validated.jsonl` files.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::output::{read_results, OutputError};
use crate::state::Correctness;

pub const REPORTED_K: [usize; 4] = [1, 5, 20, 100];

#[derive(Debug, Clone, PartialEq)]
pub struct BugScore {
    pub file: PathBuf,
    /// Patches counted as samples.
    pub total: usize,
    /// Plausible patches with no failing relevant tests.
    pub correct: usize,
}

/// Unbiased pass@k estimate for `n` samples of which `c` are correct.
pub fn pass_at_k(n: usize, c: usize, k: usize) -> f64 {
    let k = k.min(n);
    if n - c.min(n) < k {
        return 1.0;
    }

    let miss: f64 = (n - c + 1..=n)
        .map(|i| 1.0 - k as f64 / i as f64)
        .product();
    1.0 - miss
}

pub fn score_file(path: &Path, prune_compilation: bool) -> Result<BugScore, OutputError> {
    let mut total = 0;
    let mut correct = 0;

    for (_, records) in read_results(path)? {
        for record in &records.patches {
            if prune_compilation && record.correctness == Correctness::Uncompilable {
                continue;
            }
            total += 1;
            if record.is_correct() {
                correct += 1;
            }
        }
    }

    Ok(BugScore {
        file: path.to_path_buf(),
        total,
        correct,
    })
}

/// Scores every result file under `dir`; unreadable files are logged and skipped.
pub fn collect_scores(dir: &Path, prune_compilation: bool) -> Vec<BugScore> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();

    files
        .iter()
        .filter_map(|path| match score_file(path, prune_compilation) {
            Ok(score) => Some(score),
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

/// Mean pass@k, dividing by `total_bugs` (bugs without a result file count as 0).
pub fn average_pass_at_k(scores: &[BugScore], k: usize, total_bugs: usize) -> f64 {
    if total_bugs == 0 {
        return 0.0;
    }
    let sum: f64 = scores.iter().map(|s| pass_at_k(s.total, s.correct, k)).sum();
    sum / total_bugs as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn pass_at_k_edges() {
        assert!(close(pass_at_k(10, 0, 1), 0.0));
        assert!(close(pass_at_k(10, 10, 1), 1.0));
        assert!(close(pass_at_k(10, 1, 1), 0.1));
        assert!(close(pass_at_k(5, 1, 5), 1.0));
        assert!(close(pass_at_k(0, 0, 1), 0.0));
        // 1 - C(8,2)/C(10,2) = 1 - 28/45
        assert!(close(pass_at_k(10, 2, 2), 1.0 - 28.0 / 45.0));
    }

    fn line(id: &str, verdicts: &[(&str, usize)]) -> String {
        let patches: Vec<String> = verdicts
            .iter()
            .map(|(v, rel)| {
                format!(
                    r#"{{"patch":"p","index":0,"correctness":"{v}","errors":[],"total_trigger":1,"passing_trigger":0,"total_relevant":1,"failing_relevant":{rel},"passing_tests":[],"failing_tests":[]}}"#
                )
            })
            .collect();
        format!("{{\"{id}\":{{\"patches\":[{}]}}}}\n", patches.join(","))
    }

    #[test]
    fn scores_count_plausible_without_relevant_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Lang_1-validated.jsonl");
        fs::write(
            &path,
            line(
                "Lang_1_A.java_1_1",
                &[("plausible", 0), ("plausible", 2), ("uncompilable", 0), ("wrong", 0)],
            ),
        )
        .unwrap();

        let s = score_file(&path, false).unwrap();
        assert_eq!((s.total, s.correct), (4, 1));
        let s = score_file(&path, true).unwrap();
        assert_eq!((s.total, s.correct), (3, 1));
    }

    #[test]
    fn averages_over_requested_bug_count() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Lang_1-validated.jsonl"),
            line("Lang_1_A.java_1_1", &[("plausible", 0)]),
        )
        .unwrap();
        fs::write(
            dir.path().join("Math_2-validated.jsonl"),
            line("Math_2_B.java_1_1", &[("wrong", 0)]),
        )
        .unwrap();
        fs::write(dir.path().join("broken.jsonl"), "not json\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scores = collect_scores(dir.path(), false);
        assert_eq!(scores.len(), 2);
        assert!(close(average_pass_at_k(&scores, 1, scores.len()), 0.5));
        assert!(close(average_pass_at_k(&scores, 1, 4), 0.25));
        assert!(close(average_pass_at_k(&scores, 1, 0), 0.0));
    }
}
