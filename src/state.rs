use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch_id::PatchId;

/* ---------- run options ---------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    Trigger,
    Relevant,
    All,
}

impl TestMode {
    pub fn runs_trigger(self) -> bool {
        matches!(self, TestMode::Trigger | TestMode::All)
    }

    pub fn runs_relevant(self) -> bool {
        matches!(self, TestMode::Relevant | TestMode::All)
    }
}

impl FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trigger" => Ok(TestMode::Trigger),
            "relevant" => Ok(TestMode::Relevant),
            "all" => Ok(TestMode::All),
            other => Err(format!("expected trigger | relevant | all, got '{}'", other)),
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestMode::Trigger => "trigger",
            TestMode::Relevant => "relevant",
            TestMode::All => "all",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchLevel {
    Line,
    File,
}

impl FromStr for PatchLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(PatchLevel::Line),
            "file" => Ok(PatchLevel::File),
            other => Err(format!("expected line | file, got '{}'", other)),
        }
    }
}

impl fmt::Display for PatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchLevel::Line => "line",
            PatchLevel::File => "file",
        })
    }
}

/* ---------- verdicts ---------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Correctness {
    Timeout,
    Uncompilable,
    Plausible,
    Wrong,
    InitError,
}

impl Correctness {
    pub fn as_str(self) -> &'static str {
        match self {
            Correctness::Timeout => "timeout",
            Correctness::Uncompilable => "uncompilable",
            Correctness::Plausible => "plausible",
            Correctness::Wrong => "wrong",
            Correctness::InitError => "init-error",
        }
    }

    /// Severity used when folding several trigger-test verdicts into one.
    pub fn severity(self) -> u8 {
        match self {
            Correctness::Plausible => 0,
            Correctness::Timeout => 1,
            Correctness::Wrong => 2,
            Correctness::Uncompilable => 3,
            Correctness::InitError => 4,
        }
    }
}

impl fmt::Display for Correctness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* ---------- input ---------- */

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidatePatch {
    pub patch: String,
    #[serde(default = "empty_index")]
    pub index: Value,
}

fn empty_index() -> Value {
    Value::String(String::new())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    #[serde(default)]
    pub patches: Vec<CandidatePatch>,
}

/// One patch site of a bug together with its candidates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteTask {
    pub id: PatchId,
    pub patches: Vec<CandidatePatch>,
}

/// Everything a worker needs to validate one bug.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BugTask {
    pub project: String,
    pub bug_id: String,
    pub sites: Vec<SiteTask>,
}

impl BugTask {
    pub fn key(&self) -> String {
        format!("{}_{}", self.project, self.bug_id)
    }

    pub fn candidate_count(&self) -> usize {
        self.sites.iter().map(|s| s.patches.len()).sum()
    }

    /// Groups patch sites by bug, keeping first-appearance order.
    pub fn group(entries: Vec<(PatchId, CandidateSet)>) -> Vec<BugTask> {
        let mut tasks: Vec<BugTask> = Vec::new();

        for (id, set) in entries {
            let key = id.bug_key();
            let site = SiteTask {
                id: id.clone(),
                patches: set.patches,
            };

            match tasks.iter_mut().find(|t| t.key() == key) {
                Some(task) => task.sites.push(site),
                None => tasks.push(BugTask {
                    project: id.project.clone(),
                    bug_id: id.bug_id.clone(),
                    sites: vec![site],
                }),
            }
        }

        tasks
    }
}

/* ---------- fixture ---------- */

#[derive(Clone, Debug)]
pub struct BugFixture {
    pub work_dir: PathBuf,
    pub trigger_tests: Vec<String>,
    pub relevant_tests: Vec<String>,
    pub failing_tests: Vec<String>,
    pub baseline_secs: u64,
}

impl BugFixture {
    pub fn init_fail_num(&self) -> usize {
        self.failing_tests.len()
    }
}

/* ---------- output ---------- */

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub patch: String,
    pub index: Value,
    pub correctness: Correctness,
    pub errors: Vec<String>,
    pub total_trigger: usize,
    pub passing_trigger: usize,
    pub total_relevant: usize,
    pub failing_relevant: usize,
    pub passing_tests: Vec<String>,
    pub failing_tests: Vec<String>,
}

impl ValidationRecord {
    pub fn new(candidate: &CandidatePatch, fixture: &BugFixture) -> Self {
        Self {
            patch: candidate.patch.clone(),
            index: candidate.index.clone(),
            correctness: Correctness::InitError,
            errors: Vec::new(),
            total_trigger: fixture.trigger_tests.len(),
            passing_trigger: 0,
            total_relevant: fixture.relevant_tests.len(),
            failing_relevant: 0,
            passing_tests: Vec::new(),
            failing_tests: Vec::new(),
        }
    }

    /// Correct for pass@k purposes: plausible with no residual relevant failures.
    pub fn is_correct(&self) -> bool {
        self.correctness == Correctness::Plausible && self.failing_relevant == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub patches: Vec<ValidationRecord>,
}

/// Validated records of one patch site, as written to a result line.
#[derive(Clone, Debug)]
pub struct SiteReport {
    pub id: PatchId,
    pub records: RecordSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correctness_serializes_kebab_case() {
        let s = serde_json::to_string(&Correctness::InitError).unwrap();
        assert_eq!(s, "\"init-error\"");
        let back: Correctness = serde_json::from_str("\"uncompilable\"").unwrap();
        assert_eq!(back, Correctness::Uncompilable);
    }

    #[test]
    fn test_mode_selects_phases() {
        assert!(TestMode::Trigger.runs_trigger());
        assert!(!TestMode::Trigger.runs_relevant());
        assert!(TestMode::All.runs_trigger() && TestMode::All.runs_relevant());
        assert_eq!("RELEVANT".parse::<TestMode>(), Ok(TestMode::Relevant));
        assert!("both".parse::<TestMode>().is_err());
    }

    #[test]
    fn candidate_index_defaults_to_empty_string() {
        let c: CandidatePatch = serde_json::from_str(r#"{"patch":"x"}"#).unwrap();
        assert_eq!(c.index, Value::String(String::new()));
        let c: CandidatePatch = serde_json::from_str(r#"{"patch":"x","index":3}"#).unwrap();
        assert_eq!(c.index, Value::from(3));
    }

    #[test]
    fn group_merges_sites_of_same_bug_in_order() {
        let a: PatchId = "Lang_1_A.java_1_2".parse().unwrap();
        let b: PatchId = "Chart_4_B.java_3_3".parse().unwrap();
        let c: PatchId = "Lang_1_C.java_5_6".parse().unwrap();

        let tasks = BugTask::group(vec![
            (a, CandidateSet::default()),
            (b, CandidateSet::default()),
            (c.clone(), CandidateSet::default()),
        ]);

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].key(), "Lang_1");
        assert_eq!(tasks[0].sites.len(), 2);
        assert_eq!(tasks[0].sites[1].id, c);
        assert_eq!(tasks[1].key(), "Chart_4");
    }
}
