//! worker.rs
//!
//! Validates every candidate patch of one bug inside a private checkout.
//!
//! Setup → baseline → trials → emit. Trials run strictly one after another
//! because each one edits and restores the same working directory.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{error, info, info_span, warn};

use crate::apply::{self, ApplyError};
use crate::classify::{failing_tests, parse_listing, reported_failing_count, Classifier};
use crate::config::Config;
use crate::d4j::BugHarness;
use crate::output;
use crate::state::{
    BugFixture, BugTask, CandidatePatch, Correctness, RecordSet, SiteReport, SiteTask,
    ValidationRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to prepare working directory {path}: {source}")]
    Workspace { path: PathBuf, source: io::Error },

    #[error("failed to snapshot {path}: {source}")]
    Snapshot { path: PathBuf, source: io::Error },

    #[error("failed to restore {path}: {source}")]
    Restore { path: PathBuf, source: ApplyError },

    #[error("{0} differs from its original after restore")]
    RestoreMismatch(PathBuf),
}

#[derive(Debug)]
pub struct BugReport {
    pub bug: String,
    pub sites: Vec<SiteReport>,
    /// Candidates left unevaluated once the per-bug budget ran out.
    pub skipped: usize,
}

impl BugReport {
    pub fn record_count(&self) -> usize {
        self.sites.iter().map(|s| s.records.patches.len()).sum()
    }
}

pub struct Worker<'a> {
    cfg: &'a Config,
    harness: &'a dyn BugHarness,
    classifier: &'a dyn Classifier,
}

impl<'a> Worker<'a> {
    pub fn new(cfg: &'a Config, harness: &'a dyn BugHarness, classifier: &'a dyn Classifier) -> Self {
        Self {
            cfg,
            harness,
            classifier,
        }
    }

    /// Runs one bug end to end and writes its result file.
    ///
    /// A failed write is logged, not returned; the records are still handed back.
    pub fn validate_bug(&self, task: &BugTask) -> Result<BugReport, WorkerError> {
        let report = self.run(task)?;

        match output::write_results(&self.cfg.output_dir, &report.bug, &report.sites) {
            Ok(path) => info!(bug = %report.bug, file = %path.display(), "results written"),
            Err(e) => error!(bug = %report.bug, "failed to write results: {}", e),
        }

        Ok(report)
    }

    /// Setup, baseline and every trial, without touching the output directory.
    pub fn run(&self, task: &BugTask) -> Result<BugReport, WorkerError> {
        let bug = task.key();
        let _span = info_span!("bug", bug = %bug).entered();

        let work_dir = self.setup(task)?;
        let fixture = self.baseline(work_dir);

        let started = Instant::now();
        let budget = self.cfg.bug_budget();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut sites = Vec::with_capacity(task.sites.len());
        let mut skipped = 0;

        for site in &task.sites {
            let mut records = RecordSet::default();

            for candidate in &site.patches {
                if !seen.insert(candidate.patch.as_str()) {
                    continue;
                }
                if started.elapsed() >= budget {
                    skipped += 1;
                    continue;
                }

                let record = self.trial(&fixture, site, candidate)?;
                info!(
                    patch = %short_digest(&candidate.patch),
                    verdict = %record.correctness,
                    passing_trigger = record.passing_trigger,
                    total_trigger = record.total_trigger,
                    elapsed_secs = started.elapsed().as_secs(),
                    "patch validated"
                );
                records.patches.push(record);
            }

            sites.push(SiteReport {
                id: site.id.clone(),
                records,
            });
        }

        if skipped > 0 {
            warn!(skipped, budget_secs = budget.as_secs(), "time budget exhausted");
        }

        let report = BugReport { bug, sites, skipped };
        info!(records = report.record_count(), "bug finished");
        Ok(report)
    }

    /* ---------- setup ---------- */

    fn setup(&self, task: &BugTask) -> Result<PathBuf, WorkerError> {
        let dir = self.cfg.tmp_dir.join(task.key());
        clean_dir(&dir).map_err(|source| WorkerError::Workspace {
            path: dir.clone(),
            source,
        })?;
        let dir = dir.canonicalize().map_err(|source| WorkerError::Workspace {
            path: dir.clone(),
            source,
        })?;

        info!(dir = %dir.display(), "checking out {} {}", task.project, task.bug_id);
        self.harness.checkout(&task.project, &task.bug_id, &dir);

        if task.project.eq_ignore_ascii_case("mockito") {
            info!("Mockito needs a separate compilation");
            if !self.harness.compile(&dir, self.cfg.command_timeout()) {
                warn!("Mockito compilation reported a failure");
            }
        }

        Ok(dir)
    }

    /* ---------- baseline ---------- */

    fn baseline(&self, work_dir: PathBuf) -> BugFixture {
        let timeout = self.cfg.command_timeout();

        let started = Instant::now();
        let (out, _) = self.harness.run_full_suite(&work_dir, timeout);
        let baseline_secs = started.elapsed().as_secs();

        let failing = failing_tests(&out);
        if let Some(reported) = reported_failing_count(&out) {
            if reported != failing.len() {
                warn!(reported, parsed = failing.len(), "failing-test header disagrees with entries");
            }
        }

        let (trigger, _) = self.harness.list_trigger_tests(&work_dir, timeout);
        let (relevant, _) = self.harness.list_relevant_tests(&work_dir, timeout);

        let fixture = BugFixture {
            work_dir,
            trigger_tests: parse_listing(&trigger),
            relevant_tests: parse_listing(&relevant),
            failing_tests: failing,
            baseline_secs,
        };

        info!(
            failing = fixture.init_fail_num(),
            baseline_secs = fixture.baseline_secs,
            trigger = fixture.trigger_tests.len(),
            relevant = fixture.relevant_tests.len(),
            "baseline collected"
        );
        if fixture.init_fail_num() == 0 {
            warn!("buggy revision has no failing tests; every patch will be init-error");
        }

        fixture
    }

    /// Why this fixture cannot judge any patch, if it cannot.
    fn fixture_defect(&self, fixture: &BugFixture) -> Option<&'static str> {
        if fixture.init_fail_num() == 0 {
            Some("buggy revision has no failing tests")
        } else if self.cfg.tests.runs_trigger() && fixture.trigger_tests.is_empty() {
            Some("no trigger tests exported")
        } else {
            None
        }
    }

    /* ---------- trial ---------- */

    fn trial(
        &self,
        fixture: &BugFixture,
        site: &SiteTask,
        candidate: &CandidatePatch,
    ) -> Result<ValidationRecord, WorkerError> {
        let mut record = ValidationRecord::new(candidate, fixture);

        if let Some(reason) = self.fixture_defect(fixture) {
            record.errors.push(reason.to_string());
            return Ok(record);
        }

        let target = apply::resolve_target(&fixture.work_dir, &site.id.file_path);
        let original = match fs::read(&target) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %target.display(), "patch target unreadable: {}", e);
                record.errors.push(format!("failed to read {}: {}", target.display(), e));
                return Ok(record);
            }
        };

        let backup = match apply::apply(
            self.cfg.patch_granularity,
            &target,
            site.id.start_line,
            site.id.end_line,
            &candidate.patch,
        ) {
            Ok(backup) => backup,
            Err(e) => {
                warn!(file = %target.display(), "patch not applied: {}", e);
                record.errors.push(e.to_string());
                put_back(&target, &original)?;
                return Ok(record);
            }
        };

        self.run_tests(fixture, &mut record);

        let restored = apply::restore(&backup).map_err(|source| WorkerError::Restore {
            path: target.clone(),
            source,
        })?;
        verify_restored(&restored, &original)?;

        Ok(record)
    }

    fn run_tests(&self, fixture: &BugFixture, record: &mut ValidationRecord) {
        let mode = self.cfg.tests;
        let timeout = self.cfg.command_timeout();
        let dir = fixture.work_dir.as_path();
        let mut compiles = true;

        if mode.runs_trigger() {
            let mut verdict = Correctness::Plausible;

            for test in &fixture.trigger_tests {
                let (out, err) = self.harness.run_one_test(dir, test, timeout);
                let v = self.classifier.classify(&out, &err);

                if v == Correctness::Plausible {
                    record.passing_trigger += 1;
                    record.passing_tests.push(test.clone());
                } else {
                    record.failing_tests.push(test.clone());
                    record.errors.push(err);
                }
                if v.severity() > verdict.severity() {
                    verdict = v;
                }

                // a broken or non-compiling patch will not get better on the next test
                if v == Correctness::Uncompilable {
                    compiles = false;
                    break;
                }
                if v == Correctness::Wrong {
                    break;
                }
            }

            record.correctness = verdict;
        }

        if mode.runs_relevant() && compiles {
            let (out, err) = self.harness.run_full_suite(dir, timeout);
            let v = self.classifier.classify(&out, &err);
            let failing = failing_tests(&out);
            record.failing_relevant = failing.len();

            if !mode.runs_trigger() {
                record.correctness = v;
                if matches!(v, Correctness::Plausible | Correctness::Wrong) {
                    for test in &fixture.trigger_tests {
                        if failing.contains(test) {
                            record.failing_tests.push(test.clone());
                        } else {
                            record.passing_trigger += 1;
                            record.passing_tests.push(test.clone());
                        }
                    }
                }
            } else if matches!(v, Correctness::Timeout | Correctness::Uncompilable)
                && v.severity() > record.correctness.severity()
            {
                record.correctness = v;
            }

            if !failing.is_empty() {
                let fresh: Vec<String> = failing
                    .into_iter()
                    .filter(|t| !record.failing_tests.contains(t))
                    .collect();
                record.failing_tests.extend(fresh);
                record.errors.push(err);
            } else if matches!(v, Correctness::Timeout | Correctness::Uncompilable) {
                record.errors.push(err);
            }
        }
    }
}

/* ---------- helpers ---------- */

fn clean_dir(dir: &Path) -> io::Result<()> {
    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    } else {
        fs::create_dir_all(dir)
    }
}

/// Rewrites `target` from the snapshot if a failed apply left it changed.
fn put_back(target: &Path, original: &[u8]) -> Result<(), WorkerError> {
    let current = fs::read(target).map_err(|source| WorkerError::Snapshot {
        path: target.to_path_buf(),
        source,
    })?;
    if current != original {
        fs::write(target, original).map_err(|source| WorkerError::Restore {
            path: target.to_path_buf(),
            source: ApplyError::Write {
                path: target.to_path_buf(),
                source,
            },
        })?;
        verify_restored(target, original)?;
    }
    Ok(())
}

fn verify_restored(target: &Path, original: &[u8]) -> Result<(), WorkerError> {
    let now = fs::read(target).map_err(|source| WorkerError::Snapshot {
        path: target.to_path_buf(),
        source,
    })?;
    if now != original {
        return Err(WorkerError::RestoreMismatch(target.to_path_buf()));
    }
    Ok(())
}

/// First 12 hex chars of the patch's SHA-256, for log lines.
pub fn short_digest(patch: &str) -> String {
    let mut h = Sha256::new();
    h.update(patch.as_bytes());
    let mut s = hex::encode(h.finalize());
    s.truncate(12);
    s
}
