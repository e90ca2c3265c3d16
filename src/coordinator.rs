// src/coordinator.rs
//
// Fans bugs out over a bounded pool. Every task runs in its own worker
// process so a wedged build tool can be killed without taking the run down.

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::exec::wait_with_deadline;
use crate::state::BugTask;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What a worker process receives on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEnvelope {
    pub config: Config,
    pub task: BugTask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    TimedOut,
    Crashed(String),
}

pub trait TaskRunner: Send + Sync {
    fn run(&self, task: &BugTask) -> TaskOutcome;
}

/* ---------- subprocess runner ---------- */

/// Launches `program args...` per task and feeds it a `WorkerEnvelope`.
pub struct SubprocessRunner {
    program: PathBuf,
    args: Vec<String>,
    config: Config,
    poll: Duration,
}

impl SubprocessRunner {
    pub fn new(program: PathBuf, args: Vec<String>, config: Config) -> Self {
        Self {
            program,
            args,
            config,
            poll: POLL_INTERVAL,
        }
    }

    /// Re-invokes the running binary as `<exe> worker`.
    pub fn current_exe(config: Config) -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(exe, vec!["worker".to_string()], config))
    }
}

impl TaskRunner for SubprocessRunner {
    fn run(&self, task: &BugTask) -> TaskOutcome {
        let envelope = WorkerEnvelope {
            config: self.config.clone(),
            task: task.clone(),
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(p) => p,
            Err(e) => return TaskOutcome::Crashed(format!("failed to encode task: {}", e)),
        };

        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return TaskOutcome::Crashed(format!("failed to start worker: {}", e)),
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload) {
                warn!(bug = %task.key(), "worker did not accept its task: {}", e);
            }
        }

        match wait_with_deadline(&mut child, self.config.task_timeout(), self.poll) {
            Ok(Some(status)) if status.success() => TaskOutcome::Completed,
            Ok(Some(status)) => TaskOutcome::Crashed(format!("worker exited with {}", status)),
            Ok(None) => TaskOutcome::TimedOut,
            Err(e) => TaskOutcome::Crashed(format!("failed to wait for worker: {}", e)),
        }
    }
}

/* ---------- summary ---------- */

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub completed: Vec<String>,
    pub timed_out: Vec<String>,
    pub crashed: Vec<(String, String)>,
}

impl RunSummary {
    fn new() -> Self {
        let now = Local::now();
        Self {
            started_at: now,
            finished_at: now,
            completed: Vec::new(),
            timed_out: Vec::new(),
            crashed: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.timed_out.len() + self.crashed.len()
    }
}

/* ---------- coordinator ---------- */

pub struct Coordinator<'a, R: TaskRunner> {
    runner: &'a R,
    workers: usize,
}

impl<'a, R: TaskRunner> Coordinator<'a, R> {
    pub fn new(runner: &'a R, workers: usize) -> Self {
        Self {
            runner,
            workers: workers.max(1),
        }
    }

    /// Runs every task; results are logged in completion order.
    ///
    /// A task that times out or crashes is logged and skipped; nothing aborts
    /// the batch.
    pub fn validate(&self, tasks: Vec<BugTask>) -> RunSummary {
        let mut summary = RunSummary::new();
        let total = tasks.len();
        if total == 0 {
            info!("no bugs to validate");
            return summary;
        }

        let (task_tx, task_rx) = unbounded::<BugTask>();
        let (result_tx, result_rx) = unbounded::<(String, TaskOutcome, Duration)>();
        for task in tasks {
            let _ = task_tx.send(task);
        }
        drop(task_tx);

        let pool = self.workers.min(total);
        info!(bugs = total, workers = pool, "starting validation");

        thread::scope(|s| {
            for _ in 0..pool {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let runner = self.runner;

                s.spawn(move || {
                    for task in task_rx.iter() {
                        let bug = task.key();
                        info!(bug = %bug, candidates = task.candidate_count(), "bug started");

                        let started = Instant::now();
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner.run(&task)))
                            .unwrap_or_else(|payload| TaskOutcome::Crashed(panic_message(&*payload)));

                        if result_tx.send((bug, outcome, started.elapsed())).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (done, (bug, outcome, elapsed)) in result_rx.iter().enumerate() {
                let progress = format!("{}/{}", done + 1, total);
                let secs = elapsed.as_secs();
                match outcome {
                    TaskOutcome::Completed => {
                        info!(%progress, bug = %bug, elapsed_secs = secs, "bug completed");
                        summary.completed.push(bug);
                    }
                    TaskOutcome::TimedOut => {
                        warn!(%progress, bug = %bug, elapsed_secs = secs, "bug timed out, skipping");
                        summary.timed_out.push(bug);
                    }
                    TaskOutcome::Crashed(reason) => {
                        error!(%progress, bug = %bug, elapsed_secs = secs, "bug crashed: {}", reason);
                        summary.crashed.push((bug, reason));
                    }
                }
            }
        });

        summary.finished_at = Local::now();
        info!(
            completed = summary.completed.len(),
            timed_out = summary.timed_out.len(),
            crashed = summary.crashed.len(),
            started_at = %summary.started_at.format("%Y-%m-%d %H:%M:%S"),
            finished_at = %summary.finished_at.format("%Y-%m-%d %H:%M:%S"),
            "validation finished"
        );
        summary
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
