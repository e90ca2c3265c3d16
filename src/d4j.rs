// src/d4j.rs
//
// Thin wrapper over the `defects4j` CLI. Returns raw stdout/stderr, never
// interprets them (that is classify.rs's job) and never retries.

use std::io;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use crate::classify::BUILD_FAIL_MARKER;
use crate::exec::{run_with_timeout, CommandOutcome};

/// `(stdout, stderr)`, or `("TIMEOUT", "TIMEOUT")` when the command was killed.
pub type Streams = (String, String);

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Checkout/compile/test operations on one bug's working directory.
pub trait BugHarness {
    /// Fetches the buggy revision into `dest`. Success is not reported here;
    /// a broken checkout shows up later as missing statistics.
    fn checkout(&self, project: &str, bug_id: &str, dest: &Path);

    fn compile(&self, dest: &Path, timeout: Duration) -> bool;

    fn run_full_suite(&self, dest: &Path, timeout: Duration) -> Streams;

    fn run_one_test(&self, dest: &Path, test: &str, timeout: Duration) -> Streams;

    fn list_trigger_tests(&self, dest: &Path, timeout: Duration) -> Streams;

    fn list_relevant_tests(&self, dest: &Path, timeout: Duration) -> Streams;
}

#[derive(Debug, Clone)]
pub struct Defects4j {
    bin: String,
    poll: Duration,
}

impl Defects4j {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            poll: POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    fn exec(&self, dest: &Path, args: &[&str], timeout: Duration) -> io::Result<CommandOutcome> {
        debug!(dir = %dest.display(), "{} {}", self.bin, args.join(" "));

        let mut cmd = Command::new(&self.bin);
        cmd.args(args).current_dir(dest);
        run_with_timeout(&mut cmd, timeout, self.poll)
    }

    fn run(&self, dest: &Path, args: &[&str], timeout: Duration) -> Streams {
        match self.exec(dest, args, timeout) {
            Ok(outcome) => {
                if outcome.timed_out() {
                    warn!(
                        dir = %dest.display(),
                        timeout_secs = timeout.as_secs(),
                        "{} {} timed out",
                        self.bin,
                        args.join(" ")
                    );
                }
                outcome.into_streams()
            }
            Err(e) => {
                warn!(dir = %dest.display(), "failed to start {}: {}", self.bin, e);
                (String::new(), e.to_string())
            }
        }
    }
}

impl BugHarness for Defects4j {
    fn checkout(&self, project: &str, bug_id: &str, dest: &Path) {
        let version = format!("{}b", bug_id);
        let dest = dest.canonicalize().unwrap_or_else(|_| dest.to_path_buf());
        let work_dir = dest.to_string_lossy();
        let _ = self.run(
            &dest,
            &["checkout", "-p", project, "-v", &version, "-w", &work_dir],
            CHECKOUT_TIMEOUT,
        );
    }

    fn compile(&self, dest: &Path, timeout: Duration) -> bool {
        match self.exec(dest, &["compile"], timeout) {
            Ok(CommandOutcome::Completed { status, stdout, stderr }) => {
                debug!(dir = %dest.display(), %status, "compile finished");
                !(stdout.contains(BUILD_FAIL_MARKER) || stderr.contains(BUILD_FAIL_MARKER))
            }
            Ok(CommandOutcome::TimedOut) => {
                warn!(dir = %dest.display(), "compile timed out");
                false
            }
            Err(e) => {
                warn!(dir = %dest.display(), "failed to start {}: {}", self.bin, e);
                false
            }
        }
    }

    fn run_full_suite(&self, dest: &Path, timeout: Duration) -> Streams {
        let (out, err) = self.run(dest, &["test", "-r"], timeout);
        if out.contains("Compilation failed") {
            warn!(dir = %dest.display(), "failed to compile tests");
        }
        (out, err)
    }

    fn run_one_test(&self, dest: &Path, test: &str, timeout: Duration) -> Streams {
        self.run(dest, &["test", "-t", test], timeout)
    }

    fn list_trigger_tests(&self, dest: &Path, timeout: Duration) -> Streams {
        self.run(dest, &["export", "-p", "tests.trigger"], timeout)
    }

    fn list_relevant_tests(&self, dest: &Path, timeout: Duration) -> Streams {
        self.run(dest, &["export", "-p", "tests.relevant"], timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use crate::exec::TIMEOUT_SENTINEL;

    /// Stand-in `defects4j` that echoes its arguments, or hangs on `test -t slow`.
    fn fake_tool(dir: &Path) -> String {
        let path = dir.join("defects4j");
        fs::write(
            &path,
            "#!/bin/sh\n\
             if [ \"$1\" = compile ] && [ -f broken ]; then echo 'Running ant (compile)....FAIL' >&2; exit 1; fi\n\
             if [ \"$1\" = test ] && [ \"$3\" = slow ]; then exec sleep 30; fi\n\
             echo \"args: $*\"\n\
             echo \"cwd: $(pwd)\"\n",
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn commands_run_inside_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let d4j = Defects4j::new(fake_tool(dir.path())).with_poll(Duration::from_millis(20));

        let (out, _) = d4j.run_one_test(dir.path(), "org.FooTest::testBar", Duration::from_secs(10));
        assert!(out.contains("args: test -t org.FooTest::testBar"));
        let cwd = dir.path().canonicalize().unwrap();
        assert!(out.contains(&format!("cwd: {}", cwd.display())));

        let (out, _) = d4j.list_trigger_tests(dir.path(), Duration::from_secs(10));
        assert!(out.contains("args: export -p tests.trigger"));
        let (out, _) = d4j.list_relevant_tests(dir.path(), Duration::from_secs(10));
        assert!(out.contains("args: export -p tests.relevant"));
        let (out, _) = d4j.run_full_suite(dir.path(), Duration::from_secs(10));
        assert!(out.contains("args: test -r"));
    }

    #[test]
    fn checkout_requests_buggy_version() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path());
        let log = dir.path().join("log");
        // wrap the fake so the checkout arguments land in a file
        let wrapper = dir.path().join("wrapper");
        fs::write(&wrapper, format!("#!/bin/sh\necho \"$*\" > {}\nexec {} \"$@\"\n", log.display(), tool)).unwrap();
        fs::set_permissions(&wrapper, fs::Permissions::from_mode(0o755)).unwrap();

        let d4j = Defects4j::new(wrapper.to_string_lossy()).with_poll(Duration::from_millis(20));
        let dest = dir.path().join("Lang_1");
        fs::create_dir_all(&dest).unwrap();
        d4j.checkout("Lang", "1", &dest);

        let args = fs::read_to_string(&log).unwrap();
        let expected = dest.canonicalize().unwrap();
        assert_eq!(args.trim(), format!("checkout -p Lang -v 1b -w {}", expected.display()));
    }

    #[test]
    fn compile_detects_fail_marker() {
        let dir = tempfile::tempdir().unwrap();
        let d4j = Defects4j::new(fake_tool(dir.path())).with_poll(Duration::from_millis(20));

        assert!(d4j.compile(dir.path(), Duration::from_secs(10)));
        fs::write(dir.path().join("broken"), "").unwrap();
        assert!(!d4j.compile(dir.path(), Duration::from_secs(10)));
    }

    #[test]
    fn slow_test_degrades_to_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let d4j = Defects4j::new(fake_tool(dir.path())).with_poll(Duration::from_millis(20));

        let (out, err) = d4j.run_one_test(dir.path(), "slow", Duration::from_millis(300));
        assert_eq!(out, TIMEOUT_SENTINEL);
        assert_eq!(err, TIMEOUT_SENTINEL);
    }

    #[test]
    fn missing_tool_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let d4j = Defects4j::new("/nonexistent/defects4j").with_poll(Duration::from_millis(20));

        let (out, err) = d4j.run_full_suite(dir.path(), Duration::from_secs(1));
        assert!(out.is_empty());
        assert!(!err.is_empty());
        assert!(!d4j.compile(dir.path(), Duration::from_secs(1)));
    }
}
