//! Project test command for the `run_tests` step.

use std::path::Path;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::io::process::{CommandRunner, CommandSpec, ProcessOutcome};

/// Lines of output posted to the backend after a test run.
pub const SUMMARY_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestRun {
    /// No command configured.
    Skipped,
    Passed(ProcessOutcome),
    Failed(ProcessOutcome),
}

impl TestRun {
    pub fn is_failure(&self) -> bool {
        matches!(self, TestRun::Failed(_))
    }

    /// Full captured output, as saved to `tests.log`.
    pub fn log_text(&self) -> String {
        match self {
            TestRun::Skipped => "no test command configured\n".to_string(),
            TestRun::Passed(outcome) | TestRun::Failed(outcome) => {
                let mut buf = format!("exit code: {:?}\n", outcome.exit_code);
                if outcome.timed_out {
                    buf.push_str("timed out\n");
                }
                buf.push_str("--- stdout ---\n");
                buf.push_str(&outcome.stdout);
                buf.push_str("\n--- stderr ---\n");
                buf.push_str(&outcome.stderr);
                buf.push('\n');
                buf
            }
        }
    }

    /// Short human-readable result plus the last lines of output.
    pub fn summary(&self) -> String {
        let summary = match self {
            TestRun::Skipped => "Tests skipped: no test command configured".to_string(),
            TestRun::Passed(outcome) => format!("Tests passed\n{}", tail(&outcome.stdout)),
            TestRun::Failed(outcome) => {
                let text = if outcome.stderr.trim().is_empty() {
                    &outcome.stdout
                } else {
                    &outcome.stderr
                };
                format!("Tests failed (exit code {:?})\n{}", outcome.exit_code, tail(text))
            }
        };
        summary.trim_end().to_string()
    }
}

/// Run `argv` inside `repo`. An empty `argv` is [`TestRun::Skipped`].
#[instrument(skip_all, fields(repo = %repo.display()))]
pub fn run_tests<R: CommandRunner>(
    runner: &R,
    argv: &[String],
    repo: &Path,
    timeout: Duration,
) -> TestRun {
    let Some((program, args)) = argv.split_first() else {
        info!("no test command configured");
        return TestRun::Skipped;
    };
    let spec = CommandSpec::new(program.clone(), args.iter().cloned())
        .cwd(repo)
        .timeout(timeout);
    info!(command = %spec.display(), "running tests");
    let outcome = runner.run(&spec);
    if outcome.success {
        TestRun::Passed(outcome)
    } else {
        warn!(exit_code = ?outcome.exit_code, timed_out = outcome.timed_out, "tests failed");
        TestRun::Failed(outcome)
    }
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(SUMMARY_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::process::SystemRunner;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_command_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = run_tests(&SystemRunner::default(), &[], temp.path(), Duration::from_secs(5));
        assert_eq!(run, TestRun::Skipped);
        assert!(!run.is_failure());
    }

    #[test]
    fn passing_command_runs_in_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker"), "").expect("marker");
        let run = run_tests(
            &SystemRunner::default(),
            &argv(&["sh", "-c", "test -f marker && echo ok"]),
            temp.path(),
            Duration::from_secs(10),
        );
        assert!(matches!(run, TestRun::Passed(_)));
        assert!(run.summary().starts_with("Tests passed\nok"));
    }

    #[test]
    fn failing_command_keeps_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = run_tests(
            &SystemRunner::default(),
            &argv(&["sh", "-c", "echo 'assertion failed' >&2; exit 1"]),
            temp.path(),
            Duration::from_secs(10),
        );
        assert!(run.is_failure());
        assert!(run.summary().contains("assertion failed"));
        assert!(run.log_text().contains("exit code: Some(1)"));
    }

    #[test]
    fn tail_keeps_last_lines() {
        let text: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let kept = tail(&text);
        assert_eq!(kept.lines().count(), SUMMARY_TAIL_LINES);
        assert!(kept.ends_with("line 29"));
    }
}
