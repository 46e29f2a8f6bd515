//! Runs the configured tests against patches and aggregates the results.

use std::collections::VecDeque;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use eyre::Context;
use itertools::Itertools;
use lib::core::config::TestDefinition;
use lib::core::effects::Effects;
use lib::core::metadata::{PatchRef, SeriesId};
use lib::core::verdict::Verdict;
use lib::util::ExitCode;
use tracing::{debug, error, instrument};

use crate::case::TestCase;
use crate::context::TestContext;
use crate::shell::ShellTestCase;

/// The result of a single test against a single patch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestOutcome {
    /// The name of the test.
    pub name: String,

    /// The verdict the test reached.
    pub verdict: Verdict,

    /// The message recorded with the verdict.
    pub output: String,

    /// When the test started.
    pub started_at: Option<DateTime<Local>>,

    /// How long the test ran for.
    pub elapsed: Duration,
}

/// The results of all tests against a single patch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchReport {
    /// The patch which was tested.
    pub patch: PatchRef,

    /// One outcome per test, in the order the tests ran.
    pub outcomes: Vec<TestOutcome>,
}

impl PatchReport {
    /// The number of tests which reached `verdict`.
    pub fn count(&self, verdict: Verdict) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.verdict == verdict)
            .count()
    }

    /// Whether any test failed or errored. Warnings and skips don't count.
    pub fn is_failure(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.verdict.is_failure())
    }
}

fn get_icon(effects: &Effects, verdict: Verdict) -> String {
    let glyphs = effects.get_glyphs();
    let (icon, style) = match verdict {
        Verdict::Pass => (glyphs.checkmark, console::Style::new().green().bold()),
        Verdict::Warning | Verdict::Pending => {
            (glyphs.exclamation, console::Style::new().yellow().bold())
        }
        Verdict::Fail | Verdict::Error => (glyphs.cross, console::Style::new().red().bold()),
        Verdict::Skip => (glyphs.skipped, console::Style::new().dim()),
    };
    glyphs.paint(&style, icon)
}

/// Runs the lifecycle of a test to completion and converts the result into
/// an outcome.
///
/// A harness error returned from `run` marks the test as `Error`; it has not
/// been reported externally. `post_run` is always called.
#[instrument(skip(test_case), fields(test = %test_case.state().name()))]
pub fn run_test_case(test_case: &mut dyn TestCase, worktree: Option<&Path>) -> TestOutcome {
    test_case.state_mut().start();
    match test_case.run(worktree) {
        Ok(Ok(())) => {}
        Ok(Err(end_test)) => {
            debug!(%end_test, "Test ended early");
        }
        Err(err) => {
            let state = test_case.state_mut();
            state.log_err(format!("harness error: {err:#}"));
            state.harness_error(format!("{err:#}"));
        }
    }

    let state = test_case.state_mut();
    if !state.verdict().is_terminal() {
        state.log_err("test finished without a verdict");
        state.harness_error("test finished without a verdict");
    }
    state.finish();

    if let Err(err) = test_case.post_run() {
        error!(?err, "post_run failed");
        test_case
            .state()
            .log_err(format!("cleanup failed: {err:#}"));
    }

    let state = test_case.state();
    TestOutcome {
        name: state.name().to_string(),
        verdict: state.verdict(),
        output: state.output().to_string(),
        started_at: state.started_at(),
        elapsed: state.elapsed(),
    }
}

/// A patch to test, and the worktree to test it in.
#[derive(Clone, Debug)]
pub struct PatchJob {
    /// The patch to test.
    pub patch: PatchRef,

    /// Where to test it. `None` means the configured source directory.
    pub worktree: Option<PathBuf>,
}

type WorkQueue = Arc<Mutex<VecDeque<(usize, PatchJob)>>>;

/// Runs each configured test against each patch.
#[derive(Debug)]
pub struct Orchestrator<'a> {
    ctx: TestContext<'a>,
    tests: Vec<TestDefinition>,
}

impl<'a> Orchestrator<'a> {
    /// Constructor. `tests` run in the given order.
    pub fn new(ctx: TestContext<'a>, tests: Vec<TestDefinition>) -> Self {
        Self { ctx, tests }
    }

    /// Run every test against `patch`, one after another. A test ending
    /// early, or failing to run at all, does not stop the remaining tests.
    #[instrument(skip(self))]
    pub fn run_patch(&self, patch: PatchRef, worktree: Option<&Path>) -> PatchReport {
        self.run_patch_with_effects(&self.ctx, patch, worktree)
    }

    fn run_patch_with_effects(
        &self,
        ctx: &TestContext<'a>,
        patch: PatchRef,
        worktree: Option<&Path>,
    ) -> PatchReport {
        writeln!(ctx.effects.get_output_stream(), "Testing {patch}").ok();
        let outcomes = self
            .tests
            .iter()
            .map(|definition| {
                let mut test_case = ShellTestCase::new(ctx, patch, definition);
                run_test_case(&mut test_case, worktree)
            })
            .collect();
        PatchReport { patch, outcomes }
    }

    /// Run every test against every job, with up to `jobs` patches in
    /// parallel. Each patch is tested by a single thread. Reports are
    /// returned in the order of `patch_jobs`.
    #[instrument(skip(self))]
    pub fn run_series(
        &self,
        patch_jobs: &[PatchJob],
        jobs: usize,
    ) -> eyre::Result<Vec<PatchReport>> {
        let jobs = jobs.clamp(1, patch_jobs.len().max(1));
        if jobs == 1 {
            return Ok(patch_jobs
                .iter()
                .map(|PatchJob { patch, worktree }| self.run_patch(*patch, worktree.as_deref()))
                .collect());
        }

        let work_queue: WorkQueue = Arc::new(Mutex::new(
            patch_jobs.iter().cloned().enumerate().collect(),
        ));
        let mut results = crossbeam::thread::scope(|scope| {
            let (result_tx, result_rx) = channel();
            let mut workers = Vec::new();
            for worker_id in 1..=jobs {
                let work_queue = Arc::clone(&work_queue);
                let result_tx = result_tx.clone();
                workers.push(scope.spawn(move |_scope| {
                    debug!(?worker_id, "Worker spawned");
                    while let Some((index, PatchJob { patch, worktree })) = {
                        let mut work_queue = work_queue.lock().unwrap();
                        let job = work_queue.pop_front();
                        // Don't hold the lock while testing.
                        drop(work_queue);
                        job
                    } {
                        debug!(?worker_id, %patch, "Worker accepted job");
                        let ctx = TestContext {
                            effects: self
                                .ctx
                                .effects
                                .with_prefix(&format!("p{}", patch.patch_id)),
                            ..self.ctx.clone()
                        };
                        let report =
                            self.run_patch_with_effects(&ctx, patch, worktree.as_deref());
                        if result_tx.send((index, report)).is_err() {
                            break;
                        }
                    }
                    debug!(?worker_id, "Worker exiting");
                }));
            }
            drop(result_tx);

            let results: Vec<(usize, PatchReport)> = result_rx.iter().collect();
            for (worker_id, worker) in workers.into_iter().enumerate() {
                worker
                    .join()
                    .map_err(|_err| eyre::eyre!("Waiting for worker {} to exit", worker_id + 1))?;
            }
            Ok::<_, eyre::Report>(results)
        })
        .map_err(|_| eyre::eyre!("Could not spawn workers"))?
        .wrap_err("Failed waiting on workers")?;

        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, report)| report).collect())
    }
}

/// Print one line per test and a tally for each report.
pub fn print_summary(effects: &Effects, reports: &[PatchReport]) -> eyre::Result<()> {
    for report in reports {
        writeln!(effects.get_output_stream(), "Results for {}:", report.patch)?;
        for outcome in &report.outcomes {
            writeln!(
                effects.get_output_stream(),
                "{} {} ({}) in {:.2}s",
                get_icon(effects, outcome.verdict),
                outcome.name,
                outcome.verdict,
                outcome.elapsed.as_secs_f64(),
            )?;
        }
        writeln!(
            effects.get_output_stream(),
            "{} passed, {} warnings, {} failed, {} skipped",
            report.count(Verdict::Pass),
            report.count(Verdict::Warning),
            report.count(Verdict::Fail) + report.count(Verdict::Error),
            report.count(Verdict::Skip),
        )?;
    }
    Ok(())
}

/// Render reports as a Markdown comment for a pull request.
pub fn render_pr_comment(series_id: SeriesId, reports: &[PatchReport]) -> String {
    let mut comment = format!("### patchwork-ci results for series {series_id}\n\n");
    comment.push_str("| Patch | Test | Result |\n");
    comment.push_str("|---|---|---|\n");
    for report in reports {
        for outcome in &report.outcomes {
            comment.push_str(&format!(
                "| {} | {} | {} |\n",
                report.patch.patch_id, outcome.name, outcome.verdict
            ));
        }
    }
    let failing = reports
        .iter()
        .flat_map(|report| {
            report
                .outcomes
                .iter()
                .filter(|outcome| outcome.verdict.is_failure())
                .map(move |outcome| format!("p{}-{}", report.patch.patch_id, outcome.name))
        })
        .join(", ");
    if !failing.is_empty() {
        comment.push_str(&format!("\nFailing: {failing}\n"));
    }
    comment
}

/// The exit code for a whole run: success if and only if no test failed or
/// errored on any patch.
pub fn exit_code_for_reports(reports: &[PatchReport]) -> ExitCode {
    if reports.iter().any(PatchReport::is_failure) {
        ExitCode(1)
    } else {
        ExitCode(0)
    }
}
