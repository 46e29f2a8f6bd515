//! The lifecycle shared by every kind of test.
//!
//! A test is anything implementing [`TestCase`]. Its verdict, output and
//! timing live in a [`TestCaseState`] which it owns; the terminal transitions
//! on the state are how a test body records its result.

use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};
use lib::core::effects::Effects;
use lib::core::stopwatch::Stopwatch;
use lib::core::verdict::{EndTest, TestFlow, Verdict};
use tracing::{debug, error, info, warn};

/// The verdict, output and timing of a single test.
#[derive(Debug)]
pub struct TestCaseState {
    name: String,
    description: String,
    effects: Effects,
    stopwatch: Stopwatch,
    verdict: Verdict,
    output: String,

    /// Set by every transition except [`TestCaseState::add_failure`]. Until
    /// then the verdict, including an accumulating `Fail`, may still change.
    finalized: bool,
}

impl TestCaseState {
    /// Constructor. Everything the test writes to `effects` is prefixed with
    /// its name.
    pub fn new(effects: &Effects, name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            effects: effects.with_prefix(&name),
            name,
            description: description.into(),
            stopwatch: Stopwatch::new(),
            verdict: Verdict::Pending,
            output: String::new(),
            finalized: false,
        }
    }

    /// The short identifier of the test.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The human-readable description of the test.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Output handle whose lines are prefixed with the test name.
    pub fn effects(&self) -> &Effects {
        &self.effects
    }

    /// The current verdict.
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// The accumulated message.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// When the test was started, if it has been.
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.stopwatch.start_time()
    }

    /// How long the test has run for. Zero if it was never started; the
    /// final duration once it has reached a verdict.
    pub fn elapsed(&self) -> Duration {
        self.stopwatch.elapsed()
    }

    /// Start the timer.
    pub fn start(&mut self) {
        self.log_dbg("starting");
        self.stopwatch.start();
    }

    /// Stop the timer. Only the first call after [`TestCaseState::start`]
    /// has an effect.
    pub fn finish(&mut self) {
        self.stopwatch.stop();
    }

    fn set_terminal(&mut self, verdict: Verdict, output: Option<String>) -> bool {
        if self.finalized {
            warn!(
                test = %self.name,
                current = %self.verdict,
                requested = %verdict,
                "Test already has a verdict, ignoring"
            );
            return false;
        }
        self.verdict = verdict;
        if let Some(output) = output {
            self.output = output;
        }
        self.finalized = true;
        self.finish();
        true
    }

    /// Record a pass. Execution may continue.
    pub fn success(&mut self) {
        self.set_terminal(Verdict::Pass, None);
    }

    /// Record a warning with `msg` as the output. Execution may continue.
    pub fn warning(&mut self, msg: impl Into<String>) {
        self.set_terminal(Verdict::Warning, Some(msg.into()));
    }

    /// Record an error with `msg` as the output. Always returns
    /// `Err(EndTest)`.
    pub fn error(&mut self, msg: impl Into<String>) -> TestFlow {
        self.set_terminal(Verdict::Error, Some(msg.into()));
        Err(EndTest)
    }

    /// Record a skip with `msg` as the output. Always returns
    /// `Err(EndTest)`.
    pub fn skip(&mut self, msg: impl Into<String>) -> TestFlow {
        self.set_terminal(Verdict::Skip, Some(msg.into()));
        Err(EndTest)
    }

    /// Record a failure without ending the test. Messages accumulate,
    /// newline-separated, across calls.
    pub fn add_failure(&mut self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        if self.finalized {
            warn!(
                test = %self.name,
                current = %self.verdict,
                "Test already has a verdict, ignoring failure"
            );
            return;
        }
        if self.verdict == Verdict::Fail && !self.output.is_empty() {
            self.output.push('\n');
            self.output.push_str(msg);
        } else {
            self.verdict = Verdict::Fail;
            self.output = msg.to_string();
        }
    }

    /// Record a failure and end the test. Always returns `Err(EndTest)`.
    pub fn add_failure_end_test(&mut self, msg: impl AsRef<str>) -> TestFlow {
        let was_finalized = self.finalized;
        self.add_failure(msg);
        if !was_finalized {
            self.finalized = true;
            self.finish();
        }
        Err(EndTest)
    }

    /// Record that the harness itself failed while running the test. Unlike
    /// the other transitions this overrides any verdict already recorded,
    /// since the recorded verdict may not have reached its destination.
    pub fn harness_error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        error!(test = %self.name, %msg, "Harness error");
        self.verdict = Verdict::Error;
        self.output = msg;
        self.finalized = true;
        self.finish();
    }

    /// Log an error attributed to this test.
    pub fn log_err(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        error!(test = %self.name, "{msg}");
        writeln!(self.effects.get_error_stream(), "{msg}").ok();
    }

    /// Log an informational message attributed to this test.
    pub fn log_info(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        info!(test = %self.name, "{msg}");
        writeln!(self.effects.get_output_stream(), "{msg}").ok();
    }

    /// Log a debugging message attributed to this test.
    pub fn log_dbg(&self, msg: impl AsRef<str>) {
        debug!(test = %self.name, "{}", msg.as_ref());
    }
}

/// A timed, verdict-bearing unit of work.
///
/// The orchestrator calls [`TestCase::run`] exactly once and then
/// [`TestCase::post_run`] exactly once, even if `run` ended early.
pub trait TestCase: Send {
    /// The state of this test.
    fn state(&self) -> &TestCaseState;

    /// The state of this test.
    fn state_mut(&mut self) -> &mut TestCaseState;

    /// Run the test in `worktree`, or in the configured source directory if
    /// `None`. The test must reach a verdict through its state before
    /// returning.
    ///
    /// The outer `Err` is for failures of the harness, such as a script
    /// which could not be started. These are never attributed to the patch
    /// under test.
    fn run(&mut self, worktree: Option<&Path>) -> eyre::Result<TestFlow>;

    /// Clean up and log after `run`.
    fn post_run(&mut self) -> eyre::Result<()>;
}
