//! Tests backed by an external shell script.
//!
//! The script is run as `bash <script>` in the worktree under test. Its exit
//! code is the verdict: `0` passes, [`WARNING_EXIT_CODE`] is a warning, and
//! anything else is a failure. On a warning or failure, the combined output
//! of the script is uploaded as an artifact and linked from the posted check.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::Context;
use lib::core::config::TestDefinition;
use lib::core::metadata::{ArtifactKind, PatchRef};
use lib::core::verdict::{TestFlow, Verdict};
use lib::process::{ProcessRunInfo, ProcessRunOpts};
use patchwork_ci_submit::ReportSink;
use tracing::instrument;

use crate::case::{TestCase, TestCaseState};
use crate::context::TestContext;

/// The exit code with which a script reports a warning rather than a
/// failure.
pub const WARNING_EXIT_CODE: i32 = 250;

/// The verdict for a script which exited with `exit_code`.
pub fn verdict_for_exit_code(exit_code: i32) -> Verdict {
    match exit_code {
        0 => Verdict::Pass,
        WARNING_EXIT_CODE => Verdict::Warning,
        _ => Verdict::Error,
    }
}

/// A test which runs a shell script.
#[derive(Debug)]
pub struct ShellTestCase<'a> {
    state: TestCaseState,
    patch: PatchRef,
    script: PathBuf,
    source_dir: PathBuf,
    shell: PathBuf,
    test_timeout: Duration,
    process_run_info: &'a ProcessRunInfo,
    sink: ReportSink<'a>,
}

impl<'a> ShellTestCase<'a> {
    /// Constructor. The script is resolved against the scripts directory of
    /// `ctx`.
    pub fn new(ctx: &TestContext<'a>, patch: PatchRef, definition: &TestDefinition) -> Self {
        let TestDefinition {
            name,
            description,
            script,
        } = definition;
        Self {
            state: TestCaseState::new(&ctx.effects, name.as_str(), description.as_str()),
            patch,
            script: ctx.scripts_dir.join(script),
            source_dir: ctx.source_dir.clone(),
            shell: ctx.shell.clone(),
            test_timeout: ctx.test_timeout,
            process_run_info: ctx.process_run_info,
            sink: ctx.sink,
        }
    }

    fn report(&self, artifact_url: Option<&str>) -> eyre::Result<()> {
        let verdict = self.state.verdict();
        let description = format!("{}: {}", self.state.description(), verdict);
        self.sink
            .submit_check(
                self.state.effects(),
                self.patch,
                self.state.name(),
                verdict,
                &description,
                artifact_url,
            )
            .wrap_err_with(|| format!("Posting check {} for {}", self.state.name(), self.patch))
    }

    fn upload_output(&self, kind: ArtifactKind, output: &str) -> eyre::Result<Option<String>> {
        self.sink
            .upload_artifact(
                self.state.effects(),
                self.patch,
                self.state.name(),
                kind,
                output,
            )
            .wrap_err_with(|| {
                format!(
                    "Uploading output of {} for {}",
                    self.state.name(),
                    self.patch
                )
            })
    }
}

impl TestCase for ShellTestCase<'_> {
    fn state(&self) -> &TestCaseState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TestCaseState {
        &mut self.state
    }

    #[instrument(skip(self), fields(test = %self.state.name(), patch = %self.patch))]
    fn run(&mut self, worktree: Option<&Path>) -> eyre::Result<TestFlow> {
        let working_directory = worktree.unwrap_or(&self.source_dir).to_path_buf();
        let args = [self.shell.clone().into_os_string(), OsString::from(&self.script)];
        let result = self
            .process_run_info
            .run(
                self.state.effects(),
                &args,
                &ProcessRunOpts {
                    working_directory: Some(working_directory),
                    timeout: Some(self.test_timeout),
                    ..Default::default()
                },
            )
            .wrap_err_with(|| format!("Running test script {:?}", self.script))?;
        self.state.log_dbg(format!(
            "script exited with code {} after {:.2}s",
            result.exit_code,
            result.elapsed_seconds()
        ));

        match verdict_for_exit_code(result.exit_code) {
            Verdict::Pass => {
                self.state.success();
                self.report(None)?;
                Ok(Ok(()))
            }
            Verdict::Warning => {
                let output = result.combined_output();
                self.state.warning(output.as_str());
                let url = self.upload_output(ArtifactKind::Warning, &output)?;
                self.report(url.as_deref())?;
                Ok(Ok(()))
            }
            _ => {
                let output = result.combined_output();
                let flow = self.state.error(output.as_str());
                let url = self.upload_output(ArtifactKind::Fail, &output)?;
                self.report(url.as_deref())?;
                Ok(flow)
            }
        }
    }

    fn post_run(&mut self) -> eyre::Result<()> {
        self.state.log_dbg(format!(
            "finished with verdict {} after {:.2}s",
            self.state.verdict(),
            self.state.elapsed().as_secs_f64()
        ));
        Ok(())
    }
}
