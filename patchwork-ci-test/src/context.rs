use std::path::PathBuf;
use std::time::Duration;

use lib::core::config::Config;
use lib::core::effects::Effects;
use lib::process::ProcessRunInfo;
use lib::util::get_bash;
use patchwork_ci_submit::ReportSink;

/// Everything a test needs from its surroundings.
#[derive(Clone, Debug)]
pub struct TestContext<'a> {
    /// Output handle for the run.
    pub effects: Effects,

    /// How to run external processes.
    pub process_run_info: &'a ProcessRunInfo,

    /// Where results are reported.
    pub sink: ReportSink<'a>,

    /// The directory tests run in when no worktree is given.
    pub source_dir: PathBuf,

    /// The directory test scripts are resolved against.
    pub scripts_dir: PathBuf,

    /// Hard limit on the run time of a single test script.
    pub test_timeout: Duration,

    /// The interpreter test scripts are run with.
    pub shell: PathBuf,
}

impl<'a> TestContext<'a> {
    /// Build a context from the loaded configuration.
    pub fn from_config(
        effects: &Effects,
        process_run_info: &'a ProcessRunInfo,
        sink: ReportSink<'a>,
        config: &Config,
    ) -> Self {
        Self {
            effects: effects.clone(),
            process_run_info,
            sink,
            source_dir: config.source_dir.clone(),
            scripts_dir: config.get_scripts_dir(),
            test_timeout: config.get_test_timeout(),
            shell: get_bash().unwrap_or_else(|| PathBuf::from("bash")),
        }
    }
}
