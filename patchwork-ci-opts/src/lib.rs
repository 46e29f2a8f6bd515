//! The command-line options for `patchwork-ci`.

#![warn(missing_docs)]
#![warn(
    clippy::all,
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro
)]
#![allow(clippy::too_many_arguments, clippy::blocks_in_conditions)]

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};
use lib::core::metadata::{PatchId, SeriesId};

/// Whether to display terminal colors.
#[derive(Clone, Debug, ValueEnum)]
pub enum ColorSetting {
    /// Automatically determine whether to display colors from the terminal and environment variables.
    /// This is the default behavior.
    Auto,
    /// Always display terminal colors.
    Always,
    /// Never display terminal colors.
    Never,
}

/// Arguments which apply to all commands. Used during setup.
#[derive(Debug, Parser)]
pub struct GlobalArgs {
    /// Change to the given directory before executing the rest of the program.
    #[clap(value_parser, short = 'C', global = true)]
    pub working_directory: Option<PathBuf>,

    /// Read the configuration from this file instead of `.patchwork-ci.json`
    /// in the working directory.
    #[clap(value_parser, long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Flag to force enable or disable terminal colors.
    #[clap(value_parser, long = "color", value_enum, global = true)]
    pub color: Option<ColorSetting>,
}

/// Run the configured tests against patches and report the results.
#[derive(Debug, Parser)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct Opts {
    /// Global arguments.
    #[clap(flatten)]
    pub global_args: GlobalArgs,

    /// The `patchwork-ci` subcommand to run.
    #[clap(subcommand)]
    pub command: Command,
}

/// Arguments for `patchwork-ci run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// The series which the patches belong to. If not provided, it is
    /// extracted from `--pr-title`.
    #[clap(value_parser, short = 's', long = "series")]
    pub series: Option<SeriesId>,

    /// The patches to test, in order.
    #[clap(value_parser, short = 'p', long = "patch", required = true)]
    pub patches: Vec<PatchId>,

    /// Run the tests in this directory instead of the configured source
    /// directory. To test several patches in parallel, pass one worktree per
    /// patch.
    #[clap(value_parser, short = 'w', long = "worktree")]
    pub worktrees: Vec<PathBuf>,

    /// The title of the pull request which carries the series, of the form
    /// `[PW_SID:<series>] subject`.
    #[clap(value_parser, long = "pr-title")]
    pub pr_title: Option<String>,

    /// The pull request number to comment on when a test fails.
    #[clap(value_parser, long = "pr")]
    pub pr: Option<u64>,

    /// Don't post checks, upload artifacts, or comment on pull requests.
    /// Only log what would have been done.
    #[clap(action, short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// How many patches to test in parallel. The value `0` indicates to use
    /// all CPUs.
    #[clap(value_parser, short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// Only run the tests with these names.
    #[clap(value_parser, long = "only")]
    pub only: Vec<String>,
}

/// `patchwork-ci` subcommands.
#[derive(Debug, Parser)]
pub enum Command {
    /// Run the configured tests against each given patch and report the
    /// results to Patchwork.
    Run(RunArgs),

    /// Print the series ID carried in a pull request title.
    SeriesId {
        /// The pull request title.
        #[clap(value_parser)]
        title: String,
    },

    /// List the configured tests.
    List,
}

/// Carry out some rewrites on the command-line arguments for uniformity.
///
/// The executable may be invoked through a path or, on Windows, with an
/// `.exe` suffix. Normalize the first argument to `patchwork-ci` so that
/// usage messages are stable.
pub fn rewrite_args(args: Vec<OsString>) -> Vec<OsString> {
    let first_arg = match args.first() {
        None => return args,
        Some(first_arg) => first_arg.clone(),
    };

    let exe_path = PathBuf::from(first_arg);
    let exe_name = match exe_path.file_name().and_then(|arg| arg.to_str()) {
        Some(exe_name) => exe_name,
        None => return args,
    };
    let exe_name = exe_name
        .strip_suffix(std::env::consts::EXE_SUFFIX)
        .unwrap_or(exe_name);

    let mut new_args = vec![OsString::from(exe_name)];
    new_args.extend(args.into_iter().skip(1));
    new_args
}
