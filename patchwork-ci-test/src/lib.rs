//! Run the configured tests against each patch of a Patchwork series and
//! report a verdict per test. Tests run as shell scripts, either in the
//! configured source directory or in one worktree per patch, optionally in
//! parallel.

#![warn(missing_docs)]
#![warn(
    clippy::all,
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro
)]
#![allow(clippy::too_many_arguments, clippy::blocks_in_conditions)]

pub mod case;
pub mod context;
pub mod orchestrator;
pub mod shell;

use std::fmt::Write;
use std::path::{Path, PathBuf};

use lib::core::config::Config;
use lib::core::effects::Effects;
use lib::core::metadata::{parse_series_id_from_pr_title, PatchId, PatchRef, SeriesId};
use lib::try_exit_code;
use lib::util::{ExitCode, EyreExitOr};
use patchwork_ci_invoke::CommandContext;
use patchwork_ci_opts::RunArgs;
use patchwork_ci_submit::github::GithubClient;
use patchwork_ci_submit::patchwork::PatchworkClient;
use patchwork_ci_submit::{
    CheckApi, GistApi, PrCommentApi, ReportSink, RetryPolicy, Unconfigured,
};
use tracing::instrument;

pub use lib::core::verdict::{EndTest, TestFlow, Verdict};

use crate::context::TestContext;
use crate::orchestrator::{
    exit_code_for_reports, print_summary, render_pr_comment, Orchestrator, PatchJob,
};

/// Load the configuration, reporting a malformed or missing file to the
/// user as an exit code.
pub fn load_config(effects: &Effects, config_path: &Path) -> EyreExitOr<Config> {
    match Config::load(config_path) {
        Ok(config) => Ok(Ok(config)),
        Err(err) => {
            writeln!(effects.get_error_stream(), "{err}")?;
            Ok(Err(ExitCode(1)))
        }
    }
}

/// Decide where each patch is tested and how many patches run at once.
///
/// With no worktree, every patch is tested in the source directory; with a
/// single worktree, every patch is tested there. Either way the patches run
/// one at a time. Otherwise there must be exactly one worktree per patch,
/// and `jobs` patches run in parallel (`0` meaning one per CPU).
pub fn plan_patch_jobs(
    series_id: SeriesId,
    patch_ids: &[PatchId],
    worktrees: &[PathBuf],
    jobs: Option<usize>,
) -> Result<(Vec<PatchJob>, usize), String> {
    let make_job = |patch_id, worktree: Option<&PathBuf>| PatchJob {
        patch: PatchRef {
            series_id,
            patch_id,
        },
        worktree: worktree.cloned(),
    };
    match worktrees {
        [] | [_] => {
            if jobs.is_some_and(|jobs| jobs != 1) {
                return Err(
                    "Testing patches in parallel requires one --worktree per patch".to_string(),
                );
            }
            let patch_jobs = patch_ids
                .iter()
                .map(|patch_id| make_job(*patch_id, worktrees.first()))
                .collect();
            Ok((patch_jobs, 1))
        }
        worktrees if worktrees.len() == patch_ids.len() => {
            let jobs = match jobs {
                None => 1,
                Some(0) => num_cpus::get_physical(),
                Some(jobs) => jobs,
            };
            let patch_jobs = patch_ids
                .iter()
                .zip(worktrees)
                .map(|(patch_id, worktree)| make_job(*patch_id, Some(worktree)))
                .collect();
            Ok((patch_jobs, jobs))
        }
        worktrees => Err(format!(
            "Got {} worktrees for {} patches; pass one worktree, or one per patch",
            worktrees.len(),
            patch_ids.len()
        )),
    }
}

/// `run` command.
#[instrument(skip(ctx))]
pub fn command_main(ctx: CommandContext, args: RunArgs) -> EyreExitOr<()> {
    let CommandContext {
        effects,
        process_run_info,
        config_path,
    } = ctx;
    let RunArgs {
        series,
        patches,
        worktrees,
        pr_title,
        pr,
        dry_run,
        jobs,
        only,
    } = args;

    let mut config = try_exit_code!(load_config(&effects, &config_path));
    if dry_run {
        config.dry_run = true;
    }

    let series_id = match (series, pr_title.as_deref()) {
        (Some(series_id), _) => series_id,
        (None, Some(pr_title)) => match parse_series_id_from_pr_title(pr_title) {
            Some(series_id) => series_id,
            None => {
                writeln!(
                    effects.get_error_stream(),
                    "Could not find a series ID in the pull request title: {pr_title:?}"
                )?;
                return Ok(Err(ExitCode(1)));
            }
        },
        (None, None) => {
            writeln!(
                effects.get_error_stream(),
                "A series is required: pass --series or --pr-title"
            )?;
            return Ok(Err(ExitCode(1)));
        }
    };

    let tests = if only.is_empty() {
        config.tests.clone()
    } else {
        if let Some(unknown) = only
            .iter()
            .find(|name| !config.tests.iter().any(|test| &test.name == *name))
        {
            writeln!(effects.get_error_stream(), "Unknown test: {unknown}")?;
            return Ok(Err(ExitCode(1)));
        }
        config
            .tests
            .iter()
            .filter(|test| only.contains(&test.name))
            .cloned()
            .collect()
    };

    let (patch_jobs, jobs) = match plan_patch_jobs(series_id, &patches, &worktrees, jobs) {
        Ok(plan) => plan,
        Err(message) => {
            writeln!(effects.get_error_stream(), "{message}")?;
            return Ok(Err(ExitCode(1)));
        }
    };

    let api_timeout = config.get_api_timeout();
    let check_api: Box<dyn CheckApi> = match &config.patchwork {
        Some(patchwork_config) => Box::new(PatchworkClient::new(
            &effects,
            &process_run_info,
            patchwork_config,
            api_timeout,
        )),
        None if config.dry_run => Box::new(Unconfigured {
            service: "patchwork",
        }),
        None => {
            writeln!(
                effects.get_error_stream(),
                "No \"patchwork\" section in {}; it is required unless running with --dry-run",
                config_path.display()
            )?;
            return Ok(Err(ExitCode(1)));
        }
    };
    let github_client = config.github.as_ref().map(|github_config| {
        GithubClient::new(&effects, &process_run_info, github_config, api_timeout)
    });
    let unconfigured_github = Unconfigured { service: "github" };
    let (gist_api, pr_comment_api): (&dyn GistApi, &dyn PrCommentApi) = match &github_client {
        Some(github_client) => (
            github_client as &dyn GistApi,
            github_client as &dyn PrCommentApi,
        ),
        None if config.dry_run => (
            &unconfigured_github as &dyn GistApi,
            &unconfigured_github as &dyn PrCommentApi,
        ),
        None => {
            writeln!(
                effects.get_error_stream(),
                "No \"github\" section in {}; it is required unless running with --dry-run",
                config_path.display()
            )?;
            return Ok(Err(ExitCode(1)));
        }
    };

    let sink = ReportSink::new(
        check_api.as_ref(),
        gist_api,
        pr_comment_api,
        RetryPolicy::from(config.retry),
        config.dry_run,
    );
    let test_ctx = TestContext::from_config(&effects, &process_run_info, sink, &config);
    let orchestrator = Orchestrator::new(test_ctx, tests);
    let reports = orchestrator.run_series(&patch_jobs, jobs)?;
    print_summary(&effects, &reports)?;

    let exit_code = exit_code_for_reports(&reports);
    if let Some(pr) = pr {
        if !exit_code.is_success() {
            let body = render_pr_comment(series_id, &reports);
            if let Err(err) = sink.comment_on_pr(&effects, pr, &body) {
                writeln!(
                    effects.get_error_stream(),
                    "Could not comment on pull request #{pr}: {err}"
                )?;
            }
        }
    }

    if exit_code.is_success() {
        Ok(Ok(()))
    } else {
        Ok(Err(exit_code))
    }
}
