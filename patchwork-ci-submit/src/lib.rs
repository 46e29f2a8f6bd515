//! Report test results to the outside world: checks posted to Patchwork,
//! artifacts uploaded as gists, and comments on pull requests.

#![warn(missing_docs)]
#![warn(
    clippy::all,
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro
)]
#![allow(clippy::too_many_arguments, clippy::blocks_in_conditions)]

pub mod github;
pub mod patchwork;
pub mod retry;
pub mod testing;

use std::fmt::{self, Debug, Display, Write};

use lib::core::effects::Effects;
use lib::core::metadata::{ArtifactKind, PatchRef};
use lib::core::verdict::Verdict;
use lib::process::ProcessError;
use thiserror::Error;
use tracing::{info, instrument};

pub use retry::{RetryPolicy, Retryable};

/// When this environment variable is set, the Patchwork and GitHub clients
/// log the calls they would make instead of invoking `curl` or `gh`.
pub const SHOULD_MOCK_ENV_KEY: &str = "PWCI_MOCK_APIS";

pub(crate) fn should_mock() -> bool {
    std::env::var_os(SHOULD_MOCK_ENV_KEY).is_some()
}

/// Error type.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("could not run `{program}`: {source}")]
    Process {
        source: ProcessError,
        program: String,
    },

    #[error("`{program}` failed with exit code {exit_code}: {message}")]
    CommandFailed {
        program: String,
        exit_code: i32,
        message: String,
    },

    #[error("could not parse response from `{program}`: {source}; with output: {output}")]
    ParseResponse {
        source: serde_json::Error,
        program: String,
        output: String,
    },

    #[error("could not encode request: {0}")]
    EncodeRequest(#[source] serde_json::Error),

    #[error("`{program}` did not print a URL; with output: {output}")]
    NoUrl { program: String, output: String },

    #[error("the environment variable {env_var} holding the API token is not set")]
    MissingToken { env_var: String },

    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },

    #[error("could not write temporary file: {0}")]
    TempFile(#[source] std::io::Error),

    #[error(transparent)]
    Fmt(#[from] fmt::Error),
}

/// Result type.
pub type Result<T> = std::result::Result<T, ApiError>;

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Process { source, .. } => match source {
                ProcessError::Wait { .. } | ProcessError::ReaderPanicked { .. } => true,
                ProcessError::EmptyCommand | ProcessError::Spawn { .. } => false,
            },
            ApiError::CommandFailed { .. }
            | ApiError::ParseResponse { .. }
            | ApiError::NoUrl { .. }
            | ApiError::TempFile(_) => true,
            ApiError::EncodeRequest(_)
            | ApiError::MissingToken { .. }
            | ApiError::NotConfigured { .. }
            | ApiError::Fmt(_) => false,
        }
    }
}

/// The state of a check as understood by Patchwork.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckState {
    /// Nothing to report. Never intentionally posted.
    Neutral = 0,

    /// The check passed.
    Success = 1,

    /// The check passed with warnings.
    Warning = 2,

    /// The check failed.
    Failure = 3,
}

impl CheckState {
    /// Map a verdict to the state posted for it.
    ///
    /// `Error` is posted as a failure. `Pending` and `Skip` have no
    /// counterpart and map to `Neutral`; callers do not post them.
    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pending => CheckState::Neutral,
            Verdict::Pass => CheckState::Success,
            Verdict::Warning => CheckState::Warning,
            Verdict::Fail => CheckState::Failure,
            Verdict::Error => CheckState::Failure,
            Verdict::Skip => CheckState::Neutral,
        }
    }

    /// The numeric value of the state.
    pub fn as_number(self) -> u8 {
        match self {
            CheckState::Neutral => 0,
            CheckState::Success => 1,
            CheckState::Warning => 2,
            CheckState::Failure => 3,
        }
    }

    /// The name of the state in the Patchwork REST API.
    pub fn api_name(self) -> &'static str {
        match self {
            CheckState::Neutral => "pending",
            CheckState::Success => "success",
            CheckState::Warning => "warning",
            CheckState::Failure => "fail",
        }
    }
}

impl Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.api_name(), self.as_number())
    }
}

/// Posts the state of a check against a patch.
pub trait CheckApi: Debug + Send + Sync {
    /// Post `state` for the check `check_name` on `patch`. `target_url`
    /// links to details such as an uploaded artifact.
    fn post_check(
        &self,
        patch: PatchRef,
        check_name: &str,
        state: CheckState,
        description: &str,
        target_url: Option<&str>,
    ) -> Result<()>;
}

/// Uploads text artifacts.
pub trait GistApi: Debug + Send + Sync {
    /// Upload `body` as a file named `label` and return the URL to view it
    /// at.
    fn create_gist(&self, title: &str, label: &str, body: &str) -> Result<String>;
}

/// Comments on pull requests.
pub trait PrCommentApi: Debug + Send + Sync {
    /// Add a comment with `body` to pull request number `pr`.
    fn comment_on_pr(&self, pr: u64, body: &str) -> Result<()>;
}

/// Stands in for a service which has no configuration. Every call fails with
/// [`ApiError::NotConfigured`], so it is only useful in dry-run mode.
#[derive(Clone, Copy, Debug)]
pub struct Unconfigured {
    /// The name of the missing service.
    pub service: &'static str,
}

impl CheckApi for Unconfigured {
    fn post_check(
        &self,
        _patch: PatchRef,
        _check_name: &str,
        _state: CheckState,
        _description: &str,
        _target_url: Option<&str>,
    ) -> Result<()> {
        Err(ApiError::NotConfigured {
            service: self.service,
        })
    }
}

impl GistApi for Unconfigured {
    fn create_gist(&self, _title: &str, _label: &str, _body: &str) -> Result<String> {
        Err(ApiError::NotConfigured {
            service: self.service,
        })
    }
}

impl PrCommentApi for Unconfigured {
    fn comment_on_pr(&self, _pr: u64, _body: &str) -> Result<()> {
        Err(ApiError::NotConfigured {
            service: self.service,
        })
    }
}

/// Translates verdicts into external side effects, honoring dry-run mode.
///
/// Every external call is retried according to the [`RetryPolicy`]. In
/// dry-run mode nothing external is called; the intended call is logged
/// instead.
#[derive(Clone, Copy, Debug)]
pub struct ReportSink<'a> {
    check_api: &'a dyn CheckApi,
    gist_api: &'a dyn GistApi,
    pr_comment_api: &'a dyn PrCommentApi,
    retry: RetryPolicy,
    dry_run: bool,
}

impl<'a> ReportSink<'a> {
    /// Constructor.
    pub fn new(
        check_api: &'a dyn CheckApi,
        gist_api: &'a dyn GistApi,
        pr_comment_api: &'a dyn PrCommentApi,
        retry: RetryPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            check_api,
            gist_api,
            pr_comment_api,
            retry,
            dry_run,
        }
    }

    /// Post the verdict of `check_name` for `patch`.
    #[instrument(skip(self, effects))]
    pub fn submit_check(
        &self,
        effects: &Effects,
        patch: PatchRef,
        check_name: &str,
        verdict: Verdict,
        description: &str,
        artifact_url: Option<&str>,
    ) -> Result<()> {
        let state = CheckState::from_verdict(verdict);
        if self.dry_run {
            info!(%patch, %check_name, %state, "Dry run, not posting check");
            writeln!(
                effects.get_output_stream(),
                "pwci: dry run: would post check {check_name}={state} for {patch}: {description}{}",
                match artifact_url {
                    Some(url) => format!(" ({url})"),
                    None => String::new(),
                }
            )?;
            return Ok(());
        }

        self.retry.retry("post check", || {
            self.check_api
                .post_check(patch, check_name, state, description, artifact_url)
        })?;
        info!(%patch, %check_name, %state, "Posted check");
        Ok(())
    }

    /// Upload the output of `test_name` for `patch` as an artifact. Returns
    /// the artifact URL, or `None` in dry-run mode.
    #[instrument(skip(self, effects, body))]
    pub fn upload_artifact(
        &self,
        effects: &Effects,
        patch: PatchRef,
        test_name: &str,
        kind: ArtifactKind,
        body: &str,
    ) -> Result<Option<String>> {
        let label = patch.artifact_label(test_name, kind);
        if self.dry_run {
            info!(%label, "Dry run, not uploading artifact");
            writeln!(
                effects.get_output_stream(),
                "pwci: dry run: would upload artifact {label} ({} bytes)",
                body.len()
            )?;
            return Ok(None);
        }

        let title = format!("{test_name} {kind} for {patch}");
        let url = self
            .retry
            .retry("create gist", || self.gist_api.create_gist(&title, &label, body))?;
        info!(%label, %url, "Uploaded artifact");
        Ok(Some(url))
    }

    /// Comment on pull request number `pr`.
    #[instrument(skip(self, effects, body))]
    pub fn comment_on_pr(&self, effects: &Effects, pr: u64, body: &str) -> Result<()> {
        if self.dry_run {
            info!(pr, "Dry run, not commenting on pull request");
            writeln!(
                effects.get_output_stream(),
                "pwci: dry run: would comment on pull request #{pr}"
            )?;
            return Ok(());
        }

        self.retry
            .retry("comment on pull request", || {
                self.pr_comment_api.comment_on_pr(pr, body)
            })?;
        info!(pr, "Commented on pull request");
        Ok(())
    }
}
