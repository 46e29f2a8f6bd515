//! Recording fakes of the external APIs, for tests in this and other crates.

use std::sync::Mutex;

use lib::core::metadata::PatchRef;

use crate::{ApiError, CheckApi, CheckState, GistApi, PrCommentApi, ReportSink, Result, RetryPolicy};

fn injected_failure() -> ApiError {
    ApiError::CommandFailed {
        program: "fake".to_string(),
        exit_code: 22,
        message: "injected failure".to_string(),
    }
}

/// Take one failure off the budget, if there is any left.
fn consume_failure(failures: &Mutex<u32>) -> bool {
    let mut failures = failures.lock().unwrap();
    if *failures > 0 {
        *failures -= 1;
        true
    } else {
        false
    }
}

/// A check recorded by [`FakeCheckApi`].
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedCheck {
    pub patch: PatchRef,
    pub check_name: String,
    pub state: CheckState,
    pub description: String,
    pub target_url: Option<String>,
}

/// Records every check posted to it.
#[derive(Debug, Default)]
pub struct FakeCheckApi {
    posted: Mutex<Vec<PostedCheck>>,
    attempts: Mutex<usize>,
    failures: Mutex<u32>,
}

impl FakeCheckApi {
    /// Fail the next `failures` calls before succeeding.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            ..Default::default()
        }
    }

    /// The checks posted so far, in order.
    pub fn posted(&self) -> Vec<PostedCheck> {
        self.posted.lock().unwrap().clone()
    }

    /// The number of calls made so far, including failed ones.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl CheckApi for FakeCheckApi {
    fn post_check(
        &self,
        patch: PatchRef,
        check_name: &str,
        state: CheckState,
        description: &str,
        target_url: Option<&str>,
    ) -> Result<()> {
        *self.attempts.lock().unwrap() += 1;
        if consume_failure(&self.failures) {
            return Err(injected_failure());
        }
        self.posted.lock().unwrap().push(PostedCheck {
            patch,
            check_name: check_name.to_string(),
            state,
            description: description.to_string(),
            target_url: target_url.map(ToOwned::to_owned),
        });
        Ok(())
    }
}

/// A gist recorded by [`FakeGistApi`].
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedGist {
    pub title: String,
    pub label: String,
    pub body: String,
}

/// Records every gist created through it. The returned URL is
/// `https://gist.example.com/<label>`.
#[derive(Debug, Default)]
pub struct FakeGistApi {
    created: Mutex<Vec<CreatedGist>>,
    failures: Mutex<u32>,
}

impl FakeGistApi {
    /// Fail the next `failures` calls before succeeding.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            ..Default::default()
        }
    }

    /// The gists created so far, in order.
    pub fn created(&self) -> Vec<CreatedGist> {
        self.created.lock().unwrap().clone()
    }
}

impl GistApi for FakeGistApi {
    fn create_gist(&self, title: &str, label: &str, body: &str) -> Result<String> {
        if consume_failure(&self.failures) {
            return Err(injected_failure());
        }
        self.created.lock().unwrap().push(CreatedGist {
            title: title.to_string(),
            label: label.to_string(),
            body: body.to_string(),
        });
        Ok(format!("https://gist.example.com/{label}"))
    }
}

/// Records every pull request comment made through it.
#[derive(Debug, Default)]
pub struct FakePrCommentApi {
    comments: Mutex<Vec<(u64, String)>>,
}

impl FakePrCommentApi {
    /// The `(pr, body)` pairs commented so far, in order.
    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().unwrap().clone()
    }
}

impl PrCommentApi for FakePrCommentApi {
    fn comment_on_pr(&self, pr: u64, body: &str) -> Result<()> {
        self.comments.lock().unwrap().push((pr, body.to_string()));
        Ok(())
    }
}

/// One of each fake.
#[allow(missing_docs)]
#[derive(Debug, Default)]
pub struct FakeApis {
    pub checks: FakeCheckApi,
    pub gists: FakeGistApi,
    pub comments: FakePrCommentApi,
}

impl FakeApis {
    /// A [`ReportSink`] backed by these fakes which retries without
    /// sleeping.
    pub fn report_sink(&self, dry_run: bool) -> ReportSink<'_> {
        ReportSink::new(
            &self.checks,
            &self.gists,
            &self.comments,
            RetryPolicy::new_without_delay(3),
            dry_run,
        )
    }

    /// The number of external calls made so far, across all fakes.
    pub fn total_calls(&self) -> usize {
        self.checks.attempts() + self.gists.created().len() + self.comments.comments().len()
    }
}
