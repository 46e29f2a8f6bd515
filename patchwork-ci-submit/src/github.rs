//! GitHub backend for artifacts and pull request comments. This integrates
//! specifically with the `gh` command-line utility.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt::Write;
use std::time::Duration;

use lib::core::config::GithubConfig;
use lib::core::effects::Effects;
use lib::process::{ProcessResult, ProcessRunInfo, ProcessRunOpts};
use tracing::instrument;

use crate::{should_mock, ApiError, GistApi, PrCommentApi, Result};

/// Drives `gh` on behalf of the harness.
#[derive(Clone)]
pub struct GithubClient {
    effects: Effects,
    process_run_info: ProcessRunInfo,
    repo: String,
    token: Option<OsString>,
    timeout: Duration,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<GithubClient repo={:?} timeout={:?}>",
            self.repo, self.timeout
        )
    }
}

impl GithubClient {
    /// Constructor. If the environment variable named by
    /// `config.token_env` is set, it is forwarded to `gh` as `GH_TOKEN`.
    /// Otherwise `gh` uses its own stored credentials.
    pub fn new(
        effects: &Effects,
        process_run_info: &ProcessRunInfo,
        config: &GithubConfig,
        timeout: Duration,
    ) -> Self {
        let GithubConfig { repo, token_env } = config;
        let token = process_run_info
            .env
            .get(&OsString::from(token_env))
            .filter(|token| !token.is_empty())
            .cloned();
        Self {
            effects: effects.clone(),
            process_run_info: process_run_info.clone(),
            repo: repo.clone(),
            token,
            timeout,
        }
    }

    fn run_gh(&self, args: &[OsString]) -> Result<ProcessResult> {
        let mut command = vec![OsString::from("gh")];
        command.extend(args.iter().cloned());
        let env: HashMap<OsString, OsString> = match &self.token {
            Some(token) => [(OsString::from("GH_TOKEN"), token.clone())]
                .into_iter()
                .collect(),
            None => HashMap::new(),
        };
        let result = self
            .process_run_info
            .run(
                &self.effects.suppress(),
                &command,
                &ProcessRunOpts {
                    env,
                    timeout: Some(self.timeout),
                    ..Default::default()
                },
            )
            .map_err(|source| ApiError::Process {
                source,
                program: "gh".to_string(),
            })?;
        if result.is_success() {
            Ok(result)
        } else {
            Err(ApiError::CommandFailed {
                program: "gh".to_string(),
                exit_code: result.exit_code,
                message: result.combined_output(),
            })
        }
    }
}

/// Find the URL that `gh` printed, which is the last line of its output
/// that looks like one.
fn extract_url(output: &str) -> Option<&str> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with("https://") || line.starts_with("http://"))
}

impl GistApi for GithubClient {
    #[instrument(skip(body))]
    fn create_gist(&self, title: &str, label: &str, body: &str) -> Result<String> {
        if should_mock() {
            let url = format!("https://gist.github.com/mock/{label}");
            writeln!(
                self.effects.get_output_stream(),
                "pwci: mock: gh gist create --desc {title:?} {label} ({} bytes) -> {url}",
                body.len()
            )?;
            return Ok(url);
        }

        // The gist file is named after the label, so write it into a fresh
        // directory under exactly that name.
        let dir = tempfile::tempdir().map_err(ApiError::TempFile)?;
        let path = dir.path().join(label);
        std::fs::write(&path, body).map_err(ApiError::TempFile)?;

        let result = self.run_gh(&[
            OsString::from("gist"),
            "create".into(),
            "--desc".into(),
            title.into(),
            path.into_os_string(),
        ])?;
        match extract_url(&result.stdout) {
            Some(url) => Ok(url.to_string()),
            None => Err(ApiError::NoUrl {
                program: "gh".to_string(),
                output: result.combined_output(),
            }),
        }
    }
}

impl PrCommentApi for GithubClient {
    #[instrument(skip(body))]
    fn comment_on_pr(&self, pr: u64, body: &str) -> Result<()> {
        if should_mock() {
            writeln!(
                self.effects.get_output_stream(),
                "pwci: mock: gh pr comment {pr} --repo {}",
                self.repo
            )?;
            return Ok(());
        }

        let mut body_file = tempfile::NamedTempFile::new().map_err(ApiError::TempFile)?;
        std::io::Write::write_all(&mut body_file, body.as_bytes()).map_err(ApiError::TempFile)?;

        self.run_gh(&[
            OsString::from("pr"),
            "comment".into(),
            pr.to_string().into(),
            "--repo".into(),
            self.repo.clone().into(),
            "--body-file".into(),
            body_file.path().into(),
        ])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_url() {
        assert_eq!(
            extract_url("- Creating gist pw1-p2-build-FAIL\n✓ Created secret gist\nhttps://gist.github.com/someone/abc123\n"),
            Some("https://gist.github.com/someone/abc123")
        );
        assert_eq!(extract_url("something went wrong\n"), None);
        assert_eq!(extract_url(""), None);
    }
}
