//! Client for the [Patchwork](https://github.com/getpatchwork/patchwork) REST
//! API. Requests are made by invoking `curl`.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::io::Write as _;
use std::time::Duration;

use lib::core::config::PatchworkConfig;
use lib::core::effects::Effects;
use lib::core::metadata::PatchRef;
use lib::process::{ProcessRunInfo, ProcessRunOpts};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{should_mock, ApiError, CheckApi, CheckState, Result};

/// Extra time given to `curl` to exit on its own after its `--max-time`
/// before it is killed.
const PROCESS_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, PartialEq, Eq)]
struct CreateCheckRequest<'a> {
    state: &'static str,
    context: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateCheckResponse {
    id: u64,
    state: String,
}

/// Posts checks to a Patchwork instance.
#[derive(Clone)]
pub struct PatchworkClient {
    effects: Effects,
    process_run_info: ProcessRunInfo,
    url: String,
    token: Option<String>,
    token_env: String,
    timeout: Duration,
}

impl std::fmt::Debug for PatchworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<PatchworkClient url={:?} token_env={:?} timeout={:?}>",
            self.url, self.token_env, self.timeout
        )
    }
}

impl PatchworkClient {
    /// Constructor. The API token is read from the environment variable
    /// named by `config.token_env`; it is only required once a check is
    /// actually posted.
    pub fn new(
        effects: &Effects,
        process_run_info: &ProcessRunInfo,
        config: &PatchworkConfig,
        timeout: Duration,
    ) -> Self {
        let PatchworkConfig {
            url,
            project: _,
            token_env,
        } = config;
        let token = process_run_info
            .env
            .get(&OsString::from(token_env))
            .and_then(|token| token.to_str())
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned);
        Self {
            effects: effects.clone(),
            process_run_info: process_run_info.clone(),
            url: url.trim_end_matches('/').to_string(),
            token,
            token_env: token_env.clone(),
            timeout,
        }
    }

    fn checks_url(&self, patch: PatchRef) -> String {
        format!("{}/api/patches/{}/checks/", self.url, patch.patch_id)
    }
}

impl CheckApi for PatchworkClient {
    #[instrument(skip(description))]
    fn post_check(
        &self,
        patch: PatchRef,
        check_name: &str,
        state: CheckState,
        description: &str,
        target_url: Option<&str>,
    ) -> Result<()> {
        let url = self.checks_url(patch);
        let request = CreateCheckRequest {
            state: state.api_name(),
            context: check_name,
            description,
            target_url,
        };
        let body = serde_json::to_string(&request).map_err(ApiError::EncodeRequest)?;

        if should_mock() {
            writeln!(
                self.effects.get_output_stream(),
                "pwci: mock: POST {url} {body}"
            )?;
            return Ok(());
        }

        let token = self.token.as_ref().ok_or_else(|| ApiError::MissingToken {
            env_var: self.token_env.clone(),
        })?;
        // Passed as a file so that the token doesn't show up in the logged
        // command line.
        let mut header_file = tempfile::NamedTempFile::new().map_err(ApiError::TempFile)?;
        writeln!(header_file, "Authorization: Token {token}").map_err(ApiError::TempFile)?;
        header_file.flush().map_err(ApiError::TempFile)?;

        let args: Vec<OsString> = vec![
            "curl".into(),
            "--silent".into(),
            "--show-error".into(),
            "--fail-with-body".into(),
            "--max-time".into(),
            self.timeout.as_secs().max(1).to_string().into(),
            "--request".into(),
            "POST".into(),
            "--header".into(),
            "Content-Type: application/json".into(),
            "--header".into(),
            {
                let mut arg = OsString::from("@");
                arg.push(header_file.path());
                arg
            },
            "--data".into(),
            body.into(),
            url.into(),
        ];
        let result = self
            .process_run_info
            .run(
                &self.effects.suppress(),
                &args,
                &ProcessRunOpts {
                    timeout: Some(self.timeout + PROCESS_TIMEOUT_GRACE),
                    ..Default::default()
                },
            )
            .map_err(|source| ApiError::Process {
                source,
                program: "curl".to_string(),
            })?;
        if !result.is_success() {
            return Err(ApiError::CommandFailed {
                program: "curl".to_string(),
                exit_code: result.exit_code,
                message: result.combined_output(),
            });
        }

        let response: CreateCheckResponse =
            serde_json::from_str(&result.stdout).map_err(|source| ApiError::ParseResponse {
                source,
                program: "curl".to_string(),
                output: result.stdout.clone(),
            })?;
        debug!(id = response.id, state = %response.state, "Created check");
        Ok(())
    }
}
