//! Utility functions.

use std::path::PathBuf;

/// Represents the code to exit the process with.
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExitCode(pub isize);

impl ExitCode {
    /// Return an exit code corresponding to success.
    pub fn success() -> Self {
        Self(0)
    }

    /// Determine whether or not this exit code represents a successful
    /// termination.
    pub fn is_success(&self) -> bool {
        match self {
            ExitCode(0) => true,
            ExitCode(_) => false,
        }
    }
}

/// Encapsulate both an `eyre::Error` and an `ExitCode`. The `eyre::Error`
/// indicates an unexpected failure of the harness itself, while the
/// `ExitCode` indicates an expected failure which has already been reported
/// to the user.
pub type EyreExitOr<T> = eyre::Result<Result<T, ExitCode>>;

/// Macro to propagate `ExitCode`s in the same way as the `?` operator.
#[macro_export]
macro_rules! try_exit_code {
    ($e:expr) => {
        match $e {
            Ok(Ok(value)) => value,
            Ok(Err(exit_code)) => {
                return Ok(Err(exit_code));
            }
            Err(err) => {
                return Err(err);
            }
        }
    };
}

/// Returns a path for a given file, searching through PATH to find it.
pub fn get_from_path(exe_name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let exe_path = dir.join(exe_name);
            if exe_path.is_file() {
                Some(exe_path)
            } else {
                None
            }
        })
    })
}

/// Returns the path to the `bash` interpreter used to run test scripts.
pub fn get_bash() -> Option<PathBuf> {
    let exe_name = if cfg!(target_os = "windows") {
        "bash.exe"
    } else {
        "bash"
    };
    get_from_path(exe_name)
}

/// Interpret a string value from the environment as a boolean flag. Empty
/// strings, `0`, `false`, `no` and `off` are false; anything else is true.
pub fn parse_env_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
