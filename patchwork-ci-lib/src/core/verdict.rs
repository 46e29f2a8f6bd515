//! The outcome of a single test and the signal used to end a test early.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The outcome classification of a single test run.
///
/// The discriminants are stable and are what gets logged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The test has not reached a verdict yet.
    #[default]
    Pending = 0,

    /// The test passed.
    Pass = 1,

    /// The test found one or more problems with the patch.
    Fail = 2,

    /// The test could not complete.
    Error = 3,

    /// The test did not apply to the patch.
    Skip = 4,

    /// The test passed, but with something worth looking at.
    Warning = 5,
}

impl Verdict {
    /// Whether a verdict has been reached.
    pub fn is_terminal(self) -> bool {
        match self {
            Verdict::Pending => false,
            Verdict::Pass | Verdict::Fail | Verdict::Error | Verdict::Skip | Verdict::Warning => {
                true
            }
        }
    }

    /// Whether this verdict should fail the overall run.
    pub fn is_failure(self) -> bool {
        match self {
            Verdict::Fail | Verdict::Error => true,
            Verdict::Pending | Verdict::Pass | Verdict::Skip | Verdict::Warning => false,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Pending => "PENDING",
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Error => "ERROR",
            Verdict::Skip => "SKIP",
            Verdict::Warning => "WARNING",
        };
        write!(f, "{name}")
    }
}

/// Returned by the terminal transitions of a test which end it immediately.
/// By the time this is returned, the verdict and output have already been
/// recorded, so there is nothing to carry.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndTest;

impl Display for EndTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "test ended")
    }
}

/// The control flow of a test body. `Err(EndTest)` means that the test
/// reached a terminal verdict and the rest of its body should not run; use
/// `?` to propagate it.
pub type TestFlow = Result<(), EndTest>;
