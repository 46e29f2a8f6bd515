//! Identifiers for the patch series being tested.

use std::fmt::{self, Display};
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

lazy_static! {
    static ref SERIES_ID_RE: Regex = Regex::new(r"^\[PW_SID:(\d+)\]").unwrap();
}

/// A Patchwork series ID. A series groups the patches of a single
/// submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(pub u64);

impl Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(id) = self;
        write!(f, "{id}")
    }
}

impl FromStr for SeriesId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// A Patchwork patch ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchId(pub u64);

impl Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(id) = self;
        write!(f, "{id}")
    }
}

impl FromStr for PatchId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Identifies a single patch under test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PatchRef {
    /// The series the patch belongs to.
    pub series_id: SeriesId,

    /// The patch itself.
    pub patch_id: PatchId,
}

impl PatchRef {
    /// The name of an artifact uploaded for a test of this patch, e.g.
    /// `pw123-p456-build-FAIL`.
    pub fn artifact_label(&self, test_name: &str, kind: ArtifactKind) -> String {
        let Self {
            series_id,
            patch_id,
        } = self;
        format!("pw{series_id}-p{patch_id}-{test_name}-{kind}")
    }
}

impl Display for PatchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "series {} patch {}", self.series_id, self.patch_id)
    }
}

/// The reason an artifact was uploaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The test produced a warning.
    Warning,

    /// The test failed.
    Fail,
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Warning => write!(f, "WARNING"),
            ArtifactKind::Fail => write!(f, "FAIL"),
        }
    }
}

/// Extract the series ID from a pull request title of the form
/// `[PW_SID:<digits>] subject`.
///
/// A missing or malformed prefix is logged as an error and yields `None`;
/// callers must check for it before proceeding.
#[instrument]
pub fn parse_series_id_from_pr_title(title: &str) -> Option<SeriesId> {
    let series_id = SERIES_ID_RE
        .captures(title)
        .and_then(|captures| captures.get(1))
        .and_then(|digits| digits.as_str().parse::<SeriesId>().ok());
    if series_id.is_none() {
        error!(?title, "Could not extract series ID from PR title");
    }
    series_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_series_id() {
        assert_eq!(
            parse_series_id_from_pr_title("[PW_SID:12345] some subject"),
            Some(SeriesId(12345))
        );
        assert_eq!(
            parse_series_id_from_pr_title("[PW_SID:7]"),
            Some(SeriesId(7))
        );
    }

    #[test]
    fn test_parse_series_id_missing_or_malformed() {
        assert_eq!(parse_series_id_from_pr_title("no prefix here"), None);
        assert_eq!(parse_series_id_from_pr_title("[PW_SID:] subject"), None);
        assert_eq!(parse_series_id_from_pr_title("[PW_SID:12a] subject"), None);
        assert_eq!(parse_series_id_from_pr_title("subject [PW_SID:12]"), None);
        assert_eq!(
            parse_series_id_from_pr_title("[PW_SID:99999999999999999999999] overflow"),
            None
        );
    }

    #[test]
    fn test_artifact_label() {
        let patch = PatchRef {
            series_id: SeriesId(12),
            patch_id: PatchId(34),
        };
        assert_eq!(
            patch.artifact_label("build", ArtifactKind::Fail),
            "pw12-p34-build-FAIL"
        );
        assert_eq!(
            patch.artifact_label("checkpatch", ArtifactKind::Warning),
            "pw12-p34-checkpatch-WARNING"
        );
    }
}
