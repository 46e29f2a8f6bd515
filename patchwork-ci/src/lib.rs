//! Run a set of test scripts against each patch of a Patchwork series, then
//! post one check per test and patch back to Patchwork.
//!
//! Warnings and failures carry the full output of the test, uploaded as a
//! gist and linked from the check. When any test fails, a summary can also be
//! left on the pull request which carries the series.

#![warn(missing_docs)]
#![warn(
    clippy::all,
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro
)]
#![allow(clippy::too_many_arguments, clippy::blocks_in_conditions)]

pub mod commands;
