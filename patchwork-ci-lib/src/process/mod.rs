//! Running external processes.

mod run;
#[cfg(unix)]
mod unix;
#[cfg(not(unix))]
mod windows;

pub use run::{ProcessError, ProcessResult, ProcessRunInfo, ProcessRunOpts, TIMED_OUT_EXIT_CODE};

#[cfg(unix)]
use unix as imp;
#[cfg(not(unix))]
use windows as imp;
