//! Core functionality for patchwork-ci.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::as_conversions, clippy::clone_on_ref_ptr)]
#![allow(clippy::too_many_arguments, clippy::blocks_in_conditions)]

pub mod core;
pub mod process;
pub mod testing;
pub mod util;
