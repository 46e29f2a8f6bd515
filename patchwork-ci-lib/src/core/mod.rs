//! Core algorithms and data structures.

pub mod config;
pub mod effects;
pub mod metadata;
pub mod stopwatch;
pub mod verdict;
