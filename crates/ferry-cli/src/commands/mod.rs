//! CLI command implementations.

pub mod run;
pub mod start;
pub mod status;
