//! High-level operations driven by the CLI.

pub mod build;

pub use build::{build, resolve_plan, BuildOptions, BuildSummary, PipelineError};
