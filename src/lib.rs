//! Keg - a formula-driven package build orchestrator
//!
//! This crate provides the core library functionality for keg: recipe
//! loading, dependency resolution, source fetching, patching, build
//! execution, post-build checks, and installation into a versioned
//! cellar of prefixes.

pub mod builder;
pub mod check;
pub mod core;
pub mod fetch;
pub mod install;
pub mod ops;
pub mod patch;
pub mod resolver;
pub mod util;

pub use self::core::{Cellar, Recipe, Registry};
pub use resolver::BuildPlan;
pub use util::GlobalContext;
