//! Command implementations

pub mod build;
pub mod cellar;
pub mod tree;
