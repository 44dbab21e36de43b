//! Core data model: recipes, the recipe registry, and the cellar.

pub mod cellar;
pub mod recipe;
pub mod registry;

pub use cellar::{Cellar, InstallPrefix, InstalledKeg};
pub use recipe::{
    BuildStep, CheckSpec, DepKind, DependencySpec, OptionSpec, PatchOp, Placeholder, Recipe,
    SourceSpec,
};
pub use registry::Registry;
