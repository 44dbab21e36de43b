//! The recipe registry: a directory of TOML recipe documents.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::core::recipe::Recipe;

/// The full recipe set for a build request, indexed by package name.
#[derive(Debug, Default)]
pub struct Registry {
    recipes: BTreeMap<String, Recipe>,
}

impl Registry {
    /// Load every `<name>.toml` in a directory.
    ///
    /// The file stem must match the declared package name so that lookup
    /// by name and lookup by file never disagree.
    pub fn load(dir: &Path) -> Result<Registry> {
        let mut registry = Registry::default();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read recipe directory: {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }

            let recipe = Recipe::load(&path)?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if stem != recipe.name() {
                bail!(
                    "recipe file `{}` declares package `{}`",
                    path.display(),
                    recipe.name()
                );
            }

            registry.add(recipe);
        }

        if registry.is_empty() {
            bail!("no recipes found in {}", dir.display());
        }

        Ok(registry)
    }

    /// Add a recipe, replacing any previous one with the same name.
    pub fn add(&mut self, recipe: Recipe) {
        self.recipes.insert(recipe.name().to_string(), recipe);
    }

    /// Look up a recipe by package name.
    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(name)
    }

    /// Iterate over all recipe names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(|k| k.as_str())
    }

    /// Number of loaded recipes.
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}
