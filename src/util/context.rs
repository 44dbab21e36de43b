//! Global context for keg operations.
//!
//! Provides centralized access to the on-disk layout: the content-addressed
//! download cache, the cellar of versioned install prefixes, and the shared
//! `opt` link directory.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Project directories for keg
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("com", "keg", "keg"));

/// Global context containing paths and output settings.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Root directory for all keg data (cache, cellar, opt links)
    root: PathBuf,

    /// Directory containing the recipe set
    recipes_dir: PathBuf,

    /// Whether to use verbose output
    verbose: bool,
}

impl GlobalContext {
    /// Create a new GlobalContext with the default root.
    pub fn new() -> Result<Self> {
        let root = if let Some(dirs) = PROJECT_DIRS.as_ref() {
            dirs.data_dir().to_path_buf()
        } else {
            // Fallback to ~/.keg
            std::env::var_os("HOME")
                .map(|h| PathBuf::from(h).join(".keg"))
                .unwrap_or_else(|| PathBuf::from(".keg"))
        };

        let cwd = std::env::current_dir().context("failed to get current directory")?;

        Ok(GlobalContext {
            root,
            recipes_dir: cwd.join("recipes"),
            verbose: false,
        })
    }

    /// Create a GlobalContext rooted at a specific directory.
    pub fn with_root(root: PathBuf) -> Self {
        GlobalContext {
            recipes_dir: PathBuf::from("recipes"),
            root,
            verbose: false,
        }
    }

    /// Override the recipe directory.
    pub fn with_recipes_dir(mut self, dir: PathBuf) -> Self {
        self.recipes_dir = dir;
        self
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Get the keg root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the directory containing recipe documents.
    pub fn recipes_dir(&self) -> &Path {
        &self.recipes_dir
    }

    /// Get the content-addressed cache directory for downloaded archives.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Get the cellar directory holding per-(name, version) install prefixes.
    pub fn cellar_dir(&self) -> PathBuf {
        self.root.join("cellar")
    }

    /// Get the shared `opt` directory of links to active prefixes.
    pub fn opt_dir(&self) -> PathBuf {
        self.root.join("opt")
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Create the cache/cellar/opt layout if missing.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [self.cache_dir(), self.cellar_dir(), self.opt_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }
}
