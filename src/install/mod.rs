//! The installer: moves a staged build tree into its final prefix.
//!
//! Installation is all-or-nothing from the caller's perspective: any
//! failure while populating the prefix removes the partial prefix before
//! returning, so a half-installed keg never exists.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::core::{Cellar, InstallPrefix, Recipe};

/// Error from the install stage. Every variant implies the rollback path
/// already ran.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("build of `{package}` produced no staged artifacts")]
    NoArtifacts { package: String },

    #[error("failed to install `{package}`: {source:#}")]
    Copy {
        package: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to link `{package}` into opt: {source:#}")]
    Link {
        package: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Copies completed build trees into the cellar.
pub struct Installer<'a> {
    cellar: &'a Cellar,
}

impl<'a> Installer<'a> {
    pub fn new(cellar: &'a Cellar) -> Self {
        Installer { cellar }
    }

    /// Install the staged tree into the (name, version) prefix.
    ///
    /// On any copy failure the partial prefix is removed before the
    /// error is returned.
    pub fn install(&self, recipe: &Recipe, staged: &Path) -> Result<InstallPrefix, InstallError> {
        let prefix = self.cellar.prefix(recipe.name(), recipe.version());

        if !staged.is_dir() {
            return Err(InstallError::NoArtifacts {
                package: recipe.name().to_string(),
            });
        }

        info!(
            package = recipe.name(),
            prefix = %prefix.path().display(),
            "installing"
        );

        if let Err(source) = crate::util::fs::copy_dir_all(staged, prefix.path()) {
            self.rollback(&prefix);
            return Err(InstallError::Copy {
                package: recipe.name().to_string(),
                source,
            });
        }

        Ok(prefix)
    }

    /// Copy an extra file (a check log) into an installed prefix.
    /// Failure rolls the whole prefix back: the install is atomic.
    pub fn install_file(
        &self,
        prefix: &InstallPrefix,
        source: &Path,
    ) -> Result<(), InstallError> {
        let file_name = source.file_name().unwrap_or_default();
        let dest = prefix.path().join(file_name);

        if let Err(e) = std::fs::copy(source, &dest) {
            self.rollback(prefix);
            return Err(InstallError::Copy {
                package: prefix.name().to_string(),
                source: anyhow::Error::new(e)
                    .context(format!("failed to copy {}", source.display())),
            });
        }
        Ok(())
    }

    /// Link the prefix into the shared `opt` path, replacing a previous
    /// link. Keg-only recipes must never reach this.
    pub fn link_opt(&self, prefix: &InstallPrefix) -> Result<PathBuf, InstallError> {
        let link = self.cellar.opt_link(prefix.name());

        if let Some(parent) = link.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Err(InstallError::Link {
                    package: prefix.name().to_string(),
                    source: anyhow::Error::new(e),
                });
            }
        }

        crate::util::fs::symlink(prefix.path(), &link).map_err(|source| InstallError::Link {
            package: prefix.name().to_string(),
            source,
        })?;

        debug!(link = %link.display(), "linked into opt");
        Ok(link)
    }

    /// Remove a partial prefix. Best-effort: rollback runs on error paths
    /// and must not mask the original failure.
    pub fn rollback(&self, prefix: &InstallPrefix) {
        if prefix.exists() {
            debug!(prefix = %prefix.path().display(), "rolling back partial prefix");
            let _ = std::fs::remove_dir_all(prefix.path());
        }
    }
}
