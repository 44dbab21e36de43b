//! The cellar: versioned, isolated install prefixes.
//!
//! Each installed package lives under `cellar/<name>/<version>`. At most
//! one prefix exists per (name, version) pair. Active prefixes may be
//! linked into `opt/<name>`; keg-only packages never are.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use semver::Version;

use crate::util::GlobalContext;

/// A filesystem location uniquely identified by (name, version).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPrefix {
    name: String,
    version: Version,
    path: PathBuf,
}

impl InstallPrefix {
    /// The package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The package version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The prefix directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the prefix exists on disk.
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }
}

/// A keg found in the cellar.
#[derive(Debug, Clone)]
pub struct InstalledKeg {
    pub name: String,
    pub version: Version,
    pub path: PathBuf,
    /// Whether `opt/<name>` currently points at this prefix.
    pub linked: bool,
}

/// Layout and queries over the cellar and `opt` directories.
#[derive(Debug, Clone)]
pub struct Cellar {
    cellar_dir: PathBuf,
    opt_dir: PathBuf,
}

impl Cellar {
    /// Create a cellar view over the context's layout.
    pub fn new(ctx: &GlobalContext) -> Self {
        Cellar {
            cellar_dir: ctx.cellar_dir(),
            opt_dir: ctx.opt_dir(),
        }
    }

    /// The prefix for a (name, version) pair. Purely a path computation;
    /// the prefix may or may not exist.
    pub fn prefix(&self, name: &str, version: &Version) -> InstallPrefix {
        InstallPrefix {
            name: name.to_string(),
            version: version.clone(),
            path: self.cellar_dir.join(name).join(version.to_string()),
        }
    }

    /// Whether a (name, version) pair is installed.
    pub fn is_installed(&self, name: &str, version: &Version) -> bool {
        self.prefix(name, version).exists()
    }

    /// The `opt/<name>` link path for a package.
    pub fn opt_link(&self, name: &str) -> PathBuf {
        self.opt_dir.join(name)
    }

    /// List every keg present in the cellar, sorted by name then version.
    pub fn installed(&self) -> Result<Vec<InstalledKeg>> {
        let mut kegs = Vec::new();

        if !self.cellar_dir.is_dir() {
            return Ok(kegs);
        }

        for entry in std::fs::read_dir(&self.cellar_dir).with_context(|| {
            format!("failed to read cellar: {}", self.cellar_dir.display())
        })? {
            let name_dir = entry?.path();
            if !name_dir.is_dir() {
                continue;
            }
            let name = name_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let link_target = std::fs::read_link(self.opt_link(&name)).ok();

            for entry in std::fs::read_dir(&name_dir)? {
                let version_dir = entry?.path();
                if !version_dir.is_dir() {
                    continue;
                }
                let Some(version) = version_dir
                    .file_name()
                    .and_then(|v| v.to_str())
                    .and_then(|v| Version::parse(v).ok())
                else {
                    continue;
                };

                kegs.push(InstalledKeg {
                    linked: link_target.as_deref() == Some(&version_dir),
                    name: name.clone(),
                    version,
                    path: version_dir,
                });
            }
        }

        kegs.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        Ok(kegs)
    }
}
