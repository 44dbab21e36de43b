//! The build executor: runs a recipe's external step sequence.
//!
//! Steps run in declaration order inside the extracted source tree, with
//! `{placeholder}` templates expanded, option-conditional args appended to
//! option-aware steps, and dependency prefixes injected into the
//! environment as include/library search paths. Writes stay confined to
//! the scratch directory: `{prefix}` expands to a staged prefix, never
//! the final one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use tracing::info;

use crate::core::{BuildStep, DepKind, Placeholder, Recipe};
use crate::util::process::ProcessBuilder;

/// Error from the build stage. Fatal: no partial install ever results.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build step `{step}` failed ({status}), see {}", log.display())]
    StepFailed {
        step: String,
        status: String,
        log: PathBuf,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Everything a step needs to expand templates and assemble its
/// environment. Borrowed per recipe for the duration of the build.
pub struct BuildContext<'a> {
    pub recipe: &'a Recipe,
    /// Enabled option set for this build.
    pub enabled: &'a BTreeSet<String>,
    /// Staged prefix that `{prefix}` expands to during the build.
    pub prefix: &'a Path,
    /// Install prefixes of already-built dependencies, by name.
    pub dep_prefixes: &'a BTreeMap<String, PathBuf>,
    /// Download cache directory (`{cache}`).
    pub cache_dir: &'a Path,
    /// Extracted, patched source tree; the working directory for steps.
    pub source_dir: &'a Path,
    /// Where per-step logs are written.
    pub log_dir: &'a Path,
    /// Parallel job count (`{jobs}`).
    pub jobs: usize,
}

impl BuildContext<'_> {
    /// Expand every `{placeholder}` in a template string.
    pub fn expand(&self, template: &str) -> Result<String> {
        let re = Placeholder::regex();
        let mut out = String::new();
        let mut last = 0;

        for caps in re.captures_iter(template) {
            let whole = caps.get(0).expect("capture 0 always present");
            out.push_str(&template[last..whole.start()]);

            let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let placeholder = Placeholder::parse(key, caps.get(2).map(|m| m.as_str()))?;
            out.push_str(&self.value(&placeholder)?);

            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    fn value(&self, placeholder: &Placeholder) -> Result<String> {
        let path = |p: PathBuf| p.display().to_string();
        Ok(match placeholder {
            Placeholder::Prefix => path(self.prefix.to_path_buf()),
            Placeholder::Version => self.recipe.version().to_string(),
            Placeholder::Cache => path(self.cache_dir.to_path_buf()),
            Placeholder::Jobs => self.jobs.to_string(),
            Placeholder::DepPrefix(name) => path(self.dep_prefix(name)?.to_path_buf()),
            Placeholder::DepInclude(name) => path(self.dep_prefix(name)?.join("include")),
            Placeholder::DepLib(name) => path(self.dep_prefix(name)?.join("lib")),
            Placeholder::DepBin(name) => path(self.dep_prefix(name)?.join("bin")),
        })
    }

    fn dep_prefix(&self, name: &str) -> Result<&PathBuf> {
        self.dep_prefixes.get(name).ok_or_else(|| {
            anyhow!(
                "dependency `{}` has no installed prefix (is its feature disabled?)",
                name
            )
        })
    }

    /// Final argv for a step: expanded templates, plus option args when
    /// the step is option-aware. Option args follow declaration order of
    /// the `[[options]]` entries.
    pub fn step_argv(&self, step: &BuildStep) -> Result<Vec<String>> {
        let mut argv = Vec::with_capacity(step.argv.len());
        for arg in &step.argv {
            argv.push(self.expand(arg)?);
        }

        if step.option_args {
            for option in &self.recipe.options {
                let args = if self.enabled.contains(&option.name) {
                    &option.with_args
                } else {
                    &option.without_args
                };
                for arg in args {
                    argv.push(self.expand(arg)?);
                }
            }
        }

        Ok(argv)
    }

    /// Environment shared by every step.
    ///
    /// - `LC_ALL=C` for reproducible tool output;
    /// - dependency `bin/` dirs and enabled options' `path-prepend` dirs
    ///   ahead of the inherited PATH;
    /// - runtime dependency prefixes injected via CPPFLAGS/LDFLAGS.
    pub fn environment(&self) -> Result<Vec<(String, String)>> {
        let mut env = vec![("LC_ALL".to_string(), "C".to_string())];

        let mut path_entries: Vec<String> = Vec::new();
        for option in &self.recipe.options {
            if self.enabled.contains(&option.name) {
                if let Some(dir) = &option.path_prepend {
                    path_entries.push(dir.display().to_string());
                }
            }
        }
        for dep in &self.recipe.dependencies {
            if let Some(prefix) = self.dep_prefixes.get(&dep.name) {
                path_entries.push(prefix.join("bin").display().to_string());
            }
        }
        if let Ok(inherited) = std::env::var("PATH") {
            path_entries.push(inherited);
        }
        env.push(("PATH".to_string(), path_entries.join(":")));

        let mut cppflags = Vec::new();
        let mut ldflags = Vec::new();
        for dep in &self.recipe.dependencies {
            if dep.kind != DepKind::Runtime {
                continue;
            }
            if let Some(prefix) = self.dep_prefixes.get(&dep.name) {
                cppflags.push(format!("-I{}", prefix.join("include").display()));
                ldflags.push(format!("-L{}", prefix.join("lib").display()));
            }
        }
        if !cppflags.is_empty() {
            env.push(("CPPFLAGS".to_string(), cppflags.join(" ")));
            env.push(("LDFLAGS".to_string(), ldflags.join(" ")));
        }

        Ok(env)
    }
}

/// Run every build step to completion, in order.
///
/// A non-zero exit from any step is fatal and aborts the rest of the
/// sequence; the caller never installs a partially built tree.
pub fn run_steps(ctx: &BuildContext<'_>) -> Result<(), BuildError> {
    let env = ctx.environment()?;

    for (index, step) in ctx.recipe.steps.iter().enumerate() {
        let argv = ctx.step_argv(step)?;
        let program = resolve_program(&argv[0], &env, ctx.source_dir);

        let mut builder = ProcessBuilder::new(&program)
            .args(&argv[1..])
            .cwd(ctx.source_dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        for (key, value) in &step.env {
            builder = builder.env(key, ctx.expand(value)?);
        }

        let log = ctx.log_dir.join(format!("step-{}.log", index));
        info!(
            package = ctx.recipe.name(),
            step = %builder.display_command(),
            "running build step"
        );

        let status = builder
            .exec_logged(&log)
            .with_context(|| format!("failed to run `{}`", builder.display_command()))?;

        if !status.success() {
            return Err(BuildError::StepFailed {
                step: builder.display_command(),
                status: status.to_string(),
                log,
            });
        }
    }

    Ok(())
}

/// Resolve a step program against the assembled PATH.
///
/// Process spawning resolves against the parent's PATH, not the child
/// environment, so PATH prepends from options and dependencies would be
/// ignored without an explicit lookup. Paths with a separator (like
/// `./configure`) are taken relative to the source tree as-is.
pub(crate) fn resolve_program(program: &str, env: &[(String, String)], cwd: &Path) -> PathBuf {
    if program.contains('/') {
        return PathBuf::from(program);
    }

    let path = env
        .iter()
        .find(|(k, _)| k == "PATH")
        .map(|(_, v)| v.as_str())
        .unwrap_or_default();

    which::which_in(program, Some(path), cwd).unwrap_or_else(|_| PathBuf::from(program))
}
