//! The build pipeline: resolve, then fetch → patch → build → check →
//! install for every recipe in the plan.
//!
//! Fatal errors abort the remaining stages for the current recipe and
//! leave no partial prefix behind. Only the check stage may downgrade a
//! failure to a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use crate::builder::{self, BuildContext, BuildError};
use crate::check::{self, TestWarning};
use crate::core::{Cellar, InstallPrefix, Registry};
use crate::fetch::{extract, FetchError, Fetcher};
use crate::install::{InstallError, Installer};
use crate::patch::{self, PatchError};
use crate::resolver::{self, BuildPlan, ResolveError};
use crate::util::GlobalContext;

/// Options for a build request.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Options forced on for the target recipe.
    pub with: BTreeSet<String>,
    /// Options forced off for the target recipe.
    pub without: BTreeSet<String>,
    /// Whether to run post-build checks.
    pub run_tests: bool,
    /// Parallel job count for `{jobs}`; autodetected when None.
    pub jobs: Option<usize>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            with: BTreeSet::new(),
            without: BTreeSet::new(),
            run_tests: true,
            jobs: None,
        }
    }
}

/// What a build request accomplished.
#[derive(Debug, Default)]
pub struct BuildSummary {
    /// Prefixes installed by this request, in plan order.
    pub installed: Vec<InstallPrefix>,
    /// Plan members skipped because their prefix already existed.
    pub skipped: Vec<String>,
    /// Non-fatal test failures, surfaced without altering the exit code.
    pub warnings: Vec<TestWarning>,
}

/// A fatal pipeline error: the stage that failed plus the underlying
/// cause. Each failure class maps to a distinct exit code.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("fetching `{package}` failed: {source}")]
    Fetch {
        package: String,
        #[source]
        source: FetchError,
    },

    #[error("patching `{package}` failed: {source}")]
    Patch {
        package: String,
        #[source]
        source: PatchError,
    },

    #[error("building `{package}` failed: {source}")]
    Build {
        package: String,
        #[source]
        source: BuildError,
    },

    #[error("installing `{package}` failed: {source}")]
    Install {
        package: String,
        #[source]
        source: InstallError,
    },

    #[error("setup failed: {0:#}")]
    Setup(#[from] anyhow::Error),
}

impl PipelineError {
    /// The pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Resolve(_) => "resolve",
            PipelineError::Fetch { .. } => "fetch",
            PipelineError::Patch { .. } => "patch",
            PipelineError::Build { .. } => "build",
            PipelineError::Install { .. } => "install",
            PipelineError::Setup(_) => "setup",
        }
    }

    /// Process exit code distinguishing the failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Setup(_) => 1,
            PipelineError::Resolve(_) => 2,
            PipelineError::Fetch { .. } => 3,
            PipelineError::Patch { .. } => 4,
            PipelineError::Build { .. } => 5,
            PipelineError::Install { .. } => 6,
        }
    }
}

/// Resolve the plan for a request without building anything.
pub fn resolve_plan(
    registry: &Registry,
    target: &str,
    opts: &BuildOptions,
) -> Result<BuildPlan, PipelineError> {
    Ok(resolver::resolve(
        registry,
        target,
        &opts.with,
        &opts.without,
    )?)
}

/// Execute a build request end to end.
pub fn build(
    ctx: &GlobalContext,
    registry: &Registry,
    target: &str,
    opts: &BuildOptions,
) -> Result<BuildSummary, PipelineError> {
    let plan = resolve_plan(registry, target, opts)?;

    ctx.ensure_layout()?;
    let cellar = Cellar::new(ctx);
    let installer = Installer::new(&cellar);
    let fetcher = Fetcher::new(ctx.cache_dir())?;

    let jobs = opts.jobs.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let mut dep_prefixes: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut summary = BuildSummary::default();

    for entry in &plan.entries {
        let recipe = registry.get(&entry.name).expect("plan members are loaded");

        let prefix = cellar.prefix(&entry.name, &entry.version);
        if prefix.exists() {
            info!(package = %entry.name, version = %entry.version, "already installed, skipping");
            dep_prefixes.insert(entry.name.clone(), prefix.path().to_path_buf());
            summary.skipped.push(entry.name.clone());
            continue;
        }

        // Fetch (cache hit skips the network entirely).
        let archive = fetcher
            .fetch(&recipe.source)
            .map_err(|source| PipelineError::Fetch {
                package: entry.name.clone(),
                source,
            })?;

        // All work happens in a scratch directory until install.
        let scratch = tempfile::Builder::new()
            .prefix(&format!("keg-{}-", entry.name))
            .tempdir()
            .map_err(|e| PipelineError::Setup(anyhow::Error::new(e)))?;

        let source_root = extract(&archive, &scratch.path().join("src")).map_err(|source| {
            PipelineError::Fetch {
                package: entry.name.clone(),
                source: FetchError::Cache(source),
            }
        })?;

        // Patch.
        patch::apply_all(&recipe.patches, &source_root).map_err(|source| {
            PipelineError::Patch {
                package: entry.name.clone(),
                source,
            }
        })?;

        // Build into the staged prefix.
        let staged = scratch.path().join("stage");
        let enabled: BTreeSet<String> = entry.options.iter().cloned().collect();
        let build_ctx = BuildContext {
            recipe,
            enabled: &enabled,
            prefix: &staged,
            dep_prefixes: &dep_prefixes,
            cache_dir: &ctx.cache_dir(),
            source_dir: &source_root,
            log_dir: &scratch.path().join("logs"),
            jobs,
        };
        builder::run_steps(&build_ctx).map_err(|source| PipelineError::Build {
            package: entry.name.clone(),
            source,
        })?;

        // Check (best-effort), then install.
        let report = match (&recipe.check, opts.run_tests) {
            (Some(spec), true) => Some((spec, check::run(&build_ctx, spec))),
            _ => None,
        };

        let installed = installer
            .install(recipe, &staged)
            .map_err(|source| PipelineError::Install {
                package: entry.name.clone(),
                source,
            })?;

        if let Some((spec, report)) = report {
            let mut logs = Vec::new();
            if report.log_path.is_file() {
                logs.push(report.log_path.clone());
            }
            for extra in &spec.install_logs {
                let path = source_root.join(extra);
                if path.is_file() {
                    logs.push(path);
                }
            }
            for log in logs {
                installer
                    .install_file(&installed, &log)
                    .map_err(|source| PipelineError::Install {
                        package: entry.name.clone(),
                        source,
                    })?;
            }

            if !report.passed {
                let log_name = report
                    .log_path
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_default();
                let warning = TestWarning {
                    package: entry.name.clone(),
                    fail_count: report.fail_count,
                    log: installed.path().join(log_name),
                };
                warn!(%warning, "tests failed, continuing");
                summary.warnings.push(warning);
            }
        }

        if recipe.is_keg_only() {
            info!(
                package = %entry.name,
                reason = recipe.package.keg_only.as_deref().unwrap_or_default(),
                "keg-only, not linking into opt"
            );
        } else {
            installer
                .link_opt(&installed)
                .map_err(|source| PipelineError::Install {
                    package: entry.name.clone(),
                    source,
                })?;
        }

        dep_prefixes.insert(entry.name.clone(), installed.path().to_path_buf());
        summary.installed.push(installed);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Recipe;
    use crate::util::hash::sha256_bytes;
    use std::io::Write;
    use tempfile::TempDir;

    /// Build a gzipped tarball holding `pkg-1.0/` with the given files.
    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let enc =
                flate2::write::GzEncoder::new(&mut bytes, flate2::Compression::default());
            let mut builder = tar::Builder::new(enc);
            for (name, contents) in files {
                let path = format!("pkg-1.0/{}", name);
                let mut header = tar::Header::new_gnu();
                header.set_size(contents.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, &path, contents.as_bytes())
                    .unwrap();
            }
            builder.finish().unwrap();
        }
        bytes
    }

    struct Fixture {
        _tmp: TempDir,
        ctx: GlobalContext,
        registry: Registry,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let ctx = GlobalContext::with_root(tmp.path().join("root"));
            ctx.ensure_layout().unwrap();
            Fixture {
                ctx,
                registry: Registry::default(),
                _tmp: tmp,
            }
        }

        /// Register a recipe whose source is pre-seeded into the cache,
        /// so builds never touch the network.
        fn add_recipe(&mut self, name: &str, body: &str, archive: &[u8]) {
            self.add_recipe_full(name, "", body, archive);
        }

        fn add_recipe_full(
            &mut self,
            name: &str,
            package_extra: &str,
            body: &str,
            archive: &[u8],
        ) {
            let sha = sha256_bytes(archive);
            let doc = format!(
                r#"
[package]
name = "{name}"
version = "1.0.0"
{package_extra}
[source]
url = "https://example.org/{name}-1.0.tar.gz"
sha256 = "{sha}"
{body}
"#
            );
            let recipe = Recipe::parse(&doc).unwrap();

            let cached = self
                .ctx
                .cache_dir()
                .join(format!("{}-{}-1.0.tar.gz", sha, name));
            let mut file = std::fs::File::create(cached).unwrap();
            file.write_all(archive).unwrap();

            self.registry.add(recipe);
        }
    }

    const INSTALL_STEP: &str = r#"
[[steps]]
argv = ["sh", "-c", "mkdir -p {prefix}/bin && cp tool {prefix}/bin/tool"]
"#;

    #[test]
    fn test_pipeline_installs_dependency_first() {
        let mut fix = Fixture::new();
        let archive = tarball(&[("tool", "#!/bin/sh\n")]);
        fix.add_recipe(
            "app",
            &format!("{}\n[[dependencies]]\nname = \"libdep\"\n", INSTALL_STEP),
            &archive,
        );
        fix.add_recipe("libdep", INSTALL_STEP, &archive);

        let summary = build(&fix.ctx, &fix.registry, "app", &BuildOptions::default()).unwrap();

        assert_eq!(summary.installed.len(), 2);
        assert_eq!(summary.installed[0].name(), "libdep");
        assert_eq!(summary.installed[1].name(), "app");
        assert!(summary.warnings.is_empty());

        let cellar = Cellar::new(&fix.ctx);
        assert!(cellar.opt_link("app").exists());
        assert!(summary.installed[1].path().join("bin/tool").is_file());
    }

    #[test]
    fn test_keg_only_is_not_linked() {
        let mut fix = Fixture::new();
        let archive = tarball(&[("tool", "x")]);
        fix.add_recipe_full(
            "shadow",
            "keg-only = \"conflicts with the default blas\"\n",
            INSTALL_STEP,
            &archive,
        );

        build(&fix.ctx, &fix.registry, "shadow", &BuildOptions::default()).unwrap();

        let cellar = Cellar::new(&fix.ctx);
        assert!(cellar.is_installed("shadow", &semver::Version::new(1, 0, 0)));
        assert!(!cellar.opt_link("shadow").exists());
    }

    #[test]
    fn test_failed_step_leaves_no_prefix() {
        let mut fix = Fixture::new();
        let archive = tarball(&[("tool", "x")]);
        fix.add_recipe(
            "broken",
            r#"
[[steps]]
argv = ["sh", "-c", "exit 1"]
"#,
            &archive,
        );

        let err = build(&fix.ctx, &fix.registry, "broken", &BuildOptions::default()).unwrap_err();
        assert_eq!(err.stage(), "build");
        assert_eq!(err.exit_code(), 5);

        let cellar = Cellar::new(&fix.ctx);
        assert!(!cellar.is_installed("broken", &semver::Version::new(1, 0, 0)));
    }

    #[test]
    fn test_patch_mismatch_aborts() {
        let mut fix = Fixture::new();
        let archive = tarball(&[("tool", "unrelated contents")]);
        fix.add_recipe(
            "stale",
            &format!(
                r#"
[[patches]]
file = "tool"
find = "text that is not there"
replace = "anything"
{}"#,
                INSTALL_STEP
            ),
            &archive,
        );

        let err = build(&fix.ctx, &fix.registry, "stale", &BuildOptions::default()).unwrap_err();
        assert_eq!(err.stage(), "patch");
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_fail_count_becomes_warning_not_error() {
        let mut fix = Fixture::new();
        let archive = tarball(&[("tool", "x")]);
        fix.add_recipe(
            "flaky",
            &format!(
                r#"{}
[check]
commands = [["sh", "-c", "echo 'FAIL 2'"]]
"#,
                INSTALL_STEP
            ),
            &archive,
        );

        let summary = build(&fix.ctx, &fix.registry, "flaky", &BuildOptions::default()).unwrap();

        assert_eq!(summary.installed.len(), 1);
        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(summary.warnings[0].fail_count, Some(2));
        // The raw log landed in the prefix.
        assert!(summary.installed[0]
            .path()
            .join("make-check.log")
            .is_file());
    }

    #[test]
    fn test_fail_zero_yields_no_warning() {
        let mut fix = Fixture::new();
        let archive = tarball(&[("tool", "x")]);
        fix.add_recipe(
            "steady",
            &format!(
                r#"{}
[check]
commands = [["sh", "-c", "echo '  FAIL 0'"]]
"#,
                INSTALL_STEP
            ),
            &archive,
        );

        let summary = build(&fix.ctx, &fix.registry, "steady", &BuildOptions::default()).unwrap();
        assert!(summary.warnings.is_empty());
    }

    #[test]
    fn test_no_test_skips_checks() {
        let mut fix = Fixture::new();
        let archive = tarball(&[("tool", "x")]);
        fix.add_recipe(
            "skipped-checks",
            &format!(
                r#"{}
[check]
commands = [["sh", "-c", "echo 'FAIL 9'"]]
"#,
                INSTALL_STEP
            ),
            &archive,
        );

        let opts = BuildOptions {
            run_tests: false,
            ..Default::default()
        };
        let summary = build(&fix.ctx, &fix.registry, "skipped-checks", &opts).unwrap();
        assert!(summary.warnings.is_empty());
        assert!(!summary.installed[0]
            .path()
            .join("make-check.log")
            .exists());
    }

    #[test]
    fn test_second_build_skips_installed() {
        let mut fix = Fixture::new();
        let archive = tarball(&[("tool", "x")]);
        fix.add_recipe("once", INSTALL_STEP, &archive);

        build(&fix.ctx, &fix.registry, "once", &BuildOptions::default()).unwrap();
        let summary = build(&fix.ctx, &fix.registry, "once", &BuildOptions::default()).unwrap();

        assert!(summary.installed.is_empty());
        assert_eq!(summary.skipped, vec!["once".to_string()]);
    }
}
