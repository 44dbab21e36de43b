//! The test harness adapter: best-effort post-build checks.
//!
//! Check commands run after a successful build, with combined output
//! captured to a log. The log is scanned for a `FAIL <n>` summary line;
//! anything other than `FAIL 0` downgrades to a recorded warning. This is
//! deliberate policy, not an oversight: third-party numerical test suites
//! are flaky, and a flaky suite must not block installation of an
//! otherwise successfully built artifact.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use regex::Regex;
use tracing::{info, warn};

use crate::builder::{resolve_program, BuildContext};
use crate::core::CheckSpec;
use crate::util::process::ProcessBuilder;

/// Outcome of the check stage. Derived artifact, never authoritative for
/// install success.
#[derive(Debug, Clone)]
pub struct TestReport {
    /// True only when the log contains a `FAIL 0` summary.
    pub passed: bool,
    /// Parsed failure count, if a summary line was found.
    pub fail_count: Option<u32>,
    /// The raw combined log.
    pub log_path: PathBuf,
}

/// A recorded, non-fatal test failure. Surfaced in the install summary
/// without altering the exit code.
#[derive(Debug, Clone)]
pub struct TestWarning {
    pub package: String,
    pub fail_count: Option<u32>,
    pub log: PathBuf,
}

impl fmt::Display for TestWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fail_count {
            Some(n) => write!(
                f,
                "{}: {} test failure(s), details in {}",
                self.package,
                n,
                self.log.display()
            ),
            None => write!(
                f,
                "{}: no test summary found, details in {}",
                self.package,
                self.log.display()
            ),
        }
    }
}

/// Run the recipe's check commands and parse the result.
///
/// Never fatal: a command that cannot be spawned, exits non-zero, or
/// produces no summary line yields a failed report, and the caller turns
/// that into a warning.
pub fn run(ctx: &BuildContext<'_>, spec: &CheckSpec) -> TestReport {
    let log_path = ctx.source_dir.join(&spec.log);

    let failed_early = run_commands(ctx, spec, &log_path);

    let contents = std::fs::read_to_string(&log_path).unwrap_or_default();
    let fail_count = parse_fail_count(&contents);
    let passed = !failed_early && fail_count == Some(0);

    if passed {
        info!(package = ctx.recipe.name(), "all checks passed");
    } else {
        warn!(
            package = ctx.recipe.name(),
            fail_count, "checks did not pass cleanly"
        );
    }

    TestReport {
        passed,
        fail_count,
        log_path,
    }
}

/// Run each command, appending combined output to the log. Returns true
/// if a command could not run at all; a non-zero exit stops the sequence
/// but the log is still parsed for a summary.
fn run_commands(ctx: &BuildContext<'_>, spec: &CheckSpec, log_path: &PathBuf) -> bool {
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(mut log) = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(log_path)
    else {
        return true;
    };

    let Ok(env) = ctx.environment() else {
        return true;
    };

    for command in &spec.commands {
        let mut argv = Vec::with_capacity(command.len());
        for arg in command {
            match ctx.expand(arg) {
                Ok(expanded) => argv.push(expanded),
                Err(e) => {
                    let _ = writeln!(log, "keg: cannot expand `{}`: {:#}", arg, e);
                    return true;
                }
            }
        }

        let program = resolve_program(&argv[0], &env, ctx.source_dir);
        let builder = ProcessBuilder::new(&program)
            .args(&argv[1..])
            .cwd(ctx.source_dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        match builder.exec() {
            Ok(output) => {
                let _ = log.write_all(&output.stdout);
                let _ = log.write_all(&output.stderr);
                if !output.status.success() {
                    let _ = writeln!(
                        log,
                        "keg: `{}` exited with {}",
                        builder.display_command(),
                        output.status
                    );
                    break;
                }
            }
            Err(e) => {
                let _ = writeln!(
                    log,
                    "keg: failed to run `{}`: {:#}",
                    builder.display_command(),
                    e
                );
                return true;
            }
        }
    }

    false
}

/// Find the `FAIL <n>` summary in a check log. Case-insensitive, first
/// match wins.
pub fn parse_fail_count(log: &str) -> Option<u32> {
    static RE: std::sync::LazyLock<Regex> =
        std::sync::LazyLock::new(|| Regex::new(r"(?im)^\s*fail\s*:?\s*(\d+)\s*$").unwrap());

    RE.captures(log)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fail_count() {
        assert_eq!(parse_fail_count("  PASS 13205\n  FAIL 0\n"), Some(0));
        assert_eq!(parse_fail_count("  PASS 13203\n  FAIL 2\n"), Some(2));
        assert_eq!(parse_fail_count("  fail: 7\n"), Some(7));
        assert_eq!(parse_fail_count("no summary here"), None);
        // FAIL must be the start of the line, not part of a word.
        assert_eq!(parse_fail_count("XFAIL 3"), None);
    }

    mod harness {
        use super::*;
        use crate::builder::BuildContext;
        use crate::core::Recipe;
        use std::collections::{BTreeMap, BTreeSet};
        use std::path::PathBuf;
        use tempfile::TempDir;

        fn recipe() -> Recipe {
            Recipe::parse(&format!(
                r#"
[package]
name = "octave-openblas"
version = "4.2.1"

[source]
url = "https://example.org/octave-4.2.1.tar.gz"
sha256 = "{}"

[[steps]]
argv = ["make", "all"]
"#,
                "a".repeat(64)
            ))
            .unwrap()
        }

        fn spec(commands: Vec<Vec<&str>>) -> CheckSpec {
            CheckSpec {
                commands: commands
                    .into_iter()
                    .map(|c| c.into_iter().map(String::from).collect())
                    .collect(),
                log: "make-check.log".to_string(),
                install_logs: vec![],
            }
        }

        fn with_ctx<R>(f: impl FnOnce(&BuildContext<'_>) -> R) -> R {
            let tmp = TempDir::new().unwrap();
            let source_dir = tmp.path().join("src");
            std::fs::create_dir_all(&source_dir).unwrap();

            let recipe = recipe();
            let enabled = BTreeSet::new();
            let dep_prefixes = BTreeMap::new();
            let prefix = tmp.path().join("staged");
            let cache = tmp.path().join("cache");
            let logs = tmp.path().join("logs");

            let ctx = BuildContext {
                recipe: &recipe,
                enabled: &enabled,
                prefix: &prefix,
                dep_prefixes: &dep_prefixes,
                cache_dir: &cache,
                source_dir: &source_dir,
                log_dir: &logs,
                jobs: 1,
            };
            f(&ctx)
        }

        #[test]
        fn test_fail_zero_passes() {
            with_ctx(|ctx| {
                let report = run(ctx, &spec(vec![vec!["sh", "-c", "echo '  FAIL 0'"]]));
                assert!(report.passed);
                assert_eq!(report.fail_count, Some(0));
                assert!(report.log_path.exists());
            });
        }

        #[test]
        fn test_nonzero_fail_count_recorded() {
            with_ctx(|ctx| {
                let report = run(ctx, &spec(vec![vec!["sh", "-c", "echo 'FAIL 2'"]]));
                assert!(!report.passed);
                assert_eq!(report.fail_count, Some(2));
            });
        }

        #[test]
        fn test_missing_summary_fails_softly() {
            with_ctx(|ctx| {
                let report = run(ctx, &spec(vec![vec!["sh", "-c", "echo 'all good?'"]]));
                assert!(!report.passed);
                assert_eq!(report.fail_count, None);
            });
        }

        #[test]
        fn test_command_failure_still_parses_log() {
            with_ctx(|ctx| {
                let report = run(
                    ctx,
                    &spec(vec![
                        vec!["sh", "-c", "echo 'FAIL 4'; exit 2"],
                        vec!["sh", "-c", "echo never-runs"],
                    ]),
                );
                assert!(!report.passed);
                assert_eq!(report.fail_count, Some(4));

                let log = std::fs::read_to_string(&report.log_path).unwrap();
                assert!(!log.contains("never-runs"));
            });
        }

        #[test]
        fn test_unspawnable_command_is_soft() {
            with_ctx(|ctx| {
                let report = run(ctx, &spec(vec![vec!["definitely-not-a-real-tool-xyz"]]));
                assert!(!report.passed);
            });
        }

        #[test]
        fn test_warning_display() {
            let warning = TestWarning {
                package: "octave-openblas".to_string(),
                fail_count: Some(2),
                log: PathBuf::from("/cellar/octave-openblas/4.2.1/make-check.log"),
            };
            let text = warning.to_string();
            assert!(text.contains("2 test failure"));
            assert!(text.contains("make-check.log"));
        }
    }
}
