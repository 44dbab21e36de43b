//! End-to-end CLI tests.
//!
//! Source archives are seeded directly into the content-addressed cache,
//! so builds run entirely offline.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use keg::util::hash::sha256_bytes;

/// A gzipped tarball holding `pkg-1.0/` with the given files.
fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let enc = flate2::write::GzEncoder::new(&mut bytes, flate2::Compression::default());
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

struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("recipes")).unwrap();
        std::fs::create_dir_all(tmp.path().join("root/cache")).unwrap();
        Workspace { tmp }
    }

    fn root(&self) -> PathBuf {
        self.tmp.path().join("root")
    }

    fn recipes(&self) -> PathBuf {
        self.tmp.path().join("recipes")
    }

    /// Write a recipe and seed its archive into the cache.
    fn seed(&self, name: &str, package_extra: &str, body: &str, archive: &[u8]) {
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
        std::fs::write(self.recipes().join(format!("{}.toml", name)), doc).unwrap();

        let cached = self
            .root()
            .join("cache")
            .join(format!("{}-{}-1.0.tar.gz", sha, name));
        std::fs::write(cached, archive).unwrap();
    }

    fn keg(&self) -> Command {
        let mut cmd = Command::cargo_bin("keg").unwrap();
        cmd.arg("--root")
            .arg(self.root())
            .arg("--recipes")
            .arg(self.recipes());
        cmd
    }

    fn prefix(&self, name: &str) -> PathBuf {
        self.root().join("cellar").join(name).join("1.0.0")
    }

    fn opt_link(&self, name: &str) -> PathBuf {
        self.root().join("opt").join(name)
    }
}

const INSTALL_STEP: &str = r#"
[[steps]]
argv = ["sh", "-c", "mkdir -p {prefix}/bin && cp tool {prefix}/bin/tool"]
"#;

fn read_link_target(link: &Path) -> Option<PathBuf> {
    std::fs::read_link(link).ok()
}

#[test]
fn test_build_installs_and_links() {
    let ws = Workspace::new();
    ws.seed("gl2ps", "", INSTALL_STEP, &tarball(&[("tool", "#!/bin/sh\n")]));

    ws.keg()
        .args(["build", "gl2ps"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Installed gl2ps 1.0.0"));

    assert!(ws.prefix("gl2ps").join("bin/tool").is_file());
    assert_eq!(
        read_link_target(&ws.opt_link("gl2ps")),
        Some(ws.prefix("gl2ps"))
    );
}

#[test]
fn test_build_installs_dependency_first() {
    let ws = Workspace::new();
    let archive = tarball(&[("tool", "x")]);
    ws.seed(
        "octave",
        "",
        &format!("{}\n[[dependencies]]\nname = \"openblas\"\n", INSTALL_STEP),
        &archive,
    );
    ws.seed("openblas", "", INSTALL_STEP, &archive);

    ws.keg().args(["build", "octave"]).assert().success();

    assert!(ws.prefix("openblas").is_dir());
    assert!(ws.prefix("octave").is_dir());
}

#[test]
fn test_keg_only_is_not_linked() {
    let ws = Workspace::new();
    ws.seed(
        "openblas",
        "keg-only = \"shadows the system blas\"\n",
        INSTALL_STEP,
        &tarball(&[("tool", "x")]),
    );

    ws.keg().args(["build", "openblas"]).assert().success();

    assert!(ws.prefix("openblas").is_dir());
    assert!(!ws.opt_link("openblas").exists());
}

#[test]
fn test_failing_checks_warn_but_exit_zero() {
    let ws = Workspace::new();
    ws.seed(
        "flaky",
        "",
        &format!(
            r#"{}
[check]
commands = [["sh", "-c", "echo 'FAIL 2'"]]
"#,
            INSTALL_STEP
        ),
        &tarball(&[("tool", "x")]),
    );

    ws.keg()
        .args(["build", "flaky"])
        .assert()
        .success()
        .stderr(predicate::str::contains("2 test failure"));

    // The raw log was preserved in the prefix.
    assert!(ws.prefix("flaky").join("make-check.log").is_file());
}

#[test]
fn test_no_test_skips_checks() {
    let ws = Workspace::new();
    ws.seed(
        "flaky",
        "",
        &format!(
            r#"{}
[check]
commands = [["sh", "-c", "echo 'FAIL 2'"]]
"#,
            INSTALL_STEP
        ),
        &tarball(&[("tool", "x")]),
    );

    ws.keg()
        .args(["build", "flaky", "--no-test"])
        .assert()
        .success()
        .stderr(predicate::str::contains("test failure").not());
}

#[test]
fn test_patch_mismatch_exit_code() {
    let ws = Workspace::new();
    ws.seed(
        "stale",
        "",
        &format!(
            r#"
[[patches]]
file = "tool"
find = "text that is not present"
replace = "anything"
{}"#,
            INSTALL_STEP
        ),
        &tarball(&[("tool", "unrelated contents")]),
    );

    ws.keg()
        .args(["build", "stale"])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("patching"));
}

#[test]
fn test_failed_step_exit_code_and_no_prefix() {
    let ws = Workspace::new();
    ws.seed(
        "broken",
        "",
        "\n[[steps]]\nargv = [\"sh\", \"-c\", \"exit 1\"]\n",
        &tarball(&[("tool", "x")]),
    );

    ws.keg().args(["build", "broken"]).assert().failure().code(5);

    assert!(!ws.prefix("broken").exists());
}

#[test]
fn test_unknown_recipe_exit_code() {
    let ws = Workspace::new();
    ws.seed("real", "", INSTALL_STEP, &tarball(&[("tool", "x")]));

    ws.keg()
        .args(["build", "imaginary"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("imaginary"));
}

#[test]
fn test_plan_emits_json_without_building() {
    let ws = Workspace::new();
    let archive = tarball(&[("tool", "x")]);
    ws.seed(
        "octave",
        "",
        &format!("{}\n[[dependencies]]\nname = \"openblas\"\n", INSTALL_STEP),
        &archive,
    );
    ws.seed("openblas", "", INSTALL_STEP, &archive);

    let assert = ws
        .keg()
        .args(["build", "octave", "--plan"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let plan: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(plan["target"], "octave");
    assert_eq!(plan["entries"][0]["name"], "openblas");
    assert_eq!(plan["entries"][1]["name"], "octave");

    // Nothing was built.
    assert!(!ws.prefix("octave").exists());
}

#[test]
fn test_tree_lists_plan_order() {
    let ws = Workspace::new();
    let archive = tarball(&[("tool", "x")]);
    ws.seed(
        "octave",
        "",
        &format!("{}\n[[dependencies]]\nname = \"fftw\"\n", INSTALL_STEP),
        &archive,
    );
    ws.seed("fftw", "", INSTALL_STEP, &archive);

    ws.keg()
        .args(["tree", "octave"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. fftw 1.0.0"))
        .stdout(predicate::str::contains("2. octave 1.0.0"));
}

#[test]
fn test_cellar_lists_installed_kegs() {
    let ws = Workspace::new();
    ws.seed("gl2ps", "", INSTALL_STEP, &tarball(&[("tool", "x")]));

    ws.keg().args(["build", "gl2ps"]).assert().success();

    ws.keg()
        .args(["cellar"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gl2ps 1.0.0 (linked)"));
}

#[test]
fn test_rebuild_skips_installed() {
    let ws = Workspace::new();
    ws.seed("gl2ps", "", INSTALL_STEP, &tarball(&[("tool", "x")]));

    ws.keg().args(["build", "gl2ps"]).assert().success();
    ws.keg()
        .args(["build", "gl2ps"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Skipped gl2ps"));
}
