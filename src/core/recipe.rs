//! Recipe parsing and schema.
//!
//! A recipe is the declarative description of one buildable package: where
//! its source lives, how to verify it, what it depends on, which text
//! substitutions to apply, and the external steps that configure, compile
//! and stage it. Recipes are plain TOML documents, validated fully at load
//! time so that no external process runs on behalf of a malformed recipe.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use semver::Version;
use serde::Deserialize;
use url::Url;

/// A fully loaded, validated recipe. Immutable once constructed.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    pub package: PackageMeta,
    pub source: SourceSpec,

    /// Dependency list in declaration order. Order matters: it is the
    /// tie-break for the resolver's topological sort.
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,

    #[serde(default)]
    pub options: Vec<OptionSpec>,

    /// Patch operations, applied in declaration order.
    #[serde(default)]
    pub patches: Vec<PatchOp>,

    /// External build steps, run in declaration order inside the
    /// extracted source tree.
    #[serde(default)]
    pub steps: Vec<BuildStep>,

    #[serde(default)]
    pub check: Option<CheckSpec>,
}

/// The `[package]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PackageMeta {
    pub name: String,
    pub version: Version,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    /// Reason this keg must stay out of the shared `opt` path.
    /// `Some` means the installed prefix is never linked.
    #[serde(default)]
    pub keg_only: Option<String>,
}

/// The `[source]` section: where the archive comes from and how to verify it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    pub url: String,

    /// Fallback URLs, tried in declaration order after `url`.
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// Hex-encoded SHA256 of the archive. Also the cache key.
    pub sha256: String,
}

impl SourceSpec {
    /// All candidate URLs: primary first, then mirrors in order.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.mirrors.iter().map(|m| m.as_str()))
    }

    /// The filename component of the primary URL.
    pub fn filename(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(self.url.as_str())
    }
}

/// Dependency kind: when the dependency must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    /// Needed only while building (autoconf, pkg-config, ...).
    Build,
    /// Needed at build time and after install; its prefix is injected
    /// into include/library search paths.
    #[default]
    Runtime,
}

/// One `[[dependencies]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySpec {
    pub name: String,

    #[serde(default)]
    pub kind: DepKind,

    /// When set, this edge only exists if the named option is enabled
    /// for the build request.
    #[serde(default)]
    pub feature: Option<String>,
}

/// One `[[options]]` entry: a named boolean toggle.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct OptionSpec {
    pub name: String,

    /// Whether the option is on unless the request says `--without`.
    #[serde(default = "default_true")]
    pub default: bool,

    #[serde(default)]
    pub description: Option<String>,

    /// Extra args appended to option-aware steps when enabled.
    #[serde(default)]
    pub with_args: Vec<String>,

    /// Extra args appended to option-aware steps when disabled.
    #[serde(default)]
    pub without_args: Vec<String>,

    /// Directory prepended to PATH for all steps when enabled
    /// (e.g. a documentation toolchain outside the default PATH).
    #[serde(default)]
    pub path_prepend: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// One `[[patches]]` entry. Exactly one of the three forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PatchOp {
    /// Replace every occurrence of a literal string.
    Literal {
        file: String,
        find: String,
        replace: String,
    },
    /// Regex substitution over the whole file.
    Regex {
        file: String,
        regex: String,
        replace: String,
    },
    /// Append a line to an existing file.
    Append { file: String, append: String },
}

impl PatchOp {
    /// The file this operation targets, relative to the source root.
    pub fn file(&self) -> &str {
        match self {
            PatchOp::Literal { file, .. } => file,
            PatchOp::Regex { file, .. } => file,
            PatchOp::Append { file, .. } => file,
        }
    }

    /// Short description of the match target, for error messages.
    pub fn pattern(&self) -> &str {
        match self {
            PatchOp::Literal { find, .. } => find,
            PatchOp::Regex { regex, .. } => regex,
            PatchOp::Append { append, .. } => append,
        }
    }
}

/// One `[[steps]]` entry: a single external invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BuildStep {
    /// Program and arguments. May contain `{placeholder}` templates.
    pub argv: Vec<String>,

    /// When true, enabled/disabled option args are appended to this
    /// step (the configure step, typically).
    #[serde(default)]
    pub option_args: bool,

    /// Extra environment for this step only.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// The `[check]` section: optional post-build test commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct CheckSpec {
    /// Commands to run, each an argv.
    pub commands: Vec<Vec<String>>,

    /// Log filename the combined output is written to, relative to the
    /// source tree. Installed into the prefix afterwards.
    #[serde(default = "default_check_log")]
    pub log: String,

    /// Extra log files produced by the suite itself, installed into the
    /// prefix when present.
    #[serde(default)]
    pub install_logs: Vec<String>,
}

fn default_check_log() -> String {
    "make-check.log".to_string()
}

/// A `{placeholder}` template inside step argv, step env, or option args.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// This package's (staged) install prefix.
    Prefix,
    /// The package version.
    Version,
    /// The download cache directory.
    Cache,
    /// Parallel job count.
    Jobs,
    /// Install prefix of a named dependency.
    DepPrefix(String),
    /// `include/` under a named dependency's prefix.
    DepInclude(String),
    /// `lib/` under a named dependency's prefix.
    DepLib(String),
    /// `bin/` under a named dependency's prefix.
    DepBin(String),
}

impl Placeholder {
    /// Regex matching placeholder occurrences. Braced text that does not
    /// match this shape is passed through untouched.
    pub fn regex() -> &'static regex::Regex {
        static RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
            regex::Regex::new(r"\{([a-z]+)(?::([A-Za-z0-9@._+-]+))?\}").unwrap()
        });
        &RE
    }

    /// Parse one matched placeholder.
    pub fn parse(key: &str, arg: Option<&str>) -> Result<Placeholder> {
        match (key, arg) {
            ("prefix", None) => Ok(Placeholder::Prefix),
            ("version", None) => Ok(Placeholder::Version),
            ("cache", None) => Ok(Placeholder::Cache),
            ("jobs", None) => Ok(Placeholder::Jobs),
            ("prefix", Some(dep)) => Ok(Placeholder::DepPrefix(dep.to_string())),
            ("include", Some(dep)) => Ok(Placeholder::DepInclude(dep.to_string())),
            ("lib", Some(dep)) => Ok(Placeholder::DepLib(dep.to_string())),
            ("bin", Some(dep)) => Ok(Placeholder::DepBin(dep.to_string())),
            _ => bail!("unknown placeholder `{{{}{}}}`", key, match arg {
                Some(a) => format!(":{}", a),
                None => String::new(),
            }),
        }
    }

    /// Extract all placeholders from a template string.
    pub fn parse_all(template: &str) -> Result<Vec<Placeholder>> {
        let mut found = Vec::new();
        for caps in Self::regex().captures_iter(template) {
            let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let arg = caps.get(2).map(|m| m.as_str());
            found.push(Self::parse(key, arg)?);
        }
        Ok(found)
    }

    /// The dependency name this placeholder refers to, if any.
    pub fn dep_name(&self) -> Option<&str> {
        match self {
            Placeholder::DepPrefix(n)
            | Placeholder::DepInclude(n)
            | Placeholder::DepLib(n)
            | Placeholder::DepBin(n) => Some(n),
            _ => None,
        }
    }
}

impl Recipe {
    /// Load and validate a recipe from a TOML file.
    pub fn load(path: &Path) -> Result<Recipe> {
        let contents = crate::util::fs::read_to_string(path)?;
        let recipe: Recipe = toml::from_str(&contents)
            .with_context(|| format!("failed to parse recipe: {}", path.display()))?;
        recipe
            .validate()
            .with_context(|| format!("invalid recipe: {}", path.display()))?;
        Ok(recipe)
    }

    /// Parse and validate a recipe from a TOML string.
    pub fn parse(contents: &str) -> Result<Recipe> {
        let recipe: Recipe = toml::from_str(contents).context("failed to parse recipe")?;
        recipe.validate()?;
        Ok(recipe)
    }

    /// The package name.
    pub fn name(&self) -> &str {
        &self.package.name
    }

    /// The package version.
    pub fn version(&self) -> &Version {
        &self.package.version
    }

    /// Whether this recipe must stay out of the shared `opt` path.
    pub fn is_keg_only(&self) -> bool {
        self.package.keg_only.is_some()
    }

    /// Look up an option by name.
    pub fn option(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }

    /// Resolve the enabled option set for a request.
    ///
    /// `with` forces options on, `without` forces them off; anything else
    /// follows the declared default. Unknown names in either set are an
    /// error so that typos surface before any side effect.
    pub fn enabled_options(
        &self,
        with: &BTreeSet<String>,
        without: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        for name in with.iter().chain(without.iter()) {
            if self.option(name).is_none() {
                bail!(
                    "package `{}` has no option named `{}`",
                    self.package.name,
                    name
                );
            }
        }
        if let Some(both) = with.intersection(without).next() {
            bail!("option `{}` requested both with and without", both);
        }

        Ok(self
            .options
            .iter()
            .filter(|o| {
                if with.contains(&o.name) {
                    true
                } else if without.contains(&o.name) {
                    false
                } else {
                    o.default
                }
            })
            .map(|o| o.name.clone())
            .collect())
    }

    /// Dependency edges active under the given enabled option set.
    /// Required edges always; optional edges only when their feature is on.
    pub fn active_dependencies<'a>(
        &'a self,
        enabled: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a DependencySpec> {
        self.dependencies.iter().filter(move |d| match &d.feature {
            Some(feature) => enabled.contains(feature),
            None => true,
        })
    }

    /// Validate the recipe before anything runs on its behalf.
    fn validate(&self) -> Result<()> {
        if self.package.name.is_empty() {
            bail!("package name must not be empty");
        }

        if self.steps.is_empty() {
            bail!("recipe has no build steps");
        }
        for step in &self.steps {
            if step.argv.is_empty() {
                bail!("build step has an empty argv");
            }
        }
        if let Some(check) = &self.check {
            if check.commands.iter().any(|c| c.is_empty()) {
                bail!("check command has an empty argv");
            }
        }

        let digest = &self.source.sha256;
        if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!("source sha256 must be 64 hex characters, got `{}`", digest);
        }

        for candidate in self.source.candidates() {
            let parsed = Url::parse(candidate)
                .with_context(|| format!("invalid source URL: {}", candidate))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("unsupported URL scheme in `{}`", candidate);
            }
        }

        let mut seen = BTreeSet::new();
        for option in &self.options {
            if !seen.insert(option.name.as_str()) {
                bail!("duplicate option `{}`", option.name);
            }
        }
        for dep in &self.dependencies {
            if let Some(feature) = &dep.feature {
                if self.option(feature).is_none() {
                    bail!(
                        "dependency `{}` is gated on undeclared option `{}`",
                        dep.name,
                        feature
                    );
                }
            }
        }

        for patch in &self.patches {
            if let PatchOp::Regex { regex, .. } = patch {
                regex::Regex::new(regex)
                    .with_context(|| format!("invalid patch regex `{}`", regex))?;
            }
        }

        self.validate_placeholders()
    }

    /// Every `{placeholder}` must be well-formed, and dependency-scoped
    /// placeholders must name a declared dependency.
    fn validate_placeholders(&self) -> Result<()> {
        let dep_names: BTreeSet<&str> =
            self.dependencies.iter().map(|d| d.name.as_str()).collect();

        let mut check = |template: &str| -> Result<()> {
            for placeholder in Placeholder::parse_all(template)? {
                if let Some(dep) = placeholder.dep_name() {
                    if !dep_names.contains(dep) {
                        bail!(
                            "placeholder refers to `{}`, which is not a dependency of `{}`",
                            dep,
                            self.package.name
                        );
                    }
                }
            }
            Ok(())
        };

        for step in &self.steps {
            for arg in &step.argv {
                check(arg)?;
            }
            for value in step.env.values() {
                check(value)?;
            }
        }
        for option in &self.options {
            for arg in option.with_args.iter().chain(option.without_args.iter()) {
                check(arg)?;
            }
        }
        if let Some(check_spec) = &self.check {
            for command in &check_spec.commands {
                for arg in command {
                    check(arg)?;
                }
            }
        }
        Ok(())
    }
}
