//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Keg - a formula-driven package build orchestrator
#[derive(Parser)]
#[command(name = "keg")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Root directory for the cache, cellar and opt links
    /// (defaults to the platform data directory)
    #[arg(long, global = true, env = "KEG_ROOT")]
    pub root: Option<PathBuf>,

    /// Directory containing recipe TOML files (defaults to ./recipes)
    #[arg(long, global = true, env = "KEG_RECIPES")]
    pub recipes: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a recipe and its dependencies, installing into the cellar
    Build(BuildArgs),

    /// Display the resolved build order for a recipe
    Tree(TreeArgs),

    /// List installed kegs
    Cellar(CellarArgs),
}

#[derive(Args)]
pub struct BuildArgs {
    /// Recipe to build
    pub name: String,

    /// Enable an option on the target recipe
    #[arg(long = "with", value_name = "OPTION")]
    pub with: Vec<String>,

    /// Disable an option on the target recipe
    #[arg(long = "without", value_name = "OPTION")]
    pub without: Vec<String>,

    /// Run post-build checks (the default)
    #[arg(long, overrides_with = "no_test")]
    pub test: bool,

    /// Skip post-build checks
    #[arg(long, overrides_with = "test")]
    pub no_test: bool,

    /// Emit the resolved plan as JSON and exit (no build)
    #[arg(long)]
    pub plan: bool,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct TreeArgs {
    /// Recipe to resolve
    pub name: String,
}

#[derive(Args)]
pub struct CellarArgs {}
