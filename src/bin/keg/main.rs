//! Keg CLI - a formula-driven package build orchestrator

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use keg::ops::PipelineError;
use keg::GlobalContext;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        // Pipeline failures carry an exit code per failure class.
        let code = e
            .downcast_ref::<PipelineError>()
            .map(PipelineError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("keg=debug")
    } else {
        EnvFilter::new("keg=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let mut ctx = match cli.root {
        Some(root) => GlobalContext::with_root(root),
        None => GlobalContext::new()?,
    };
    if let Some(recipes) = cli.recipes {
        ctx = ctx.with_recipes_dir(recipes);
    }
    ctx.set_verbose(cli.verbose);

    // Execute command
    match cli.command {
        Commands::Build(args) => commands::build::execute(&ctx, args),
        Commands::Tree(args) => commands::tree::execute(&ctx, args),
        Commands::Cellar(args) => commands::cellar::execute(&ctx, args),
    }
}
