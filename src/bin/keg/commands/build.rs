//! `keg build` command

use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::cli::BuildArgs;
use keg::ops::{self, BuildOptions};
use keg::{GlobalContext, Registry};

pub fn execute(ctx: &GlobalContext, args: BuildArgs) -> Result<()> {
    let registry = Registry::load(ctx.recipes_dir())?;

    let opts = BuildOptions {
        with: args.with.into_iter().collect::<BTreeSet<_>>(),
        without: args.without.into_iter().collect::<BTreeSet<_>>(),
        run_tests: !args.no_test,
        jobs: args.jobs,
    };

    if args.plan {
        let plan = ops::resolve_plan(&registry, &args.name, &opts)
            .map_err(anyhow::Error::new)?;
        let json =
            serde_json::to_string_pretty(&plan).context("failed to serialize build plan")?;
        println!("{}", json);
        return Ok(());
    }

    let summary =
        ops::build(ctx, &registry, &args.name, &opts).map_err(anyhow::Error::new)?;

    for name in &summary.skipped {
        eprintln!("Skipped {} (already installed)", name);
    }
    for prefix in &summary.installed {
        eprintln!(
            "Installed {} {} to {}",
            prefix.name(),
            prefix.version(),
            prefix.path().display()
        );
    }
    for warning in &summary.warnings {
        eprintln!("warning: {}", warning);
    }

    Ok(())
}
