//! `keg tree` command

use anyhow::Result;

use crate::cli::TreeArgs;
use keg::ops::{self, BuildOptions};
use keg::{GlobalContext, Registry};

pub fn execute(ctx: &GlobalContext, args: TreeArgs) -> Result<()> {
    let registry = Registry::load(ctx.recipes_dir())?;

    let opts = BuildOptions::default();
    let plan = ops::resolve_plan(&registry, &args.name, &opts).map_err(anyhow::Error::new)?;

    // Plan order: every dependency precedes its dependent, target last.
    for (index, entry) in plan.entries.iter().enumerate() {
        if entry.options.is_empty() {
            println!("{}. {} {}", index + 1, entry.name, entry.version);
        } else {
            println!(
                "{}. {} {} [{}]",
                index + 1,
                entry.name,
                entry.version,
                entry.options.join(", ")
            );
        }
    }

    Ok(())
}
