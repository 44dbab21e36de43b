//! `keg cellar` command

use anyhow::Result;

use crate::cli::CellarArgs;
use keg::{Cellar, GlobalContext};

pub fn execute(ctx: &GlobalContext, _args: CellarArgs) -> Result<()> {
    let cellar = Cellar::new(ctx);

    let installed = cellar.installed()?;
    if installed.is_empty() {
        eprintln!("No kegs installed in {}", ctx.cellar_dir().display());
        return Ok(());
    }

    for keg in installed {
        if keg.linked {
            println!("{} {} (linked)", keg.name, keg.version);
        } else {
            println!("{} {}", keg.name, keg.version);
        }
    }

    Ok(())
}
