//! `dsml init` command - Create the dataset tables

use console::style;
use miette::Result;

use crate::cli::args::GlobalOpts;
use crate::cli::helpers::{load_config, open_store};
use crate::dataset::init_schema;

#[derive(clap::Args, Debug)]
pub struct InitArgs {}

pub fn run(_args: InitArgs, global: &GlobalOpts) -> Result<()> {
    let config = load_config(global)?;
    let store = open_store(&config)?;
    let tables = config.table_names();
    init_schema(&store, &tables)?;

    if !global.quiet {
        println!(
            "{} Initialized database {}",
            style("✓").green(),
            style(config.database().display()).cyan()
        );
        for table in [
            &tables.feature_parameters,
            &tables.features,
            &tables.samples,
            &tables.values,
        ] {
            println!("  {}", table);
        }
    }
    Ok(())
}
