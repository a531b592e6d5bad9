//! `dsml stats` command - Row counts per table

use console::style;
use miette::{IntoDiagnostic, Result};
use tabled::{builder::Builder, settings::Style};

use crate::cli::args::{GlobalOpts, OutputFormat};
use crate::cli::helpers::{load_config, open_store};
use crate::dataset::table_stats;

#[derive(clap::Args, Debug)]
pub struct StatsArgs {
    /// Output format
    #[arg(long, short = 'f', default_value = "table")]
    pub format: OutputFormat,
}

pub fn run(args: StatsArgs, global: &GlobalOpts) -> Result<()> {
    let config = load_config(global)?;
    let store = open_store(&config)?;
    let stats = table_stats(&store, &config.table_names())?;

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats).into_diagnostic()?);
        }
        OutputFormat::Table => {
            let mut builder = Builder::default();
            builder.push_record(["Role", "Table", "Rows"]);
            for stat in &stats {
                let rows = if stat.exists {
                    stat.rows.to_string()
                } else {
                    "-".to_string()
                };
                builder.push_record([stat.role.to_string(), stat.table.clone(), rows]);
            }

            if !global.quiet {
                println!(
                    "{} {}",
                    style("Database").bold(),
                    style(config.database().display()).cyan()
                );
            }
            println!("{}", builder.build().with(Style::rounded()).to_string());

            if stats.iter().any(|s| !s.exists) && !global.quiet {
                println!(
                    "{} Some tables are missing; run {}",
                    style("!").yellow(),
                    style("dsml init").cyan()
                );
            }
        }
    }
    Ok(())
}
