//! `dsml synth` command - Write a random sparse dataset

use console::style;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

use crate::cli::args::GlobalOpts;
use crate::dataset::{generate, SynthOptions};

#[derive(clap::Args, Debug)]
pub struct SynthArgs {
    /// Output file (default: stdout)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Number of samples (rows)
    #[arg(long, default_value_t = 200)]
    pub samples: usize,

    /// Number of features (columns)
    #[arg(long, default_value_t = 200)]
    pub features: usize,

    /// Fewest features switched on per sample
    #[arg(long, default_value_t = 20)]
    pub min_active: usize,

    /// Most features switched on per sample
    #[arg(long, default_value_t = 50)]
    pub max_active: usize,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl From<&SynthArgs> for SynthOptions {
    fn from(args: &SynthArgs) -> Self {
        SynthOptions {
            samples: args.samples,
            features: args.features,
            min_active: args.min_active,
            max_active: args.max_active,
            seed: args.seed,
        }
    }
}

pub fn run(args: SynthArgs, global: &GlobalOpts) -> Result<()> {
    let options = SynthOptions::from(&args);

    match &args.output {
        Some(path) => {
            let file = File::create(path).into_diagnostic()?;
            let stats = generate(BufWriter::new(file), &options)?;
            if !global.quiet {
                println!(
                    "{} Wrote {} samples × {} features ({} cells) to {}",
                    style("✓").green(),
                    stats.samples,
                    stats.features,
                    stats.cells,
                    style(path.display()).cyan()
                );
            }
        }
        None => {
            generate(io::stdout().lock(), &options)?;
        }
    }
    Ok(())
}
