//! `dsml ingest` command - Scan a sparse CSV dataset into the database

use console::style;
use miette::{IntoDiagnostic, Result, WrapErr};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::time::Instant;

use crate::cli::args::{GlobalOpts, OutputFormat};
use crate::cli::helpers::{load_config, open_store};
use crate::core::config::parse_flush_every;
use crate::dataset::{init_schema, DatasetError, Ingestor};

#[derive(clap::Args, Debug)]
pub struct IngestArgs {
    /// CSV file to ingest (`-` for stdin)
    pub input: PathBuf,

    /// Samples per flush (overrides config)
    #[arg(long, value_parser = |s: &str| parse_flush_every("--flush-every", s))]
    pub flush_every: Option<usize>,

    /// Create missing tables first
    #[arg(long)]
    pub init: bool,

    /// Output format for the summary
    #[arg(long, short = 'f', default_value = "table")]
    pub format: OutputFormat,
}

pub fn run(args: IngestArgs, global: &GlobalOpts) -> Result<()> {
    let mut config = load_config(global)?;
    if args.flush_every.is_some() {
        config.flush_every = args.flush_every;
    }
    let tables = config.table_names();
    let store = open_store(&config)?;
    if args.init {
        init_schema(&store, &tables)?;
    }

    let reader: Box<dyn Read> = if args.input.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&args.input)
            .into_diagnostic()
            .wrap_err_with(|| format!("opening {}", args.input.display()))?;
        Box::new(BufReader::new(file))
    };

    let started = Instant::now();
    let mut ingestor = Ingestor::new(&tables, config.flush_every())?;
    // A failed run leaves no partial rows behind
    let stats = store.in_transaction(|s| -> Result<_, DatasetError> {
        ingestor.ingest_csv(reader, s)
    })?;
    let elapsed = started.elapsed();

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats).into_diagnostic()?);
        }
        OutputFormat::Table => {
            if global.quiet {
                return Ok(());
            }
            println!(
                "{} Ingested {} in {}ms",
                style("✓").green(),
                style(args.input.display()).cyan(),
                elapsed.as_millis()
            );
            println!("  Rows:      {}", stats.rows);
            println!("  Samples:   {}", stats.samples);
            println!("  Features:  {}", stats.features);
            println!("  Values:    {}", stats.values);
            println!("  Flushes:   {}", stats.flushes);
            println!("  Inserted:  {}", style(stats.inserted).green());
        }
    }
    Ok(())
}
