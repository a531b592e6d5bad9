use clap::Parser;
use miette::Result;
use tracing_subscriber::EnvFilter;

use dsml::cli::helpers::log_filter;
use dsml::cli::{Cli, Commands, GlobalOpts};
use dsml::core::Config;

fn main() -> Result<()> {
    // Reset SIGPIPE to default behavior (terminate silently) for proper Unix piping.
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    // Install miette's fancy error handler
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;
    init_logging(&global);

    match cli.command {
        Commands::Init(args) => dsml::cli::commands::init::run(args, &global),
        Commands::Synth(args) => dsml::cli::commands::synth::run(args, &global),
        Commands::Ingest(args) => dsml::cli::commands::ingest::run(args, &global),
        Commands::Stats(args) => dsml::cli::commands::stats::run(args, &global),
        Commands::Completions(args) => dsml::cli::commands::completions::run(args),
    }
}

/// Log to stderr; a broken config file is reported later by the command itself
fn init_logging(global: &GlobalOpts) {
    let config = Config::load(global.config.as_deref()).ok();
    let filter = EnvFilter::try_new(log_filter(global, config.as_ref()))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
