//! Shared helper functions for CLI commands

use miette::{IntoDiagnostic, Result, WrapErr};

use crate::cli::args::GlobalOpts;
use crate::core::config::Config;
use crate::core::store::SqliteStore;

/// Load layered config, then apply command-line flags on top
pub fn load_config(global: &GlobalOpts) -> Result<Config> {
    let mut config = Config::load(global.config.as_deref())?;
    if let Some(database) = &global.database {
        config.database = Some(database.clone());
    }
    Ok(config)
}

/// Open the configured database, creating the file if needed
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    let path = config.database();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .into_diagnostic()
            .wrap_err_with(|| format!("creating {}", parent.display()))?;
    }
    SqliteStore::open(&path).wrap_err_with(|| format!("opening database {}", path.display()))
}

/// Log filter from verbosity flags, falling back to config, then `warn`
pub fn log_filter(global: &GlobalOpts, config: Option<&Config>) -> String {
    if global.quiet {
        return "error".to_string();
    }
    match global.verbose {
        0 => config
            .and_then(|c| c.log.clone())
            .unwrap_or_else(|| "warn".to_string()),
        1 => "dsml=debug".to_string(),
        _ => "dsml=trace".to_string(),
    }
}
