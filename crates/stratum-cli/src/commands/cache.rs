//! `strat cache`: Inspect the layer cache.

use clap::{Args, Subcommand};
use stratum_common::config::StratumConfig;
use stratum_image::storage::LayerStore;

use crate::output::{GREEN, RED, RESET, format_bytes};

/// Arguments for the `cache` command.
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Cache operation.
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache operations.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached layers.
    Ls,
    /// Check every cached layer against its recorded digest.
    Verify,
}

/// Executes the `cache` command.
///
/// # Errors
///
/// Returns an error if the cache cannot be read, or if `verify` finds a
/// corrupt entry.
#[allow(clippy::print_stdout)]
pub fn execute(args: &CacheArgs, settings: &StratumConfig) -> anyhow::Result<()> {
    let store = LayerStore::open(&settings.cache_dir)?;
    match args.action {
        CacheAction::Ls => {
            println!("{:<14}{:<14}{:<12}CREATED BY", "KEY", "PARENT", "SIZE");
            for entry in store.entries()? {
                println!(
                    "{:<14}{:<14}{:<12}{}",
                    entry.key.short(),
                    entry.parent.as_ref().map_or("-", |p| p.short()),
                    entry
                        .diff
                        .as_ref()
                        .map_or_else(|| "-".to_owned(), |d| format_bytes(d.size_bytes)),
                    entry.created_by
                );
            }
        }
        CacheAction::Verify => {
            let report = store.verify()?;
            for (key, reason) in &report.corrupt {
                println!("{RED}corrupt{RESET} {}: {reason}", key.short());
            }
            if !report.is_clean() {
                anyhow::bail!(
                    "{} of {} cache entries are corrupt",
                    report.corrupt.len(),
                    report.checked
                );
            }
            println!("{GREEN}ok{RESET} {} cache entries verified", report.checked);
        }
    }
    Ok(())
}
