//! `strat build`: Build an image from a recipe.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::Args;
use stratum_build::{BuildOutput, Engine, HostExecutor};
use stratum_common::config::StratumConfig;
use stratum_image::registry::{ImageCatalog, ImageEntry, timestamp_now};
use stratum_image::storage::LayerStore;

use super::RecipeArgs;
use crate::output::{BOLD, DIM, GREEN, RESET, YELLOW, format_bytes};

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Recipe and build arguments.
    #[command(flatten)]
    pub recipe: RecipeArgs,

    /// Tag to register the image under.
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Write the final filesystem into this directory.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Executes the `build` command.
///
/// Ctrl+C stops the build once the layer in progress is finished.
///
/// # Errors
///
/// Returns an error if parsing, planning, or any step fails.
#[allow(clippy::print_stderr)]
pub fn execute(args: BuildArgs, settings: &StratumConfig) -> anyhow::Result<()> {
    let started = Instant::now();
    let (recipe, mut request) = args.recipe.load()?;
    request.export.clone_from(&args.export);

    let abort = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&abort);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let store = LayerStore::open(&settings.cache_dir)?;
    let engine = Engine::new(store, Box::new(HostExecutor)).with_max_layers(settings.max_layers);

    tracing::info!(file = %args.recipe.file.display(), "building recipe");
    let output = engine.build(&recipe, &request, &abort)?;
    report(&output, started);

    let catalog = ImageCatalog::open(&settings.images_dir)?;
    catalog.register(ImageEntry {
        id: output.id.clone(),
        tag: args.tag.clone(),
        recipe: args.recipe.file.display().to_string(),
        layers: output.manifest.layers.iter().map(|l| l.key.clone()).collect(),
        size_bytes: output.manifest.size_bytes(),
        created_at: timestamp_now(),
        config: output.manifest.config.clone(),
    })?;

    if let Some(dir) = &args.export {
        eprintln!("  {DIM}Exported to {}{RESET}", dir.display());
    }
    #[allow(clippy::print_stdout)]
    {
        println!("{}", output.id);
    }
    Ok(())
}

#[allow(clippy::print_stderr)]
fn report(output: &BuildOutput, started: Instant) {
    eprintln!();
    for layer in &output.layers {
        let status = if layer.cached {
            format!("{DIM}CACHED{RESET}")
        } else {
            format!("{YELLOW}BUILT {RESET}")
        };
        let size = layer
            .diff
            .as_ref()
            .map_or_else(|| "-".to_owned(), |d| format_bytes(d.size_bytes));
        eprintln!(
            "  [{:>3}] {status} {DIM}{}{RESET} {:>10}  {}",
            layer.ordinal,
            layer.key.short(),
            size,
            layer.created_by
        );
    }
    eprintln!();
    eprintln!(
        "  {GREEN}{BOLD}Built{RESET} {} layer(s), {} from cache, in {:.1}s",
        output.layers.len(),
        output.cache_hits(),
        started.elapsed().as_secs_f64()
    );
}
