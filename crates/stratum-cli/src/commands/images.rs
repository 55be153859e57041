//! `strat images`: Manage the local image catalog.

use clap::Args;
use stratum_common::config::StratumConfig;
use stratum_image::registry::ImageCatalog;

use crate::output::format_bytes;

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Remove an image by tag, ID, or ID prefix.
    #[arg(long, value_name = "ID|TAG")]
    pub remove: Option<String>,
}

/// Executes the `images` command.
///
/// Lists the catalog, or removes one entry when `--remove` is given. Layer
/// blobs stay in the cache.
///
/// # Errors
///
/// Returns an error if catalog operations fail.
#[allow(clippy::print_stdout)]
pub fn execute(args: &ImagesArgs, settings: &StratumConfig) -> anyhow::Result<()> {
    let catalog = ImageCatalog::open(&settings.images_dir)?;

    if let Some(reference) = &args.remove {
        let removed = catalog.remove(reference)?;
        tracing::info!(id = %removed.id.short(), "removed image");
        println!("Removed {}", removed.id);
        return Ok(());
    }

    println!("{:<14}{:<24}{:<8}{:<12}CREATED", "IMAGE ID", "TAG", "LAYERS", "SIZE");
    for entry in catalog.list()? {
        println!(
            "{:<14}{:<24}{:<8}{:<12}{}",
            entry.id.short(),
            entry.tag.as_deref().unwrap_or("<none>"),
            entry.layers.len(),
            format_bytes(entry.size_bytes),
            entry.created_at
        );
    }
    Ok(())
}
