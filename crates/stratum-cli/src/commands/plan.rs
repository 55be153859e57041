//! `strat plan`: Show the layers a build would produce.

use clap::Args;
use stratum_build::{Engine, HostExecutor};
use stratum_common::config::StratumConfig;
use stratum_image::storage::LayerStore;

use super::RecipeArgs;
use crate::output::{BOLD, CYAN, DIM, GREEN, RESET, YELLOW};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Recipe and build arguments.
    #[command(flatten)]
    pub recipe: RecipeArgs,
}

/// Executes the `plan` command.
///
/// Resolves arguments, selects branches, and computes every cache key
/// without running anything.
///
/// # Errors
///
/// Returns an error if the recipe is invalid.
#[allow(clippy::print_stdout)]
pub fn execute(args: &PlanArgs, settings: &StratumConfig) -> anyhow::Result<()> {
    let (recipe, request) = args.recipe.load()?;
    let store = LayerStore::open(&settings.cache_dir)?;
    let engine = Engine::new(store, Box::new(HostExecutor)).with_max_layers(settings.max_layers);

    let plan = engine.plan(&recipe, &request)?;
    let status = engine.status_of(&plan);

    println!("{BOLD}Build plan for: {}{RESET}", args.recipe.file.display());
    println!();
    for layer in &status {
        let mark = if layer.cached {
            format!("{GREEN}cached{RESET}")
        } else {
            format!("{YELLOW}build {RESET}")
        };
        println!(
            "  [{:>3}] {mark} {DIM}{}{RESET}  {}",
            layer.ordinal,
            layer.key.short(),
            layer.created_by
        );
    }

    let pending = status.iter().filter(|l| !l.cached).count();
    println!();
    println!("  {} layer(s), {pending} to build.", status.len());

    let config = &plan.config;
    println!();
    println!("  {CYAN}workdir:{RESET}    {}", config.workdir);
    if !config.exposed_ports.is_empty() {
        let ports: Vec<_> = config.exposed_ports.iter().map(u16::to_string).collect();
        println!("  {CYAN}ports:{RESET}      {}", ports.join(", "));
    }
    for (key, value) in &config.env {
        println!("  {CYAN}env:{RESET}        {key}={value}");
    }
    if !config.entrypoint.is_empty() {
        println!("  {CYAN}entrypoint:{RESET} {:?}", config.entrypoint);
    }
    Ok(())
}
