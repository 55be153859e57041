//! CLI command definitions and dispatch.

pub mod build;
pub mod cache;
pub mod images;
pub mod plan;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use stratum_build::BuildRequest;
use stratum_build::context::parse_assignment;
use stratum_common::config::StratumConfig;
use stratum_common::constants::{BIN_NAME, CONFIG_FILE_NAME, DATA_DIR_ENV, DEFAULT_RECIPE_FILE};
use stratum_recipe::Recipe;

/// Stratum: layered image builds with content-addressed caching.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Base directory for the layer cache and image catalog.
    #[arg(long, global = true, env = DATA_DIR_ENV)]
    pub data_dir: Option<PathBuf>,

    /// Configuration file (defaults to `<data-dir>/config.json`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Resolves the effective configuration.
    ///
    /// The configuration file is read first; `--data-dir` then relocates
    /// every directory while keeping the file's other settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid.
    pub fn settings(&self) -> anyhow::Result<StratumConfig> {
        let base = self
            .data_dir
            .clone()
            .unwrap_or_else(|| stratum_common::constants::data_dir().clone());
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| base.join(CONFIG_FILE_NAME));

        let mut config = if path.exists() {
            StratumConfig::load(&path)
                .with_context(|| format!("failed to load {}", path.display()))?
        } else {
            StratumConfig::with_data_dir(&base)
        };
        if let Some(dir) = &self.data_dir {
            let max_layers = config.max_layers;
            config = StratumConfig::with_data_dir(dir);
            config.max_layers = max_layers;
        }
        tracing::debug!(data_dir = %config.data_dir.display(), "resolved settings");
        Ok(config)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build an image from a recipe.
    Build(build::BuildArgs),
    /// Show the layers a build would produce and which are cached.
    Plan(plan::PlanArgs),
    /// Manage the local image catalog.
    Images(images::ImagesArgs),
    /// Inspect the layer cache.
    Cache(cache::CacheArgs),
}

/// Recipe selection shared by `build` and `plan`.
#[derive(Args, Debug)]
pub struct RecipeArgs {
    /// Path to the recipe file.
    #[arg(default_value = DEFAULT_RECIPE_FILE)]
    pub file: PathBuf,

    /// Directory `COPY` sources are read from (defaults to the recipe's directory).
    #[arg(long)]
    pub context: Option<PathBuf>,

    /// Build-argument override, repeatable.
    #[arg(long = "build-arg", value_name = "NAME=VALUE")]
    pub build_args: Vec<String>,
}

impl RecipeArgs {
    /// Parses the recipe and assembles the build request.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipe cannot be read or parsed, or an
    /// override is malformed.
    pub fn load(&self) -> anyhow::Result<(Recipe, BuildRequest)> {
        let recipe = stratum_recipe::parser::parse_recipe_file(&self.file)
            .with_context(|| format!("failed to load recipe {}", self.file.display()))?;

        let mut overrides = BTreeMap::new();
        for raw in &self.build_args {
            let (name, value) = parse_assignment(raw)?;
            let _ = overrides.insert(name, value);
        }

        let source_dir = self.context.clone().unwrap_or_else(|| {
            self.file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        });

        Ok((
            recipe,
            BuildRequest {
                source_dir,
                overrides,
                export: None,
            },
        ))
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let settings = cli.settings()?;
    match cli.command {
        Command::Build(args) => build::execute(args, &settings),
        Command::Plan(args) => plan::execute(&args, &settings),
        Command::Images(args) => images::execute(&args, &settings),
        Command::Cache(args) => cache::execute(&args, &settings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_flag_relocates_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cli = Cli::parse_from(["strat", "--data-dir", dir.path().to_str().expect("utf8"), "cache", "ls"]);
        let settings = cli.settings().expect("settings");
        assert_eq!(settings.cache_dir, dir.path().join("cache"));
        assert_eq!(settings.images_dir, dir.path().join("images"));
    }

    #[test]
    fn config_file_limits_survive_data_dir_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("custom.json");
        std::fs::write(&config, r#"{"max_layers": 7}"#).expect("write");
        let cli = Cli::parse_from([
            "strat",
            "--data-dir",
            dir.path().to_str().expect("utf8"),
            "--config",
            config.to_str().expect("utf8"),
            "images",
        ]);
        let settings = cli.settings().expect("settings");
        assert_eq!(settings.max_layers, 7);
        assert_eq!(settings.data_dir, dir.path());
    }

    #[test]
    fn recipe_args_default_context_is_recipe_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("Stratumfile");
        std::fs::write(&file, "ARG DEV = \"false\"\nRUN [\"true\"]\n").expect("write");
        let args = RecipeArgs {
            file,
            context: None,
            build_args: vec!["DEV=true".into()],
        };
        let (recipe, request) = args.load().expect("load");
        assert_eq!(recipe.step_count(), 2);
        assert_eq!(request.source_dir, dir.path());
        assert_eq!(request.overrides.get("DEV").map(String::as_str), Some("true"));
    }

    #[test]
    fn malformed_build_arg_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("Stratumfile");
        std::fs::write(&file, "RUN [\"true\"]\n").expect("write");
        let args = RecipeArgs {
            file,
            context: None,
            build_args: vec!["oops".into()],
        };
        assert!(args.load().is_err());
    }
}
