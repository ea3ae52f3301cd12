//! The command line interface for fair-shares.
use crate::allocation::{Approach, allocate};
use crate::input::load_model;
use crate::log;
use crate::output::metadata::write_metadata;
use crate::output::{create_output_directory, get_output_dir, write_results};
use crate::settings::Settings;
use crate::validation::check_inputs;
use ::log::{info, warn};
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for fair-shares.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options for the run command
#[derive(Args, Default)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Allocate with this approach instead of the one in allocation.toml
    #[arg(short, long, value_parser = Approach::from_name)]
    pub approach: Option<Approach>,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run an allocation.
    Run {
        /// Path to the model directory.
        model_dir: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Validate a model without allocating.
    Validate {
        /// The path to the model directory.
        model_dir: PathBuf,
    },
    /// Manage program settings.
    Settings {
        /// The available subcommands for managing settings.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { model_dir, opts } => handle_run_command(&model_dir, &opts, None),
            Self::Validate { model_dir } => handle_validate_command(&model_dir, None),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start fair-shares
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Use the supplied settings, or load them from the settings file
fn load_settings(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Handle the `run` command.
pub fn handle_run_command(
    model_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = load_settings(settings)?;

    // Get path to output folder
    let pathbuf: PathBuf;
    let output_path = if let Some(p) = opts.output_dir.as_deref() {
        p
    } else {
        pathbuf = get_output_dir(&settings.results_root, model_path)?;
        &pathbuf
    };

    let overwrite = create_output_directory(output_path, opts.overwrite || settings.overwrite)
        .with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_path.display()
            )
        })?;

    // Initialise program logger
    log::init(Some(&settings.log_level), Some(output_path))
        .context("Failed to initialise logging.")?;

    // Load the model to run
    let (mut params, data) = load_model(model_path).context("Failed to load model.")?;
    info!("Loaded model from {}", model_path.display());
    if let Some(approach) = opts.approach {
        info!("Using the {approach} approach instead of {}", params.approach);
        params.approach = approach;
    }
    info!("Output folder: {}", output_path.display());

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder will be overwritten");
    }

    let result = allocate(&params, &data).context("Allocation failed.")?;
    write_results(output_path, &result, data.reference.as_ref())
        .context("Failed to write results.")?;
    write_metadata(output_path, model_path, &params, &result)
        .context("Failed to write parameters.")?;
    info!("Allocation complete!");

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(model_path: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = load_settings(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    // Load/validate the model
    let (params, data) = load_model(model_path).context("Failed to validate model.")?;
    let countries = check_inputs(&params, &data).context("Failed to validate model.")?;
    info!(
        "Model validation successful! ({} countries, approach {})",
        countries.len(),
        params.approach
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_approach() {
        let cli = Cli::try_parse_from([
            "fair-shares",
            "run",
            "demos/three_countries",
            "--approach",
            "equal-per-capita-budget",
            "--overwrite",
        ])
        .unwrap();
        let Some(Commands::Run { model_dir, opts }) = cli.command else {
            panic!("Expected run command");
        };
        assert_eq!(model_dir, PathBuf::from("demos/three_countries"));
        assert_eq!(opts.approach, Some(Approach::EqualPerCapitaBudget));
        assert!(opts.overwrite);
        assert!(opts.output_dir.is_none());
    }

    #[test]
    fn test_parse_run_unknown_approach() {
        let Err(err) = Cli::try_parse_from(["fair-shares", "run", "model", "-a", "equal"]) else {
            panic!("Expected unknown approach to be rejected");
        };
        assert!(
            err.to_string()
                .contains("Unknown allocation approach 'equal'")
        );
    }
}
