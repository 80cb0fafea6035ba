//! Experiment harness CLI
//!
//! Runs experiments from a config file and re-scores existing row artifacts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use experiment_harness::{
    EvaluatorConfig, ExperimentConfig, Orchestrator, Settings,
    eval::LocalEvaluationService,
    persistence::{load_rows, persist_evaluation},
};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Experiment harness - execute a processor over a dataset and evaluate the outputs
#[derive(Parser)]
#[command(name = "exp-harness")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment described by a YAML or JSON file
    Run {
        /// Path to the experiment file
        config: PathBuf,

        /// Root directory holding datasets
        #[arg(long)]
        dataset_root: Option<PathBuf>,

        /// Root directory for run artifacts (overrides the file's output_path)
        #[arg(short, long)]
        output_path: Option<PathBuf>,

        /// Only process the first N rows
        #[arg(long)]
        max_rows: Option<usize>,

        /// Validate and load everything without executing
        #[arg(long)]
        dry_run: bool,
    },

    /// Check an experiment file without running it
    Validate {
        /// Path to the experiment file
        config: PathBuf,
    },

    /// List evaluator names that can be resolved
    Evaluators,

    /// Evaluate an existing rows artifact
    Evaluate {
        /// Path to a rows JSONL file
        rows: PathBuf,

        /// Evaluator names to run
        #[arg(short, long = "evaluator", required = true)]
        evaluators: Vec<String>,

        /// Directory for the evaluation artifacts
        #[arg(short, long, default_value = "evaluation_output")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Run {
            config,
            dataset_root,
            output_path,
            max_rows,
            dry_run,
        } => cmd_run(config, dataset_root, output_path, max_rows, dry_run),
        Commands::Validate { config } => cmd_validate(config),
        Commands::Evaluators => cmd_evaluators(),
        Commands::Evaluate {
            rows,
            evaluators,
            output,
        } => cmd_evaluate(rows, evaluators, output),
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn cmd_run(
    config_path: PathBuf,
    dataset_root: Option<PathBuf>,
    output_path: Option<PathBuf>,
    max_rows: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let mut settings = Settings::load();
    if let Some(root) = dataset_root {
        settings.dataset_root = root;
    }

    let mut config = ExperimentConfig::load(&config_path).context("Failed to load experiment file")?;
    if output_path.is_some() {
        config.output_path = output_path;
    }

    let orchestrator = Orchestrator::new(settings);

    if dry_run {
        let rows = orchestrator
            .dry_run(&config, max_rows)
            .context("Dry run failed")?;
        println!("Dry run OK: {}", config.describe());
        println!("  Rows:        {}", rows);
        println!("  Evaluators:  {}", config.evaluators.len());
        return Ok(());
    }

    let start = Instant::now();
    let outcome = orchestrator
        .run_config(&config, max_rows)
        .context("Experiment run failed")?;

    println!("\nExperiment {} finished in {:.2?}", outcome.experiment_id, start.elapsed());
    println!("  Rows:       {}", outcome.rows);
    println!("  Succeeded:  {}", outcome.execution.succeeded);
    println!("  Failed:     {}", outcome.execution.failed);
    println!("  Results:    {}", outcome.run_dir.display());
    if !outcome.evaluated {
        println!("  Evaluation artifacts could not be written; see the log for details.");
    }

    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<()> {
    let config = ExperimentConfig::load(&config_path).context("Failed to load experiment file")?;
    config.validate().context("Invalid experiment file")?;

    println!("Configuration OK");
    println!("{}", "─".repeat(40));
    println!("  Dataset:     {}:{}", config.dataset.name, config.dataset.version);
    println!("  Executable:  {}", config.executable.run_descriptor());
    for evaluator in &config.evaluators {
        println!("  Evaluator:   {}", evaluator.display_name());
    }
    Ok(())
}

fn cmd_evaluators() -> Result<()> {
    let service = LocalEvaluationService::from_settings(&Settings::load());
    let names = service.resolver().available();

    if names.is_empty() {
        println!("No evaluators available.");
    } else {
        println!("Available evaluators:");
        for name in names {
            println!("  {}", name);
        }
    }
    Ok(())
}

fn cmd_evaluate(rows_path: PathBuf, names: Vec<String>, output: PathBuf) -> Result<()> {
    if !rows_path.is_file() {
        anyhow::bail!("Rows file not found at '{}'", rows_path.display());
    }

    let mut rows = load_rows(&rows_path).context("Failed to load rows")?;
    let configs: Vec<EvaluatorConfig> = names
        .iter()
        .map(|name| EvaluatorConfig::new(name.as_str(), name.as_str()))
        .collect();

    let service = LocalEvaluationService::from_settings(&Settings::load());
    let report = service.evaluate(&mut rows, &configs);
    persist_evaluation(&output, &rows, None, &configs, &report)
        .context("Failed to save evaluation results")?;

    println!("Evaluated {} rows", rows.len());
    println!("{}", "─".repeat(60));
    for (evaluator, metrics) in &report.summary {
        println!("{}", evaluator);
        for (metric, value) in metrics {
            println!("  {:<24} {:.4}", metric, value);
        }
    }
    for failure in &report.failures {
        println!("FAILED {} ({}): {}", failure.evaluator, failure.error_type, failure.message);
    }
    for name in &report.unresolved {
        println!("UNRESOLVED {}", name);
    }
    println!("{}", "─".repeat(60));
    println!("Results saved to: {}", output.display());

    Ok(())
}
