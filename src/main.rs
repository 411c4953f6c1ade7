mod config;
mod dataset;
mod error;
mod evaluation;
mod persist;
mod results;
mod runs;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use config::{Config, ExperimentConfig};
use evaluation::{CommandEvaluatorFactory, EvaluationPipeline, Orchestrator};

#[derive(Parser)]
#[command(name = "cdm-eval")]
#[command(about = "Collect clinical decision-making runs and aggregate their rubric scores")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the selected run of every model/pathology into the results directory
    Download {
        /// Download full-information runs
        #[arg(long, conflicts_with = "standard")]
        full_info: bool,

        /// Download standard agent runs
        #[arg(long)]
        standard: bool,

        /// Run-name addendum to match
        #[arg(long)]
        addendum: Option<String>,

        /// 0 selects the most recent run
        #[arg(long)]
        folder_position: Option<usize>,

        /// Destination directory
        #[arg(long)]
        destination: Option<PathBuf>,
    },

    /// Score downloaded runs and average them per pathology
    Evaluate {
        /// Only evaluate these experiments (repeatable)
        #[arg(short, long)]
        experiment: Vec<String>,

        /// Cohort difficulty level
        #[arg(long)]
        difficulty: Option<String>,

        /// Write aggregates regardless of difficulty
        #[arg(long, conflicts_with = "no_persist")]
        persist: bool,

        /// Never write aggregates
        #[arg(long)]
        no_persist: bool,
    },
}

fn select_experiments(config: &Config, names: &[String]) -> Result<Vec<ExperimentConfig>> {
    if names.is_empty() {
        return Ok(config.experiments.clone());
    }
    names
        .iter()
        .map(|name| {
            config
                .experiments
                .iter()
                .find(|e| &e.name == name)
                .cloned()
                .with_context(|| format!("Unknown experiment '{}'", name))
        })
        .collect()
}

async fn evaluate(config: &Config, experiments: &[ExperimentConfig]) -> Result<()> {
    let cohort = dataset::load_cohort(&config.dataset_dir).await?;
    let orchestrator = Orchestrator::new(CommandEvaluatorFactory::new(config.evaluator.command.clone()))
        .with_timeout(config.evaluator.timeout_secs);
    let pipeline = EvaluationPipeline::new(config, orchestrator, cohort)
        .with_persistence(config.persist_aggregates());

    let all = pipeline.run(experiments).await?;

    let scores: BTreeMap<&str, _> = all.iter().map(|(name, e)| (name.as_str(), e.scores())).collect();
    println!("{}", serde_json::to_string_pretty(&scores)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cdm_eval=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Download {
            full_info,
            standard,
            addendum,
            folder_position,
            destination,
        } => {
            if full_info {
                config.download.full_info = true;
            } else if standard {
                config.download.full_info = false;
            }
            if addendum.is_some() {
                config.download.addendum = addendum;
            }
            if let Some(position) = folder_position {
                config.download.folder_position = position;
            }
            if destination.is_some() {
                config.download.destination = destination;
            }
            config.print_banner();

            let copied = runs::download_all(&config).await?;
            info!("Done, {} files copied", copied.len());
        }
        Commands::Evaluate {
            experiment,
            difficulty,
            persist,
            no_persist,
        } => {
            if let Some(difficulty) = difficulty {
                config.difficulty = difficulty;
            }
            if persist {
                config.persist_aggregates = Some(true);
            } else if no_persist {
                config.persist_aggregates = Some(false);
            }
            config.print_banner();

            let experiments = select_experiments(&config, &experiment)?;
            evaluate(&config, &experiments).await?;
        }
    }

    Ok(())
}
