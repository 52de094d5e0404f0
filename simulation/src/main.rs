//! Variety engine simulation
//!
//! Runs synthetic load through the filters, amplifiers and balance monitor
//! and prints what they did with it.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use variety_engine::EngineConfig;
use variety_logging::{LogConfig, VarietySubscriberBuilder};
use variety_simulation::{ScenarioConfig, run_burst, run_flood, run_steady};

#[derive(Parser)]
#[command(
    name = "variety-simulation",
    about = "Drive synthetic load through the variety engine",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine configuration as JSON (defaults to the responsive preset)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Number of rounds to run
    #[arg(short, long, default_value = "5")]
    rounds: usize,

    /// Raw events per context per round
    #[arg(short, long, default_value = "8")]
    events: usize,

    /// Random seed
    #[arg(long, default_value = "7")]
    seed: u64,
}

impl RunArgs {
    fn scenario(&self) -> ScenarioConfig {
        ScenarioConfig {
            rounds: self.rounds,
            events_per_context: self.events,
            seed: self.seed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Balanced mixed load
    Steady {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Error burst into one context, escalated as an anomaly
    Burst {
        #[command(flatten)]
        run: RunArgs,

        /// Context that receives the burst
        #[arg(long, default_value = "billing")]
        context: String,

        /// Number of error events in the burst
        #[arg(long, default_value = "25")]
        errors: usize,
    },

    /// Overload the hierarchy to trigger rebalancing
    Flood {
        #[command(flatten)]
        run: RunArgs,

        /// Amplification factor applied to every amplifier first
        #[arg(short, long, default_value = "3.0")]
        amplification: f64,
    },

    /// Print the effective engine configuration as JSON
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::responsive(),
    };
    for warning in config.validate() {
        eprintln!("warning: {warning}");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Keep stdout for the report unless asked for more
    let log_config = if cli.verbose {
        LogConfig::development()
    } else {
        LogConfig::testing()
    };
    let _guard = VarietySubscriberBuilder::new().with_config(log_config).init();

    let config = load_config(cli.config.as_ref())?;

    let outcome = match cli.command {
        Commands::Steady { run } => run_steady(config, &run.scenario()).await?,
        Commands::Burst {
            run,
            context,
            errors,
        } => run_burst(config, &run.scenario(), &context, errors).await?,
        Commands::Flood { run, amplification } => {
            run_flood(config, &run.scenario(), amplification).await?
        }
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
            return Ok(());
        }
    };

    print!("{outcome}");
    Ok(())
}
