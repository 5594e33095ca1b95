//! CSRD command-line interface
//!
//! - `generate`: run every scenario in a configuration file and write the dataset
//! - `validate`: check a configuration file without simulating
//! - `list`: show the modulation TypeIDs this build supports
//! - `example-config`: print or write a starting configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use csrd_core::observe::{init_logging, LogLevel};
use csrd_core::ModulationKind;
use csrd_sim::{CsrdConfig, DatasetWriter, SimulationRunner};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "csrd")]
#[command(author, version, about = "Radio dataset generator", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate every scenario and write samples plus annotations
    Generate {
        /// Configuration file; the search path is used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory, replacing runner.output_dir
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker threads, replacing runner.num_workers (0 = all cores)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Base seed, replacing runner.seed
        #[arg(long)]
        seed: Option<u64>,

        /// Only run scenarios with these ids
        #[arg(long = "scenario")]
        scenarios: Vec<String>,
    },

    /// Check a configuration file and report what it would run
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List supported modulation TypeIDs
    List,

    /// Print an example configuration, or write it to a file
    ExampleConfig {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<CsrdConfig> {
    let config = match path {
        Some(path) => CsrdConfig::load_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => CsrdConfig::load().context("loading configuration from the search path")?,
    };
    Ok(config)
}

fn setup_logging(config: &CsrdConfig, verbose: u8) {
    let mut logging = config.logging.clone();
    logging.level = LogLevel::from_verbosity(logging.level, verbose);
    init_logging(&logging);
}

fn cmd_generate(
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    workers: Option<usize>,
    seed: Option<u64>,
    scenarios: Vec<String>,
    verbose: u8,
) -> Result<()> {
    let mut config = load_config(config.as_deref())?;
    setup_logging(&config, verbose);

    if let Some(output) = output {
        config.runner.output_dir = output;
    }
    if let Some(workers) = workers {
        config.runner.num_workers = workers;
    }
    if seed.is_some() {
        config.runner.seed = seed;
    }
    if !scenarios.is_empty() {
        for id in &scenarios {
            if !config.scenarios.iter().any(|s| &s.id == id) {
                anyhow::bail!("no scenario with id '{}'", id);
            }
        }
        config.scenarios.retain(|s| scenarios.contains(&s.id));
    }
    config.validate().context("invalid configuration")?;
    if config.scenarios.is_empty() {
        warn!("configuration defines no scenarios; nothing to generate");
        return Ok(());
    }

    let mut runner = SimulationRunner::new(config.catalogs())
        .with_workers(config.runner.num_workers)
        .with_writer(DatasetWriter::new(&config.runner.output_dir));
    if let Some(seed) = config.runner.seed {
        runner = runner.with_base_seed(seed);
    }

    info!(
        scenarios = config.scenarios.len(),
        output = %config.runner.output_dir.display(),
        "generating dataset"
    );
    let summary = runner.run(&config.scenarios)?;

    println!("=== Generation Summary ===");
    for report in &summary.completed {
        let samples = report.written.as_ref().map_or(0, |w| w.total_samples);
        println!(
            "  {:24} {:>4} frames {:>10} samples {:>3} failed segments",
            report.scenario_id, report.frames, samples, report.failed_segments
        );
    }
    for failure in &summary.failed {
        println!("  {:24} FAILED: {}", failure.scenario_id, failure.reason);
    }
    println!(
        "{} of {} scenarios completed in {:.2} s",
        summary.completed.len(),
        summary.total(),
        summary.elapsed.as_secs_f64()
    );

    if !summary.is_success() {
        anyhow::bail!("{} scenario(s) failed", summary.failed.len());
    }
    Ok(())
}

fn cmd_validate(config: Option<PathBuf>, verbose: u8) -> Result<()> {
    let config = load_config(config.as_deref())?;
    setup_logging(&config, verbose);
    config.validate().context("invalid configuration")?;

    println!("Configuration is valid");
    println!("  modulation types: {}", config.modulation.types.len());
    println!("  transmit models:  {}", config.transmit.models.len());
    println!("  channel models:   {}", config.channel.models.len());
    println!("  receive models:   {}", config.receive.models.len());
    for scenario in &config.scenarios {
        let segments: usize = scenario.transmitters.iter().map(|t| t.segments.len()).sum();
        println!(
            "  scenario {:20} {} frame(s) × {} samples, {} rx, {} tx, {} segment(s)",
            scenario.id,
            scenario.num_frames,
            scenario.frame_samples(),
            scenario.receivers.len(),
            scenario.transmitters.len(),
            segments
        );
    }
    Ok(())
}

fn cmd_list() -> Result<()> {
    println!("=== Modulation TypeIDs ===");
    for kind in ModulationKind::ALL {
        println!("  {:8} {:?}", kind.type_id(), kind.family());
    }
    Ok(())
}

fn cmd_example_config(output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, CsrdConfig::example_yaml())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote example configuration to {}", path.display());
        }
        None => print!("{}", CsrdConfig::example_yaml()),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            config,
            output,
            workers,
            seed,
            scenarios,
        } => cmd_generate(config, output, workers, seed, scenarios, cli.verbose),
        Commands::Validate { config } => cmd_validate(config, cli.verbose),
        Commands::List => cmd_list(),
        Commands::ExampleConfig { output } => cmd_example_config(output),
    }
}
