use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use rusty_photosphere::config::FitConfig;
use rusty_photosphere::data::loader::{load_library, load_observation};
use rusty_photosphere::fit::output::write_chain;
use rusty_photosphere::{
    FluxProvider, ForwardModel, InMemoryLibrary, Likelihood, Observation, ParameterVector,
    Sampler, Target,
};

/// Fit photospheric parameters to an echelle order with a synthetic library.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON run configuration
    #[arg(short, long, global = true, default_value = "fit.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a Metropolis chain and write the chain table
    Run {
        /// Override the number of steps
        #[arg(long)]
        steps: Option<usize>,
        /// Override the random seed
        #[arg(long)]
        seed: Option<u64>,
        /// Override the output path (.csv, .parquet or text)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Evaluate chi-square at one parameter vector
    Chi2 {
        #[arg(short, long)]
        temperature: f64,
        #[arg(long, allow_hyphen_values = true)]
        vz: f64,
        #[arg(long, default_value_t = 1.0)]
        prefactor: f64,
        #[arg(long)]
        vsini: Option<f64>,
        #[arg(long)]
        logg: Option<f64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = FitConfig::load(&cli.config)?;

    let observation = load_observation(&config.observation)
        .with_context(|| format!("loading observation {}", config.observation.display()))?;
    let library = load_library(&config.library, config.grid.into())
        .with_context(|| format!("loading library {}", config.library.display()))?;
    let provider = FluxProvider::for_observation(library, &observation.grid, config.trim_margin)?;

    match cli.command {
        Command::Run {
            steps,
            seed,
            output,
        } => run(
            &config,
            &observation,
            &provider,
            steps.unwrap_or(config.steps),
            seed.or(config.seed),
            output.unwrap_or_else(|| config.output.clone()),
        ),
        Command::Chi2 {
            temperature,
            vz,
            prefactor,
            vsini,
            logg,
        } => {
            let params = ParameterVector {
                temperature,
                radial_velocity: vz,
                flux_prefactor: prefactor,
                rotational_velocity: vsini.unwrap_or(config.initial.rotational_velocity),
                surface_gravity: logg.unwrap_or(config.initial.surface_gravity),
            };
            let likelihood = likelihood(&config, &observation, &provider)?;
            println!("{}", likelihood.chi_square(&params)?);
            Ok(())
        }
    }
}

fn likelihood<'a>(
    config: &FitConfig,
    observation: &'a Observation,
    provider: &'a FluxProvider<InMemoryLibrary>,
) -> Result<Likelihood<'a, InMemoryLibrary>> {
    let model = ForwardModel::new(provider, config.model);
    Ok(Likelihood::new(model, observation, config.noise.clone())?)
}

fn run(
    config: &FitConfig,
    observation: &Observation,
    provider: &FluxProvider<InMemoryLibrary>,
    steps: usize,
    seed: Option<u64>,
    output: PathBuf,
) -> Result<()> {
    let sampler = Sampler::new(likelihood(config, observation, provider)?, &config.proposal)?
        .with_miss_policy(config.miss_policy);

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let chain = sampler.run_chain(config.initial, steps, &mut rng)?;
    write_chain(&output, &chain.records)?;

    let s = &chain.summary;
    println!(
        "{} steps, {} accepted ({:.1}%), best chi2 {:.3} at {}",
        s.steps,
        s.accepted,
        100.0 * s.acceptance_fraction,
        s.best.chi_square,
        s.best.params
    );
    Ok(())
}
