use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Float64Builder, ListBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use rusty_photosphere::config::FitConfig;
use rusty_photosphere::{
    FluxProvider, ForwardModel, GridResolution, InMemoryLibrary, ModelSettings, ParameterVector,
    WavelengthGrid,
};

/// Mg b triplet rest wavelengths (Å).
const MG_B: [f64; 3] = [5168.7605, 5174.1251, 5185.0479];

/// hc / k in Å·K.
const HC_OVER_K: f64 = 1.438_776_9e8;

/// Write a synthetic library, a noisy observation drawn from it, and a
/// matching run configuration.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output directory
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Random seed for the observation noise
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Per-pixel noise added to the observation
    #[arg(long, default_value_t = 0.01)]
    noise: f64,
}

fn planck(lambda: f64, temperature: f64) -> f64 {
    lambda.powi(-5) / ((HC_OVER_K / (lambda * temperature)).exp() - 1.0)
}

/// Continuum times Gaussian absorption lines that deepen as the star cools.
fn synthetic_flux(wavelengths: &[f64], temperature: f64) -> Vec<f64> {
    let depth = (0.9 - (temperature - 4500.0) / 5000.0).clamp(0.1, 0.9);
    wavelengths
        .iter()
        .map(|&w| {
            let absorption: f64 = MG_B
                .iter()
                .map(|&mu| depth * (-(w - mu).powi(2) / (2.0 * 0.08f64.powi(2))).exp())
                .sum();
            // Scaled to order unity; only ratios matter after normalization.
            1e20 * planck(w, temperature) * (1.0 - absorption.min(0.95))
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    std::fs::create_dir_all(&args.out_dir).context("creating output directory")?;

    let wavelengths: Vec<f64> = (0..5001).map(|i| 5150.0 + i as f64 * 0.01).collect();
    let temperatures: Vec<f64> = (0..16).map(|i| 5000.0 + 100.0 * i as f64).collect();
    let logg = 4.5;

    // ---- Library ----
    let mut library = InMemoryLibrary::new(
        WavelengthGrid::new(wavelengths.clone())?,
        GridResolution::default(),
    );
    let mut x_builder = ListBuilder::new(Float64Builder::new());
    let mut y_builder = ListBuilder::new(Float64Builder::new());
    for &t in &temperatures {
        let flux = synthetic_flux(&wavelengths, t);
        x_builder.values().append_slice(&wavelengths);
        x_builder.append(true);
        y_builder.values().append_slice(&flux);
        y_builder.append(true);
        library.insert(t, logg, flux)?;
    }

    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::List(item.clone()), false),
        Field::new("y", DataType::List(item), false),
        Field::new("teff", DataType::Float64, false),
        Field::new("logg", DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(x_builder.finish()),
            Arc::new(y_builder.finish()),
            Arc::new(Float64Array::from(temperatures.clone())),
            Arc::new(Float64Array::from(vec![logg; temperatures.len()])),
        ],
    )
    .context("building library record batch")?;

    let library_path = args.out_dir.join("library.parquet");
    let file = File::create(&library_path).context("creating library file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating writer")?;
    writer.write(&batch).context("writing library batch")?;
    writer.close().context("closing library writer")?;

    // ---- Observation ----
    let pixels = WavelengthGrid::new((0..751).map(|i| 5160.0 + i as f64 * 0.04).collect())?;
    let truth = ParameterVector {
        temperature: 5800.0,
        radial_velocity: -25.0,
        flux_prefactor: 1.0,
        rotational_velocity: 30.0,
        surface_gravity: logg,
    };
    let provider = FluxProvider::for_observation(library, &pixels, 10.0)?;
    let model = ForwardModel::new(&provider, ModelSettings::default());
    let clean = model.synthesize(&truth, &pixels)?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let noise = Normal::new(0.0, args.noise).context("noise level")?;
    let observation_path = args.out_dir.join("observation.txt");
    let mut out = BufWriter::new(File::create(&observation_path).context("creating observation")?);
    writeln!(out, "# synthetic order: {truth}")?;
    for (w, f) in pixels.iter().zip(clean.iter()) {
        writeln!(out, "{w:.4} {:.6}", f + noise.sample(&mut rng))?;
    }
    out.flush()?;

    // ---- Configuration ----
    let config = FitConfig {
        observation: observation_path.clone(),
        library: library_path.clone(),
        output: args.out_dir.join("run_0.csv"),
        seed: Some(args.seed),
        steps: 200,
        ..Default::default()
    };
    let config_path = args.out_dir.join("fit.json");
    std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)
        .context("writing config")?;

    println!(
        "Wrote {} library spectra ({} samples each) to {}, observation ({} pixels) to {}, config to {}",
        temperatures.len(),
        wavelengths.len(),
        library_path.display(),
        pixels.len(),
        observation_path.display(),
        config_path.display()
    );
    Ok(())
}
