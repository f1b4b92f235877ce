use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use latqcd_speedify::accel::{AccelerationConfig, Capabilities, DispatchOptions, Dispatcher};
use latqcd_speedify::config::SpeedifyConfig;
use latqcd_speedify::logging;
use latqcd_speedify::math::{Polynomial, Rational};

#[derive(Parser)]
#[command(
    name = "speedify",
    about = "Backend-selecting parallel evaluation for lattice QCD analysis",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (takes precedence over SPEEDIFY_CONFIG and ./speedify.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `latqcd_speedify=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show detected backends and the active acceleration settings
    Probe {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a polynomial or rational function over a uniform grid
    Eval(GridArgs),

    /// Evaluate over a uniform grid and print the sum
    Reduce(GridArgs),
}

#[derive(clap::Args)]
struct GridArgs {
    /// Numerator / polynomial coefficients, lowest power first
    #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
    coeffs: Vec<f64>,

    /// Denominator coefficients; turns the function into a rational one
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    denominator: Vec<f64>,

    /// First grid point
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start: f64,

    /// Last grid point (inclusive)
    #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
    stop: f64,

    /// Number of grid points
    #[arg(long, default_value_t = 11)]
    points: usize,

    /// Worker count (1 forces the sequential loop)
    #[arg(long)]
    workers: Option<usize>,

    /// Backend: vectorized, pool or sequential
    #[arg(long)]
    backend: Option<String>,

    /// JSON output for machine parsing
    #[arg(long)]
    json: bool,
}

enum Curve {
    Polynomial(Polynomial),
    Rational(Rational),
}

impl Curve {
    fn from_args(args: &GridArgs) -> Self {
        if args.denominator.is_empty() {
            Curve::Polynomial(Polynomial::new(args.coeffs.clone()))
        } else {
            Curve::Rational(Rational::new(args.coeffs.clone(), args.denominator.clone()))
        }
    }

    fn eval(&self, x: f64) -> f64 {
        match self {
            Curve::Polynomial(p) => p.eval(x),
            Curve::Rational(r) => r.eval(x),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Curve::Polynomial(p) => fmt::Display::fmt(p, f),
            Curve::Rational(r) => fmt::Display::fmt(r, f),
        }
    }
}

impl GridArgs {
    fn grid(&self) -> Vec<f64> {
        match self.points {
            0 => Vec::new(),
            1 => vec![self.start],
            n => {
                let step = (self.stop - self.start) / (n - 1) as f64;
                (0..n).map(|i| self.start + step * i as f64).collect()
            }
        }
    }

    fn options(&self) -> Result<DispatchOptions> {
        let mut options = DispatchOptions::new();
        if let Some(workers) = self.workers {
            options = options.with_workers(workers);
        }
        if let Some(name) = &self.backend {
            options = options.with_backend_name(name)?;
        }
        Ok(options)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SpeedifyConfig::load(path)?,
        None => SpeedifyConfig::load_or_default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    logging::init(&config.logging)?;

    let accel = AccelerationConfig::global();
    config.apply(accel)?;

    match cli.command {
        Commands::Probe { json } => {
            let caps = Capabilities::get();
            let snapshot = accel.snapshot();
            if json {
                let report = serde_json::json!({
                    "capabilities": caps,
                    "settings": snapshot,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nspeedify capability probe");
                println!("{:<25} | Value", "Item");
                println!("{:-<25}-|-{:-<20}", "", "");
                println!("{:<25} | {}", "Vectorized available", caps.vectorized);
                println!("{:<25} | {}", "Worker pool available", true);
                println!("{:<25} | {}", "Max threads", caps.max_threads);
                println!("{:<25} | {}", "Default backend", snapshot.default_backend);
                println!("{:<25} | {}", "Compilation", snapshot.compilation_enabled);
                println!("{:<25} | {}", "Vectorized enabled", snapshot.vectorized_enabled);
                println!("{:<25} | {}", "Worker pool enabled", snapshot.multiprocessing_enabled);
                println!("{:<25} | {}", "Workers", snapshot.workers);
                println!();
            }
        }
        Commands::Eval(args) => {
            let curve = Curve::from_args(&args);
            let grid = args.grid();
            tracing::info!(function = %curve, points = grid.len(), "Evaluating");

            let done = Dispatcher::global().evaluate_with_metadata(
                |x: &f64, curve: &Curve| curve.eval(*x),
                &grid,
                &curve,
                args.options()?,
            )?;

            if args.json {
                let report = serde_json::json!({
                    "function": curve.to_string(),
                    "points": grid,
                    "values": done.outputs,
                    "metadata": done.metadata,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{:<24} | f(x)", "x");
                println!("{:-<24}-|-{:-<24}", "", "");
                for (x, y) in grid.iter().zip(&done.outputs) {
                    println!("{:<24} | {}", x, y);
                }
                println!(
                    "\nbackend: {} ({} workers, {} fallback(s), {} us)",
                    done.metadata.path_used,
                    done.metadata.workers,
                    done.metadata.fallbacks.len(),
                    done.metadata.duration_us
                );
            }
        }
        Commands::Reduce(args) => {
            let curve = Curve::from_args(&args);
            let grid = args.grid();
            tracing::info!(function = %curve, points = grid.len(), "Reducing");

            let done = Dispatcher::global().evaluate_with_metadata(
                |x: &f64, curve: &Curve| curve.eval(*x),
                &grid,
                &curve,
                args.options()?,
            )?;
            let metadata = done.metadata.clone();
            let sum = done.total();

            if args.json {
                let report = serde_json::json!({
                    "function": curve.to_string(),
                    "sum": sum,
                    "metadata": metadata,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                tracing::info!(backend = %metadata.path_used, fallbacks = metadata.fallbacks.len(), "Reduced");
                println!("{}", sum);
            }
        }
    }

    Ok(())
}
