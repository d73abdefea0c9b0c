//! oh4vna-sim: calibrate and measure against the simulated analyzer
//!
//! Runs a one-port SOL calibration with the ideal kit, measures a mismatched
//! device and stores everything in the file repository.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ndarray::arr2;
use num_complex::Complex64;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oh4vna_core::calibration::{CalibrationMethod, OnePortTerms};
use oh4vna_core::config::Settings;
use oh4vna_core::instrument::{
    CancelToken, Device, InstrumentContext, SimulatedErrorModel, SimulatedVna, StandardFixtures,
};
use oh4vna_core::measurement::{Correction, MeasurementOrchestrator, MeasurementRequest};
use oh4vna_core::persistence::FileRepository;

#[derive(Parser, Debug)]
#[command(name = "oh4vna-sim", version, about = "Simulated OH4VNA calibration and measurement")]
struct Cli {
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Repository root directory
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Sweep points
    #[arg(long)]
    points: Option<usize>,

    /// Start frequency in Hz
    #[arg(long)]
    start: Option<f64>,

    /// Stop frequency in Hz
    #[arg(long)]
    stop: Option<f64>,

    /// Measure a two-port DUT and report the coupler's third port
    #[arg(long)]
    three_port: bool,
}

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(root) = cli.data_root {
        settings.data_root = root;
    }
    if let Some(points) = cli.points {
        settings.points = points;
    }
    if let Some(start) = cli.start {
        settings.start_freq_hz = start;
    }
    if let Some(stop) = cli.stop {
        settings.stop_freq_hz = stop;
    }
    settings.validate()?;
    if !settings.simulation {
        bail!("oh4vna-sim only drives the simulated analyzer; unset OH4VNA_SIMULATION");
    }

    let repository = FileRepository::open(&settings.data_root)
        .with_context(|| format!("Failed to open repository at {}", settings.data_root.display()))?;
    let kit = repository.ensure_default_kit()?;

    let errors = SimulatedErrorModel::ideal()
        .with_port(
            1,
            OnePortTerms {
                directivity: c(0.05, 0.0),
                source_match: c(0.08, -0.03),
                reflection_tracking: c(0.92, 0.06),
            },
        )
        .with_port(
            2,
            OnePortTerms {
                directivity: c(0.03, 0.01),
                source_match: c(0.05, 0.02),
                reflection_tracking: c(0.95, -0.04),
            },
        );
    let vna = SimulatedVna::new().with_error_model(errors);
    let device = vna.device_slot();
    let context = InstrumentContext::new(vna);
    let conn = context.connect()?;

    let orchestrator = MeasurementOrchestrator::from_settings(repository, &settings);
    let sweep = settings.sweep_config()?;
    let cancel = CancelToken::new();

    let mut fixtures = StandardFixtures::new(device.clone(), kit.clone());
    let record = orchestrator.calibrate(
        &conn,
        &kit,
        CalibrationMethod::OnePort { port: 1 },
        &sweep,
        &mut fixtures,
        &cancel,
    )?;

    let gamma = c(0.2, 0.1);
    let (ports, s) = if cli.three_port {
        (
            vec![1, 2],
            arr2(&[[gamma, c(0.5, 0.0)], [c(0.5, 0.0), c(0.1, -0.2)]]),
        )
    } else {
        (vec![1], arr2(&[[gamma]]))
    };
    device.attach(Device::Constant {
        s,
        ports: ports.clone(),
    });

    let mut request = MeasurementRequest::new(sweep, ports)
        .with_correction(Correction::Record(record.id()))
        .with_notes("oh4vna-sim mismatched load")
        .with_tags(vec!["simulation".to_string()]);
    if cli.three_port {
        request = request.with_three_port();
    }
    let outcome = orchestrator.measure(&conn, &request, &cancel)?;

    let s = outcome.trace.network().s();
    info!(
        id = %outcome.metadata.id,
        calibration = %record.id(),
        ports = ?outcome.trace.ports(),
        points = s.shape()[0],
        "corrected measurement stored"
    );
    if cli.three_port {
        // port 1 now sees the DUT through the coupler
        let coupled = s.outer_iter().map(|m| m[[2, 0]].norm()).fold(0.0, f64::max);
        info!(max_s31 = coupled, "coupled port response");
    } else {
        let net = outcome.trace.network();
        let worst = net.s_ij(0, 0).iter().map(|g| (g - gamma).norm()).fold(0.0, f64::max);
        let s11_db = net.s_db(0, 0);
        info!(
            worst_s11_error = worst,
            s11_db_start = s11_db[0],
            s11_db_stop = s11_db[s11_db.len() - 1],
            "correction residual against the simulated load"
        );
    }
    Ok(())
}
