//! FDSN Drum Plot - single run
//!
//! Fetches the last window of waveforms for every listed station, removes
//! the instrument response to acceleration, filters, and writes one stacked
//! PNG. Meant to be run from cron or by hand; it does not stay resident.
//!
//! Usage:
//!   fdsn_drumplot                              # default lists, ./fdsn2plot.toml if present
//!   fdsn_drumplot estaciones.txt -o drum.png   # another station list and output
//!   fdsn_drumplot --no-display --summary run.json
//!
//! Environment:
//!   FDSN_URL, FDSN_USER, FDSN_PASSWORD - server and credentials (.env honoured)
//!   RUST_LOG - log filter, on top of -v

use clap::Parser;
use chrono::Utc;
use fdsn_drumplot::cli::Cli;
use fdsn_drumplot::config::PlotConfig;
use fdsn_drumplot::drumplot::{DrumPlot, DrumPlotError, RunSummary};
use fdsn_drumplot::ingest::fdsn::FdsnClient;
use fdsn_drumplot::plot;
use std::process;

fn main() {
    let cli = Cli::parse();
    dotenv::dotenv().ok();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            process::exit(1);
        }
    };

    let mut drumplot = DrumPlot::new(config);
    if let Err(e) = drumplot.initialize() {
        log::error!("{}", e);
        eprintln!("No hay estaciones definidas.");
        process::exit(1);
    }

    if let Err(e) = run(&drumplot, &cli) {
        eprintln!("❌ {}", e);
        process::exit(1);
    }
}

/// Defaults, then the TOML file, then `.env`/environment, then flags.
fn load_config(cli: &Cli) -> Result<PlotConfig, DrumPlotError> {
    let mut config = PlotConfig::load(cli.config.as_deref())?;
    config.apply_env();
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn run(drumplot: &DrumPlot, cli: &Cli) -> Result<(), DrumPlotError> {
    let config = drumplot.config();
    let client = FdsnClient::new(&config.server)?;
    log::info!("Using FDSN server {}", client.base_url());

    let now = Utc::now();
    let outcome = drumplot.run(&client, now)?;
    let output = &config.plot.output;
    println!("✅ Imagen generada: {}", output.display());

    if let Some(path) = &cli.summary {
        RunSummary::new(&outcome, output, now).write(path)?;
        log::info!("Summary written to {}", path.display());
    }

    if config.plot.display {
        if let Err(e) = plot::open_in_viewer(output) {
            log::warn!("{}", e);
        }
    }
    Ok(())
}
