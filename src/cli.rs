/// Command-line interface.
///
/// Flags override the configuration file and the environment; anything not
/// given on the command line keeps the value already loaded.

use clap::Parser;
use std::path::PathBuf;

use crate::config::PlotConfig;

#[derive(Debug, Parser)]
#[command(
    name = "fdsn_drumplot",
    version,
    about = "Drum plot of the last hour of acceleration for a list of FDSN stations",
    long_about = "Fetches the most recent window of waveforms for every station in the list,\n\
                  removes the instrument response to acceleration, filters, and renders one\n\
                  stacked panel per station into a PNG. Server credentials are read from\n\
                  $FDSN_URL, $FDSN_USER and $FDSN_PASSWORD (a .env file is honoured)."
)]
pub struct Cli {
    /// Station code list, one `<network> <station>` pair per line
    #[arg(value_name = "STATIONS")]
    pub stations: Option<PathBuf>,

    /// Display-name list, `<station> <name...>` per line
    #[arg(long, value_name = "PATH")]
    pub names: Option<PathBuf>,

    /// TOML configuration file (default: ./fdsn2plot.toml if present)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output PNG path
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// FDSN server base URL
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,

    /// Window length in seconds, ending now
    #[arg(long, value_name = "SECONDS")]
    pub window: Option<i64>,

    /// Do not open the image after saving it
    #[arg(long)]
    pub no_display: bool,

    /// Write a JSON run summary to this path
    #[arg(long, value_name = "PATH")]
    pub summary: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Applies the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut PlotConfig) {
        if let Some(path) = &self.stations {
            config.stations.codes_file = path.clone();
        }
        if let Some(path) = &self.names {
            config.stations.names_file = path.clone();
        }
        if let Some(path) = &self.output {
            config.plot.output = path.clone();
        }
        if let Some(url) = &self.server {
            config.server.url = url.clone();
        }
        if let Some(seconds) = self.window {
            config.window.seconds = seconds;
        }
        if self.no_display {
            config.plot.display = false;
        }
    }

    /// Log level for the number of `-v` flags; warnings by default.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
