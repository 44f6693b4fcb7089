/// Run configuration loader - parses fdsn2plot.toml
///
/// Keeps server, window, filter and figure settings out of the code so a
/// scheduled job can be pointed at another server or station set without
/// recompiling. Every field is optional; an absent file means "all
/// defaults", which reproduce the classic one-hour drum plot.

use chrono::FixedOffset;
use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{DEFAULT_CHANNEL, DEFAULT_LOCATION};

/// Config file looked up in the working directory when `--config` is not
/// given.
pub const DEFAULT_CONFIG_FILE: &str = "fdsn2plot.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Configuration sections
// ---------------------------------------------------------------------------

/// Root configuration structure for TOML parsing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub server: ServerConfig,
    pub window: WindowConfig,
    pub stations: StationFilesConfig,
    pub processing: ProcessingConfig,
    pub plot: FigureConfig,
}

/// FDSN web-service connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL; `fdsnws/...` paths are appended to it.
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            user: None,
            password: None,
            timeout_seconds: 120,
        }
    }
}

impl ServerConfig {
    /// Credentials, when both halves are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.user.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

/// Longest accepted window: one week.
pub const MAX_WINDOW_SECONDS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Length of the trailing window ending "now".
    pub seconds: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { seconds: 3600 }
    }
}

/// Where the station lists live and which channels to request
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StationFilesConfig {
    pub codes_file: PathBuf,
    pub names_file: PathBuf,
    pub location: String,
    pub channel: String,
}

impl Default for StationFilesConfig {
    fn default() -> Self {
        Self {
            codes_file: PathBuf::from("lista_de_estaciones_por_codigo.txt"),
            names_file: PathBuf::from("lista_de_estaciones_por_nombre.txt"),
            location: DEFAULT_LOCATION.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }
}

/// Butterworth corner settings for highpass and lowpass stages
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CornerConfig {
    pub freq: f64,
    pub corners: usize,
}

pub const DEFAULT_HIGHPASS: CornerConfig = CornerConfig { freq: 0.1, corners: 4 };
pub const DEFAULT_LOWPASS: CornerConfig = CornerConfig { freq: 10.0, corners: 4 };

/// A `[processing.highpass]` or `[processing.lowpass]` table; absent keys
/// fall back to the stage's own default.
#[derive(Deserialize)]
struct CornerTable {
    freq: Option<f64>,
    corners: Option<usize>,
}

impl CornerTable {
    fn over(self, base: CornerConfig) -> CornerConfig {
        CornerConfig {
            freq: self.freq.unwrap_or(base.freq),
            corners: self.corners.unwrap_or(base.corners),
        }
    }
}

fn highpass_table<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CornerConfig, D::Error> {
    Ok(CornerTable::deserialize(deserializer)?.over(DEFAULT_HIGHPASS))
}

fn lowpass_table<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CornerConfig, D::Error> {
    Ok(CornerTable::deserialize(deserializer)?.over(DEFAULT_LOWPASS))
}

/// Mains-hum notch
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BandConfig {
    pub freqmin: f64,
    pub freqmax: f64,
    pub corners: usize,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self { freqmin: 49.0, freqmax: 51.0, corners: 2 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Water level for spectral division, in dB below the peak response.
    pub water_level_db: f64,
    /// Fraction of the trace tapered at each end before deconvolution.
    pub taper_fraction: f64,
    #[serde(deserialize_with = "highpass_table")]
    pub highpass: CornerConfig,
    #[serde(deserialize_with = "lowpass_table")]
    pub lowpass: CornerConfig,
    pub bandstop: BandConfig,
    /// Multiplier from m/s² to the reporting unit.
    pub scale: f64,
    pub unit_label: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            water_level_db: 60.0,
            taper_fraction: 0.05,
            highpass: DEFAULT_HIGHPASS,
            lowpass: DEFAULT_LOWPASS,
            bandstop: BandConfig::default(),
            scale: 100.0,
            unit_label: "cm/s²".to_string(),
        }
    }
}

/// Figure geometry and axis formatting
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FigureConfig {
    pub output: PathBuf,
    pub width_inches: f64,
    pub dpi: u32,
    pub height_per_station_inches: f64,
    pub min_height_inches: f64,
    /// Fixed offset used for the time axis labels (minutes east of UTC).
    pub utc_offset_minutes: i32,
    pub major_tick_minutes: u32,
    pub minor_tick_minutes: u32,
    /// Open the image in the platform viewer after saving.
    pub display: bool,
}

impl Default for FigureConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("fdsn2plot.png"),
            width_inches: 9.0,
            dpi: 100,
            height_per_station_inches: 0.5,
            min_height_inches: 3.0,
            utc_offset_minutes: -6 * 60,
            major_tick_minutes: 10,
            minor_tick_minutes: 5,
            display: true,
        }
    }
}

impl FigureConfig {
    /// Time zone of the axis labels.
    pub fn label_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl PlotConfig {
    /// Parses a TOML document. Missing sections and fields keep defaults.
    pub fn from_toml_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Loads the configuration file.
    ///
    /// With an explicit path the file must exist. Without one,
    /// `fdsn2plot.toml` in the working directory is used if present and
    /// defaults apply otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !required && !path.exists() {
            log::debug!("No {} found, using built-in defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&contents, &path.display().to_string())
    }

    /// Applies `FDSN_URL`, `FDSN_USER` and `FDSN_PASSWORD` from the process
    /// environment (after `.env` has been loaded by the caller).
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| env::var(key).ok());
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FDSN_URL").filter(|v| !v.is_empty()) {
            self.server.url = url;
        }
        if let Some(user) = lookup("FDSN_USER") {
            self.server.user = Some(user);
        }
        if let Some(password) = lookup("FDSN_PASSWORD") {
            self.server.password = Some(password);
        }
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.server.url.trim().is_empty() {
            return invalid("server.url must not be empty".to_string());
        }
        if self.window.seconds <= 0 || self.window.seconds > MAX_WINDOW_SECONDS {
            return invalid(format!(
                "window.seconds must be within 1..={}, got {}",
                MAX_WINDOW_SECONDS, self.window.seconds
            ));
        }

        let p = &self.processing;
        for (name, c) in [("highpass", p.highpass), ("lowpass", p.lowpass)] {
            if c.freq <= 0.0 || c.corners == 0 {
                return invalid(format!("processing.{} needs freq > 0 and corners >= 1", name));
            }
        }
        if p.bandstop.corners == 0 || p.bandstop.freqmin <= 0.0 || p.bandstop.freqmin >= p.bandstop.freqmax {
            return invalid(format!(
                "processing.bandstop needs 0 < freqmin < freqmax and corners >= 1, got {}..{}",
                p.bandstop.freqmin, p.bandstop.freqmax
            ));
        }
        if !(0.0..=0.5).contains(&p.taper_fraction) {
            return invalid(format!("processing.taper_fraction must be within 0..0.5, got {}", p.taper_fraction));
        }

        let f = &self.plot;
        if f.dpi == 0 || f.width_inches <= 0.0 || f.min_height_inches <= 0.0 || f.height_per_station_inches <= 0.0 {
            return invalid("plot sizes and dpi must be positive".to_string());
        }
        if f.major_tick_minutes == 0 || f.minor_tick_minutes == 0 {
            return invalid("plot tick intervals must be positive".to_string());
        }
        if f.label_offset().is_none() {
            return invalid(format!("plot.utc_offset_minutes {} is out of range", f.utc_offset_minutes));
        }

        Ok(())
    }
}
