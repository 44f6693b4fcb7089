/// Drum plot run orchestration
///
/// This module drives one complete run:
/// 1. Loads the station code list and the display-name list
/// 2. Fixes the time window ending "now"
/// 3. Fetches, corrects and filters each station in list order
/// 4. Turns any per-station failure into a "no data" panel
/// 5. Renders the stacked panels and builds the run summary

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{ConfigError, PlotConfig};
use crate::ingest::fdsn::WaveformSource;
use crate::ingest::stationxml;
use crate::model::{FdsnError, ProcessingError, StationDescriptor, TimeWindow};
use crate::plot::{self, PanelData, RenderError, RenderReport, StationPanel};
use crate::processing::{self, ProcessedTrace};
use crate::stations::{self, StationListError, StationNames};

#[derive(Debug, Error)]
pub enum DrumPlotError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stations(#[from] StationListError),

    #[error("failed to set up FDSN client: {0}")]
    Client(#[from] FdsnError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("failed to write summary {path}: {source}")]
    Summary {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode summary: {0}")]
    SummaryEncode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// One drum plot run.
pub struct DrumPlot {
    config: PlotConfig,
    stations: Vec<StationDescriptor>,
    names: StationNames,
}

/// Outcome of [`DrumPlot::run`].
#[derive(Debug)]
pub struct RunOutcome {
    pub window: TimeWindow,
    pub panels: Vec<StationPanel>,
    pub render: RenderReport,
}

impl DrumPlot {
    /// Create a run from a validated configuration; stations are loaded by
    /// [`initialize`](Self::initialize).
    pub fn new(config: PlotConfig) -> Self {
        Self {
            config,
            stations: Vec::new(),
            names: StationNames::default(),
        }
    }

    /// Create a run with an already-built station set.
    pub fn with_stations(config: PlotConfig, stations: Vec<StationDescriptor>, names: StationNames) -> Self {
        Self { config, stations, names }
    }

    /// Load the station lists named in the configuration.
    ///
    /// A missing or empty code list is fatal; a missing name list is not.
    pub fn initialize(&mut self) -> Result<(), DrumPlotError> {
        let files = &self.config.stations;
        self.stations = stations::load_station_list(&files.codes_file, &files.location, &files.channel)?;
        self.names = StationNames::load(&files.names_file);

        log::info!(
            "Loaded {} stations from {} ({} display names)",
            self.stations.len(),
            files.codes_file.display(),
            self.names.len()
        );
        Ok(())
    }

    pub fn config(&self) -> &PlotConfig {
        &self.config
    }

    pub fn stations(&self) -> &[StationDescriptor] {
        &self.stations
    }

    pub fn display_name<'a>(&'a self, station: &'a StationDescriptor) -> &'a str {
        self.names.display_name(&station.station)
    }

    /// The window every station is requested for.
    pub fn window_ending(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::ending_at(now, self.config.window.seconds)
    }

    // -----------------------------------------------------------------------
    // Per-station pipeline
    // -----------------------------------------------------------------------

    /// Fetch, correct and filter one station.
    ///
    /// Traces are cut to `window` first; the first one left is the one
    /// processed, and its exact channel decides which response epoch is used.
    pub fn fetch_and_process(
        &self,
        source: &dyn WaveformSource,
        station: &StationDescriptor,
        window: &TimeWindow,
    ) -> Result<ProcessedTrace, FdsnError> {
        let traces = source.get_waveforms(station, window)?;
        if traces.is_empty() {
            return Err(FdsnError::NoData(format!("no traces for {}", station.code())));
        }
        let mut inside = traces.iter().filter_map(|t| t.trimmed(window));
        let Some(trace) = inside.next() else {
            return Err(FdsnError::NoData(format!(
                "no samples for {} inside {} .. {}",
                station.code(),
                window.start.to_rfc3339(),
                window.end.to_rfc3339()
            )));
        };
        let extra = inside.count();
        if extra > 0 {
            log::debug!("{}: {} traces in window, plotting {}", station.code(), extra + 1, trace.id());
        }

        let channel = StationDescriptor {
            network: trace.network.clone(),
            station: trace.station.clone(),
            location: trace.location.clone(),
            channel: trace.channel.clone(),
        };
        let epochs = source.get_response(&channel, window)?;
        let epoch = stationxml::select_epoch(
            &epochs,
            &trace.network,
            &trace.station,
            &trace.location,
            &trace.channel,
            trace.start,
        )?;

        processing::process_trace(&trace, &epoch.response, &self.config.processing)
    }

    /// Build the panel for one station, falling back to "no data" on any
    /// failure.
    pub fn station_panel(
        &self,
        source: &dyn WaveformSource,
        station: &StationDescriptor,
        window: &TimeWindow,
        now: DateTime<Utc>,
    ) -> StationPanel {
        let display_name = self.display_name(station).to_string();

        let data = self
            .fetch_and_process(source, station, window)
            .and_then(|trace| {
                let peak = trace.peak().ok_or(ProcessingError::NoFiniteSamples)?;
                let latency = processing::latency_seconds(trace.end(), now);
                Ok(PanelData::Waveform { trace, peak, latency })
            })
            .unwrap_or_else(|reason| {
                if reason.is_no_data() {
                    log::info!("{}: {}", station.code(), reason);
                } else {
                    log::warn!("{}: {}", station.code(), reason);
                }
                PanelData::NoData { reason }
            });

        if let PanelData::Waveform { peak, latency, .. } = &data {
            log::info!("{}: peak {:.3} {}, latency {:.1}s", station.code(), peak, self.config.processing.unit_label, latency);
        }

        StationPanel {
            station: station.clone(),
            display_name,
            data,
        }
    }

    /// One panel per station, in list order.
    pub fn collect(&self, source: &dyn WaveformSource, window: &TimeWindow, now: DateTime<Utc>) -> Vec<StationPanel> {
        self.stations
            .iter()
            .map(|station| self.station_panel(source, station, window, now))
            .collect()
    }

    /// Complete run: collect every station and render the image.
    pub fn run(&self, source: &dyn WaveformSource, now: DateTime<Utc>) -> Result<RunOutcome, DrumPlotError> {
        let window = self.window_ending(now);
        log::info!(
            "Fetching {} stations for {} .. {}",
            self.stations.len(),
            window.start.to_rfc3339(),
            window.end.to_rfc3339()
        );

        let panels = self.collect(source, &window, now);
        let plotted = panels.iter().filter(|p| p.has_data()).count();
        log::info!("{} of {} stations plotted", plotted, panels.len());

        let render = plot::render(&panels, &window, &self.config.plot, &self.config.processing.unit_label)?;
        Ok(RunOutcome { window, panels, render })
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StationStatus {
    Plotted,
    NoData,
}

#[derive(Debug, Clone, Serialize)]
pub struct StationSummary {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub display_name: String,
    pub status: StationStatus,
    pub peak: Option<f64>,
    pub latency_seconds: Option<f64>,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
}

impl From<&StationPanel> for StationSummary {
    fn from(panel: &StationPanel) -> Self {
        let s = &panel.station;
        let mut summary = StationSummary {
            network: s.network.clone(),
            station: s.station.clone(),
            location: s.location.clone(),
            channel: s.channel.clone(),
            display_name: panel.display_name.clone(),
            status: StationStatus::Plotted,
            peak: None,
            latency_seconds: None,
            error_kind: None,
            error: None,
        };
        match &panel.data {
            PanelData::Waveform { peak, latency, .. } => {
                summary.peak = Some(*peak);
                summary.latency_seconds = Some(*latency);
            }
            PanelData::NoData { reason } => {
                summary.status = StationStatus::NoData;
                summary.error_kind = Some(reason.kind());
                summary.error = Some(reason.to_string());
            }
        }
        summary
    }
}

/// JSON record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub output: PathBuf,
    pub stations: Vec<StationSummary>,
}

impl RunSummary {
    pub fn new(outcome: &RunOutcome, output: &Path, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            window_start: outcome.window.start,
            window_end: outcome.window.end,
            output: output.to_path_buf(),
            stations: outcome.panels.iter().map(StationSummary::from).collect(),
        }
    }

    pub fn plotted(&self) -> usize {
        self.stations.iter().filter(|s| s.status == StationStatus::Plotted).count()
    }

    pub fn to_json(&self) -> Result<String, DrumPlotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), DrumPlotError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|source| DrumPlotError::Summary {
            path: path.display().to_string(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
