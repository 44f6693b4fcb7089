/// Shared data types for the drum plot pipeline.
///
/// Everything here is transient: a run builds these values, renders them,
/// and drops them. Nothing is persisted between runs.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Station descriptors
// ---------------------------------------------------------------------------

/// Default FDSN location selector: every location code.
pub const DEFAULT_LOCATION: &str = "*";

/// Default FDSN channel selector: every high-gain, high-rate channel.
pub const DEFAULT_CHANNEL: &str = "H*";

/// One entry of the station code list, in the form sent to the FDSN
/// services. Location and channel may carry FDSN wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationDescriptor {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl StationDescriptor {
    /// Builds a descriptor with the default location and channel selectors.
    pub fn new(network: impl Into<String>, station: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: DEFAULT_LOCATION.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }

    /// `NET.STA`, used in log lines.
    pub fn code(&self) -> String {
        format!("{}.{}", self.network, self.station)
    }
}

// ---------------------------------------------------------------------------
// Time window
// ---------------------------------------------------------------------------

/// The fixed trailing window requested for every station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `seconds` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, seconds: i64) -> Self {
        Self {
            start: end - Duration::seconds(seconds),
            end,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }

    /// Seconds from the window start to `t` (negative before the window).
    pub fn offset_of(&self, t: DateTime<Utc>) -> f64 {
        match (t - self.start).num_microseconds() {
            Some(us) => us as f64 / 1e6,
            None => (t - self.start).num_milliseconds() as f64 / 1000.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Waveform data
// ---------------------------------------------------------------------------

/// A continuous run of samples from one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    /// Time of the first sample.
    pub start: DateTime<Utc>,
    /// Samples per second.
    pub sampling_rate: f64,
    pub samples: Vec<f64>,
}

impl Trace {
    /// Time of the last sample. Equal to `start` for empty or single-sample
    /// traces.
    pub fn end(&self) -> DateTime<Utc> {
        if self.samples.len() < 2 || self.sampling_rate <= 0.0 {
            return self.start;
        }
        let span = (self.samples.len() - 1) as f64 / self.sampling_rate;
        self.start + Duration::microseconds((span * 1e6).round() as i64)
    }

    /// `NET.STA.LOC.CHA`
    pub fn id(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    /// The part of the trace inside `window`. Each edge snaps to the
    /// nearest sample; `None` when no sample is left.
    pub fn trimmed(&self, window: &TimeWindow) -> Option<Trace> {
        if self.samples.is_empty() || self.sampling_rate <= 0.0 || !self.sampling_rate.is_finite() {
            return None;
        }
        let offset = window.offset_of(self.start);
        let last = (self.samples.len() - 1) as f64;
        let first = (-offset * self.sampling_rate).round().max(0.0);
        let last_kept = ((window.duration_seconds() - offset) * self.sampling_rate)
            .round()
            .min(last);
        if first > last_kept {
            return None;
        }

        let (i0, i1) = (first as usize, last_kept as usize);
        let shift = Duration::microseconds((first / self.sampling_rate * 1e6).round() as i64);
        Some(Trace {
            network: self.network.clone(),
            station: self.station.clone(),
            location: self.location.clone(),
            channel: self.channel.clone(),
            start: self.start + shift,
            sampling_rate: self.sampling_rate,
            samples: self.samples[i0..=i1].to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while retrieving or decoding data for one station.
///
/// All of them end in the same "no data" panel; the variant only decides
/// how loudly the failure is logged and what the run summary records.
#[derive(Debug, Error)]
pub enum FdsnError {
    /// The server answered, but holds nothing for the request.
    #[error("no data available: {0}")]
    NoData(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// Payload could not be decoded (miniSEED or StationXML).
    #[error("decode error: {0}")]
    Decode(String),

    #[error("missing instrument response: {0}")]
    MissingResponse(String),

    #[error("processing error: {0}")]
    Processing(#[from] ProcessingError),
}

impl FdsnError {
    /// Short machine-readable tag for summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            FdsnError::NoData(_) => "no_data",
            FdsnError::Timeout(_) => "timeout",
            FdsnError::Http(_) => "http",
            FdsnError::Decode(_) => "decode",
            FdsnError::MissingResponse(_) => "missing_response",
            FdsnError::Processing(_) => "processing",
        }
    }

    /// True when the failure means "the server had nothing", as opposed to
    /// something being broken along the way.
    pub fn is_no_data(&self) -> bool {
        matches!(self, FdsnError::NoData(_))
    }
}

impl From<reqwest::Error> for FdsnError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FdsnError::Timeout(e.to_string())
        } else {
            FdsnError::Http(e.to_string())
        }
    }
}

/// Errors from the signal processing chain.
#[derive(Debug, Error, PartialEq)]
pub enum ProcessingError {
    #[error("trace has no samples")]
    EmptyTrace,

    #[error("trace has no finite samples after processing")]
    NoFiniteSamples,

    #[error("invalid sampling rate {0}")]
    InvalidSamplingRate(f64),

    #[error("{filter} corner {freq} Hz is not below Nyquist ({nyquist} Hz)")]
    AboveNyquist {
        filter: &'static str,
        freq: f64,
        nyquist: f64,
    },

    #[error("unsupported response input units '{0}'")]
    UnsupportedUnits(String),

    #[error("instrument response is zero at every frequency")]
    DegenerateResponse,
}
