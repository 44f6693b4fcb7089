/// Per-station signal chain: counts in, cm/s² out.
///
///   demean → cosine taper → response removal (acceleration)
///   → highpass → lowpass → bandstop → scale
///
/// Corners, water level, taper width and scale all come from
/// `ProcessingConfig`.

pub mod filters;
pub mod response;

use chrono::{DateTime, Duration, Utc};
use std::f64::consts::PI;

use crate::config::ProcessingConfig;
use crate::ingest::stationxml::InstrumentResponse;
use crate::model::{FdsnError, ProcessingError, Trace};

/// A trace after the full chain, in reporting units.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTrace {
    pub start: DateTime<Utc>,
    pub sampling_rate: f64,
    pub samples: Vec<f64>,
}

impl ProcessedTrace {
    /// Time of the last sample.
    pub fn end(&self) -> DateTime<Utc> {
        if self.samples.len() < 2 {
            return self.start;
        }
        let span = (self.samples.len() - 1) as f64 / self.sampling_rate;
        self.start + Duration::microseconds((span * 1e6).round() as i64)
    }

    /// Largest absolute value among the finite samples.
    pub fn peak(&self) -> Option<f64> {
        self.samples
            .iter()
            .filter(|v| v.is_finite())
            .map(|v| v.abs())
            .reduce(f64::max)
    }
}

/// Seconds between the last sample and `now`, never negative.
pub fn latency_seconds(end: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - end)
        .num_microseconds()
        .map(|us| us as f64 / 1e6)
        .unwrap_or_else(|| (now - end).num_seconds() as f64);
    seconds.max(0.0)
}

/// Subtracts the mean.
pub fn demean(data: &mut [f64]) {
    if data.is_empty() {
        return;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    data.iter_mut().for_each(|x| *x -= mean);
}

/// Applies a half-cosine (Hann) ramp over `fraction` of the samples at each
/// end.
pub fn cosine_taper(data: &mut [f64], fraction: f64) {
    let n = data.len();
    let width = ((n as f64) * fraction).floor() as usize;
    if width == 0 || n < 2 {
        return;
    }
    let width = width.min(n / 2);
    for i in 0..width {
        let w = 0.5 * (1.0 - (PI * i as f64 / width as f64).cos());
        data[i] *= w;
        data[n - 1 - i] *= w;
    }
}

/// Runs the full chain on one trace.
///
/// # Errors
/// - `FdsnError::MissingResponse` — the response cannot be evaluated.
/// - `FdsnError::Processing` — empty trace, bad sampling rate, unsupported
///   units, or a highpass corner at or above Nyquist.
pub fn process_trace(
    trace: &Trace,
    response: &InstrumentResponse,
    config: &ProcessingConfig,
) -> Result<ProcessedTrace, FdsnError> {
    if trace.samples.is_empty() {
        return Err(ProcessingError::EmptyTrace.into());
    }
    let fs = trace.sampling_rate;
    if !(fs.is_finite() && fs > 0.0) {
        return Err(ProcessingError::InvalidSamplingRate(fs).into());
    }

    let mut data = trace.samples.clone();
    demean(&mut data);
    cosine_taper(&mut data, config.taper_fraction);
    response::remove_response(&mut data, fs, response, config.water_level_db)?;

    let hp = config.highpass;
    filters::highpass(&mut data, hp.freq, hp.corners, fs)?;
    let lp = config.lowpass;
    filters::lowpass(&mut data, lp.freq, lp.corners, fs)?;
    let bs = config.bandstop;
    filters::bandstop(&mut data, bs.freqmin, bs.freqmax, bs.corners, fs)?;

    data.iter_mut().for_each(|x| *x *= config.scale);

    Ok(ProcessedTrace {
        start: trace.start,
        sampling_rate: fs,
        samples: data,
    })
}
