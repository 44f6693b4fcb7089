/// Instrument response removal to acceleration.
///
/// Spectral division with a water level:
///
///   nfft   = next power of two ≥ 2 · npts
///   X(f)   = FFT of the zero-padded trace
///   R(f)   = response in counts per m/s² at the positive frequencies
///   Y(f)   = X(f) · 1 / R(f), with |R| clipped from below at
///            max|R| · 10^(-wl/20)
///   y      = first npts samples of IFFT(Y)
///
/// A velocity sensor's response is turned into an acceleration response by
/// dividing by iω, a displacement sensor's by (iω)². Bins where the
/// response is exactly zero (DC for those sensors) stay zero.

use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use std::f64::consts::PI;

use crate::ingest::stationxml::InstrumentResponse;
use crate::model::{FdsnError, ProcessingError};

/// What the sensor's input units measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundMotion {
    Displacement,
    Velocity,
    Acceleration,
}

impl GroundMotion {
    /// Classifies StationXML input units (`M`, `M/S`, `M/S**2`, ...).
    pub fn from_units(units: &str) -> Result<Self, ProcessingError> {
        let normalized: String = units
            .to_ascii_uppercase()
            .replace("SEC", "S")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        match normalized.as_str() {
            "M" => Ok(GroundMotion::Displacement),
            "M/S" => Ok(GroundMotion::Velocity),
            "M/S**2" | "M/S/S" | "M/S^2" | "M/S2" | "M/S²" => Ok(GroundMotion::Acceleration),
            _ => Err(ProcessingError::UnsupportedUnits(units.to_string())),
        }
    }

    /// Times the signal must be differentiated to reach acceleration.
    fn order(self) -> i32 {
        match self {
            GroundMotion::Displacement => 2,
            GroundMotion::Velocity => 1,
            GroundMotion::Acceleration => 0,
        }
    }
}

/// Smallest power of two ≥ 2 · npts.
pub fn fft_length(npts: usize) -> usize {
    (2 * npts.max(1)).next_power_of_two()
}

/// Acceleration response at `freq` Hz.
fn acceleration_response(
    response: &InstrumentResponse,
    motion: GroundMotion,
    freq: f64,
) -> Result<Complex64, FdsnError> {
    let r = response.evaluate(freq)?;
    let order = motion.order();
    if order == 0 {
        return Ok(r);
    }
    if freq == 0.0 {
        return Ok(Complex64::new(0.0, 0.0));
    }
    let iw = Complex64::new(0.0, 2.0 * PI * freq);
    Ok(r / iw.powi(order))
}

/// Inverts a spectrum in place with a water level `wl_db` below its peak.
///
/// Non-zero values below the water level are raised to it, keeping their
/// phase; exact zeros stay zero.
///
/// # Errors
/// `ProcessingError::DegenerateResponse` when the spectrum is zero
/// everywhere.
pub fn invert_with_water_level(spectrum: &mut [Complex64], wl_db: f64) -> Result<(), ProcessingError> {
    let peak = spectrum.iter().map(|c| c.norm()).fold(0.0, f64::max);
    if !(peak.is_finite() && peak > 0.0) {
        return Err(ProcessingError::DegenerateResponse);
    }
    let floor = peak * 10f64.powf(-wl_db / 20.0);

    for c in spectrum.iter_mut() {
        let magnitude = c.norm();
        if magnitude == 0.0 {
            continue;
        }
        if magnitude < floor {
            *c *= floor / magnitude;
        }
        *c = c.inv();
    }
    Ok(())
}

/// Deconvolves the instrument response from `data` (counts), leaving
/// acceleration in m/s².
///
/// The caller is expected to have demeaned and tapered the data.
///
/// # Errors
/// - `FdsnError::MissingResponse` — no input units or no usable gain.
/// - `FdsnError::Processing` — unsupported units or an all-zero response.
pub fn remove_response(
    data: &mut [f64],
    sampling_rate: f64,
    response: &InstrumentResponse,
    wl_db: f64,
) -> Result<(), FdsnError> {
    if data.is_empty() {
        return Err(ProcessingError::EmptyTrace.into());
    }
    if !(sampling_rate.is_finite() && sampling_rate > 0.0) {
        return Err(ProcessingError::InvalidSamplingRate(sampling_rate).into());
    }

    let units = response
        .input_units()
        .ok_or_else(|| FdsnError::MissingResponse("response declares no input units".to_string()))?;
    let motion = GroundMotion::from_units(units)?;

    let npts = data.len();
    let nfft = fft_length(npts);
    let half = nfft / 2;
    let df = sampling_rate / nfft as f64;

    let mut inverse = (0..=half)
        .map(|k| acceleration_response(response, motion, k as f64 * df))
        .collect::<Result<Vec<_>, _>>()?;
    invert_with_water_level(&mut inverse, wl_db)?;

    let mut buffer: Vec<Complex64> = data
        .iter()
        .map(|&x| Complex64::new(x, 0.0))
        .chain(std::iter::repeat(Complex64::new(0.0, 0.0)))
        .take(nfft)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(nfft).process(&mut buffer);

    for (k, bin) in buffer.iter_mut().enumerate() {
        let factor = if k <= half { inverse[k] } else { inverse[nfft - k].conj() };
        *bin *= factor;
    }

    planner.plan_fft_inverse(nfft).process(&mut buffer);

    let scale = 1.0 / nfft as f64;
    for (x, c) in data.iter_mut().zip(buffer.iter()) {
        *x = c.re * scale;
    }
    Ok(())
}
