/// Zero-phase Butterworth filters in second-order sections.
///
/// Design goes through the analog prototype in zeros/poles/gain form:
///
///   prototype poles  exp(iπ(2k + n + 1) / 2n), k = 0..n
///   → lowpass / highpass / bandstop transform at the prewarped corners
///   → bilinear transform
///   → paired into biquads (conjugate pairs, nearest zeros to poles)
///
/// Filtering runs the cascade forward, then again over the reversed
/// output, which cancels the phase and squares the magnitude response.

use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

use crate::model::ProcessingError;

const IMAG_EPS: f64 = 1e-10;

/// Second-order section coefficients, normalized so a0 = 1.
/// H(z) = (b0 + b1 z⁻¹ + b2 z⁻²) / (1 + a1 z⁻¹ + a2 z⁻²)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    fn response(&self, z_inv: Complex64) -> Complex64 {
        let z_inv2 = z_inv * z_inv;
        let num = z_inv2 * self.b2 + z_inv * self.b1 + self.b0;
        let den = z_inv2 * self.a2 + z_inv * self.a1 + 1.0;
        num / den
    }
}

/// Cascade of biquads.
#[derive(Debug, Clone, PartialEq)]
pub struct SosFilter {
    pub sections: Vec<Biquad>,
}

impl SosFilter {
    /// One causal pass, zero initial state, Direct Form II Transposed.
    pub fn apply(&self, data: &mut [f64]) {
        for s in &self.sections {
            let (mut z1, mut z2) = (0.0, 0.0);
            for x in data.iter_mut() {
                let input = *x;
                let output = s.b0 * input + z1;
                z1 = s.b1 * input - s.a1 * output + z2;
                z2 = s.b2 * input - s.a2 * output;
                *x = output;
            }
        }
    }

    /// Forward pass, then a pass over the time-reversed result.
    pub fn apply_zero_phase(&self, data: &mut [f64]) {
        self.apply(data);
        data.reverse();
        self.apply(data);
        data.reverse();
    }

    /// Magnitude of the single-pass response at `freq` Hz.
    pub fn magnitude(&self, freq: f64, sampling_rate: f64) -> f64 {
        let w = 2.0 * PI * freq / sampling_rate;
        let z_inv = Complex64::new(w.cos(), -w.sin());
        self.sections
            .iter()
            .map(|s| s.response(z_inv))
            .product::<Complex64>()
            .norm()
    }

    /// Largest pole radius; below 1 means the cascade is stable.
    pub fn max_pole_radius(&self) -> f64 {
        self.sections
            .iter()
            .flat_map(|s| quadratic_roots(1.0, s.a1, s.a2))
            .map(|p| p.norm())
            .fold(0.0, f64::max)
    }
}

fn quadratic_roots(a: f64, b: f64, c: f64) -> [Complex64; 2] {
    let disc = Complex64::new(b * b - 4.0 * a * c, 0.0).sqrt();
    [(-b + disc) / (2.0 * a), (-b - disc) / (2.0 * a)]
}

// ---------------------------------------------------------------------------
// Design
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterKind {
    Lowpass(f64),
    Highpass(f64),
    Bandstop(f64, f64),
}

/// Zeros, poles and gain of a continuous or discrete system.
struct Zpk {
    zeros: Vec<Complex64>,
    poles: Vec<Complex64>,
    gain: f64,
}

fn prototype(order: usize) -> Zpk {
    let n = order as f64;
    let poles = (0..order)
        .map(|k| {
            let theta = PI * (2.0 * k as f64 + n + 1.0) / (2.0 * n);
            Complex64::new(theta.cos(), theta.sin())
        })
        .collect();
    Zpk { zeros: Vec::new(), poles, gain: 1.0 }
}

/// Real part of Π(-z) / Π(-p).
fn zp_ratio(zeros: &[Complex64], poles: &[Complex64]) -> f64 {
    let num: Complex64 = zeros.iter().map(|z| -*z).product();
    let den: Complex64 = poles.iter().map(|p| -*p).product();
    (num / den).re
}

fn to_lowpass(proto: Zpk, wo: f64) -> Zpk {
    let degree = (proto.poles.len() - proto.zeros.len()) as i32;
    Zpk {
        zeros: proto.zeros.iter().map(|z| *z * wo).collect(),
        poles: proto.poles.iter().map(|p| *p * wo).collect(),
        gain: proto.gain * wo.powi(degree),
    }
}

fn to_highpass(proto: Zpk, wo: f64) -> Zpk {
    let degree = proto.poles.len() - proto.zeros.len();
    let gain = proto.gain * zp_ratio(&proto.zeros, &proto.poles);
    let mut zeros: Vec<Complex64> = proto.zeros.iter().map(|z| wo / *z).collect();
    zeros.extend(std::iter::repeat_n(Complex64::new(0.0, 0.0), degree));
    Zpk {
        zeros,
        poles: proto.poles.iter().map(|p| wo / *p).collect(),
        gain,
    }
}

fn to_bandstop(proto: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = proto.poles.len() - proto.zeros.len();
    let gain = proto.gain * zp_ratio(&proto.zeros, &proto.poles);

    let split = |roots: &[Complex64]| -> Vec<Complex64> {
        let half: Vec<Complex64> = roots.iter().map(|r| (bw / 2.0) / *r).collect();
        let mut out: Vec<Complex64> = half.iter().map(|&h| h + (h * h - wo * wo).sqrt()).collect();
        out.extend(half.iter().map(|&h| h - (h * h - wo * wo).sqrt()));
        out
    };

    let mut zeros = split(&proto.zeros);
    zeros.extend(std::iter::repeat_n(Complex64::new(0.0, wo), degree));
    zeros.extend(std::iter::repeat_n(Complex64::new(0.0, -wo), degree));

    Zpk { zeros, poles: split(&proto.poles), gain }
}

fn bilinear(analog: Zpk, sampling_rate: f64) -> Zpk {
    let fs2 = 2.0 * sampling_rate;
    let degree = analog.poles.len() - analog.zeros.len();

    let num: Complex64 = analog.zeros.iter().map(|z| fs2 - *z).product();
    let den: Complex64 = analog.poles.iter().map(|p| fs2 - *p).product();
    let gain = analog.gain * (num / den).re;

    let mut zeros: Vec<Complex64> = analog.zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
    zeros.extend(std::iter::repeat_n(Complex64::new(-1.0, 0.0), degree));
    let poles = analog.poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();

    Zpk { zeros, poles, gain }
}

/// Groups roots into pairs: conjugate pairs first, then reals two by two.
/// A leftover real root is paired with a root at the origin, which leaves
/// the quadratic a first-order term.
fn root_pairs(roots: &[Complex64]) -> Vec<[Complex64; 2]> {
    let mut pairs = Vec::new();
    let mut reals = Vec::new();
    for r in roots {
        if r.im > IMAG_EPS {
            pairs.push([*r, r.conj()]);
        } else if r.im.abs() <= IMAG_EPS {
            reals.push(Complex64::new(r.re, 0.0));
        }
    }
    for chunk in reals.chunks(2) {
        let second = chunk.get(1).copied().unwrap_or(Complex64::new(0.0, 0.0));
        pairs.push([chunk[0], second]);
    }
    pairs
}

/// Coefficients [1, c1, c2] of (1 - r1 z⁻¹)(1 - r2 z⁻¹).
fn poly(pair: &[Complex64; 2]) -> (f64, f64) {
    (-(pair[0] + pair[1]).re, (pair[0] * pair[1]).re)
}

fn to_sos(digital: Zpk) -> SosFilter {
    let mut pole_pairs = root_pairs(&digital.poles);
    let mut zero_pairs = root_pairs(&digital.zeros);

    let origin = [Complex64::new(0.0, 0.0); 2];
    let count = pole_pairs.len().max(zero_pairs.len());
    pole_pairs.resize(count, origin);
    zero_pairs.resize(count, origin);

    // Poles closest to the unit circle get the nearest zeros first.
    pole_pairs.sort_by(|a, b| b[0].norm().total_cmp(&a[0].norm()));

    let mut sections = Vec::with_capacity(count);
    for poles in &pole_pairs {
        let nearest = zero_pairs
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (a[0] - poles[0]).norm().total_cmp(&(b[0] - poles[0]).norm()))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let zeros = zero_pairs.swap_remove(nearest);

        let (a1, a2) = poly(poles);
        let (c1, c2) = poly(&zeros);
        sections.push(Biquad { b0: 1.0, b1: c1, b2: c2, a1, a2 });
    }

    if let Some(first) = sections.first_mut() {
        first.b0 *= digital.gain;
        first.b1 *= digital.gain;
        first.b2 *= digital.gain;
    }
    SosFilter { sections }
}

/// Designs a digital Butterworth filter of `order` at `sampling_rate`.
///
/// Corner frequencies are in Hz and must lie strictly between 0 and
/// Nyquist; callers apply the Nyquist policy before getting here.
pub fn butterworth(kind: FilterKind, order: usize, sampling_rate: f64) -> Result<SosFilter, ProcessingError> {
    if !(sampling_rate.is_finite() && sampling_rate > 0.0) {
        return Err(ProcessingError::InvalidSamplingRate(sampling_rate));
    }
    let nyquist = sampling_rate / 2.0;
    let warp = |f: f64| 2.0 * sampling_rate * (PI * f / sampling_rate).tan();
    let check = |filter: &'static str, f: f64| {
        if f <= 0.0 || f >= nyquist {
            Err(ProcessingError::AboveNyquist { filter, freq: f, nyquist })
        } else {
            Ok(())
        }
    };

    let proto = prototype(order.max(1));
    let analog = match kind {
        FilterKind::Lowpass(f) => {
            check("lowpass", f)?;
            to_lowpass(proto, warp(f))
        }
        FilterKind::Highpass(f) => {
            check("highpass", f)?;
            to_highpass(proto, warp(f))
        }
        FilterKind::Bandstop(lo, hi) => {
            check("bandstop", lo)?;
            check("bandstop", hi)?;
            let (wl, wh) = (warp(lo), warp(hi));
            to_bandstop(proto, (wl * wh).sqrt(), wh - wl)
        }
    };

    Ok(to_sos(bilinear(analog, sampling_rate)))
}

// ---------------------------------------------------------------------------
// Trace-level filters
// ---------------------------------------------------------------------------

/// Zero-phase highpass. A corner at or above Nyquist is an error.
pub fn highpass(data: &mut [f64], freq: f64, corners: usize, sampling_rate: f64) -> Result<(), ProcessingError> {
    butterworth(FilterKind::Highpass(freq), corners, sampling_rate)?.apply_zero_phase(data);
    Ok(())
}

/// Zero-phase lowpass. A corner at or above Nyquist leaves the data as is.
pub fn lowpass(data: &mut [f64], freq: f64, corners: usize, sampling_rate: f64) -> Result<(), ProcessingError> {
    if freq >= sampling_rate / 2.0 {
        log::debug!(
            "Lowpass at {} Hz skipped: not below Nyquist ({} Hz)",
            freq,
            sampling_rate / 2.0
        );
        return Ok(());
    }
    butterworth(FilterKind::Lowpass(freq), corners, sampling_rate)?.apply_zero_phase(data);
    Ok(())
}

/// Zero-phase bandstop over `freqmin..freqmax`.
///
/// A band starting at or above Nyquist is skipped. A band that only ends
/// above Nyquist reaches the top of the spectrum and becomes a lowpass at
/// `freqmin`.
pub fn bandstop(
    data: &mut [f64],
    freqmin: f64,
    freqmax: f64,
    corners: usize,
    sampling_rate: f64,
) -> Result<(), ProcessingError> {
    let nyquist = sampling_rate / 2.0;
    if freqmin >= nyquist {
        log::debug!("Bandstop {}-{} Hz skipped: entirely above Nyquist ({} Hz)", freqmin, freqmax, nyquist);
        return Ok(());
    }
    if freqmax >= nyquist {
        log::debug!("Bandstop {}-{} Hz reaches Nyquist, applying lowpass at {} Hz", freqmin, freqmax, freqmin);
        return lowpass(data, freqmin, corners, sampling_rate);
    }
    butterworth(FilterKind::Bandstop(freqmin, freqmax), corners, sampling_rate)?.apply_zero_phase(data);
    Ok(())
}
