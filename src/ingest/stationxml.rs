/// FDSN StationXML response parser.
///
/// Reads the `level=response` document returned by `fdsnws/station/1` and
/// keeps, per channel epoch, just enough to evaluate the instrument
/// response in the frequency domain: the overall sensitivity, each stage's
/// gain and input units, and analog poles and zeros. See `fixtures.rs` for
/// the element layout.
///
/// Digital stages (FIR, coefficients, z-domain poles and zeros) contribute
/// their gain only.

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

use crate::model::FdsnError;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFunction {
    /// Laplace transform with s in rad/s.
    LaplaceRadians,
    /// Laplace transform with s in Hz.
    LaplaceHertz,
    /// z-transform; evaluated as a flat gain.
    Digital,
}

impl TransferFunction {
    fn parse(s: &str) -> Self {
        let s = s.to_ascii_uppercase();
        if s.contains("RADIANS") {
            TransferFunction::LaplaceRadians
        } else if s.contains("HERTZ") {
            TransferFunction::LaplaceHertz
        } else {
            TransferFunction::Digital
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolesZeros {
    pub transfer: TransferFunction,
    /// A0, normalizes the rational function to 1 at the normalization
    /// frequency.
    pub normalization_factor: f64,
    pub normalization_frequency: f64,
    pub zeros: Vec<Complex64>,
    pub poles: Vec<Complex64>,
}

impl Default for PolesZeros {
    fn default() -> Self {
        Self {
            transfer: TransferFunction::LaplaceRadians,
            normalization_factor: 1.0,
            normalization_frequency: 1.0,
            zeros: Vec::new(),
            poles: Vec::new(),
        }
    }
}

impl PolesZeros {
    /// A0 · Π(s - z) / Π(s - p) at `freq` Hz.
    pub fn evaluate(&self, freq: f64) -> Complex64 {
        let s = match self.transfer {
            TransferFunction::LaplaceRadians => Complex64::new(0.0, 2.0 * PI * freq),
            TransferFunction::LaplaceHertz => Complex64::new(0.0, freq),
            TransferFunction::Digital => return Complex64::new(1.0, 0.0),
        };
        let num: Complex64 = self.zeros.iter().map(|z| s - *z).product();
        let den: Complex64 = self.poles.iter().map(|p| s - *p).product();
        if den.norm() == 0.0 {
            return Complex64::new(0.0, 0.0);
        }
        num / den * self.normalization_factor
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseStage {
    pub number: u32,
    pub input_units: Option<String>,
    pub poles_zeros: Option<PolesZeros>,
    pub gain: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sensitivity {
    pub value: f64,
    pub frequency: f64,
    pub input_units: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentResponse {
    pub sensitivity: Option<Sensitivity>,
    pub stages: Vec<ResponseStage>,
}

impl InstrumentResponse {
    /// Physical input units of the whole chain (e.g. `M/S`), from the first
    /// stage that declares them, or from the sensitivity block.
    pub fn input_units(&self) -> Option<&str> {
        self.stages
            .iter()
            .find_map(|s| s.input_units.as_deref())
            .or_else(|| self.sensitivity.as_ref().and_then(|s| s.input_units.as_deref()))
    }

    /// Complex response (counts per input unit) at `freq` Hz.
    ///
    /// The stage chain is used when any stage carries a gain: the product
    /// of every stage gain times every analog pole-zero shape. Otherwise the
    /// overall sensitivity is used, shaped by whatever poles and zeros are
    /// present.
    ///
    /// # Errors
    /// `FdsnError::MissingResponse` when neither stage gains nor a
    /// sensitivity are available.
    pub fn evaluate(&self, freq: f64) -> Result<Complex64, FdsnError> {
        let shape: Complex64 = self
            .stages
            .iter()
            .filter_map(|s| s.poles_zeros.as_ref())
            .map(|pz| pz.evaluate(freq))
            .product();

        let gains: Vec<f64> = self.stages.iter().filter_map(|s| s.gain).collect();
        if !gains.is_empty() {
            return Ok(shape * gains.iter().product::<f64>());
        }

        match &self.sensitivity {
            Some(s) if s.value != 0.0 => Ok(shape * s.value),
            _ => Err(FdsnError::MissingResponse(
                "response declares neither stage gains nor a sensitivity".to_string(),
            )),
        }
    }
}

/// One `<Channel>` element: a channel over one period of validity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelEpoch {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub sample_rate: Option<f64>,
    pub response: InstrumentResponse,
}

impl ChannelEpoch {
    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| s <= t) && self.end.is_none_or(|e| t < e)
    }

    fn matches(&self, network: &str, station: &str, location: &str, channel: &str) -> bool {
        self.network == network
            && self.station == station
            && self.location == location
            && self.channel == channel
    }
}

/// Finds the epoch of the given channel valid at `at`.
///
/// # Errors
/// `FdsnError::MissingResponse` when no epoch of that channel covers the
/// time.
pub fn select_epoch<'a>(
    epochs: &'a [ChannelEpoch],
    network: &str,
    station: &str,
    location: &str,
    channel: &str,
    at: DateTime<Utc>,
) -> Result<&'a ChannelEpoch, FdsnError> {
    epochs
        .iter()
        .find(|e| e.matches(network, station, location, channel) && e.covers(at))
        .ok_or_else(|| {
            FdsnError::MissingResponse(format!(
                "no response for {}.{}.{}.{} at {}",
                network,
                station,
                location,
                channel,
                at.to_rfc3339()
            ))
        })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, FdsnError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| FdsnError::Decode(format!("invalid date '{}': {}", s, e)))
}

fn parse_number(s: &str, what: &str) -> Result<f64, FdsnError> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| FdsnError::Decode(format!("invalid {} '{}'", what, s.trim())))
}

/// (local name, value) pairs of an element's attributes.
fn attributes(e: &BytesStart) -> Vec<(String, String)> {
    e.attributes()
        .filter_map(|a| a.ok())
        .map(|a| {
            (
                String::from_utf8_lossy(a.key.local_name().as_ref()).to_string(),
                String::from_utf8_lossy(a.value.as_ref()).to_string(),
            )
        })
        .collect()
}

fn attribute(attrs: &[(String, String)], key: &str) -> Option<String> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

/// Parser state while walking the event stream.
#[derive(Default)]
struct Walker {
    path: Vec<String>,
    network: String,
    station: String,
    epoch: Option<ChannelEpoch>,
    stage: Option<ResponseStage>,
    poles_zeros: Option<PolesZeros>,
    root: Complex64,
    epochs: Vec<ChannelEpoch>,
}

impl Walker {
    fn open(&mut self, name: &str, attrs: &[(String, String)]) -> Result<(), FdsnError> {
        match name {
            "Network" => self.network = attribute(attrs, "code").unwrap_or_default(),
            "Station" => self.station = attribute(attrs, "code").unwrap_or_default(),
            "Channel" => {
                self.epoch = Some(ChannelEpoch {
                    network: self.network.clone(),
                    station: self.station.clone(),
                    location: attribute(attrs, "locationCode").unwrap_or_default().trim().to_string(),
                    channel: attribute(attrs, "code").unwrap_or_default(),
                    start: attribute(attrs, "startDate").map(|s| parse_datetime(&s)).transpose()?,
                    end: attribute(attrs, "endDate").map(|s| parse_datetime(&s)).transpose()?,
                    ..ChannelEpoch::default()
                });
            }
            "Stage" if self.epoch.is_some() => {
                self.stage = Some(ResponseStage {
                    number: attribute(attrs, "number").and_then(|n| n.parse().ok()).unwrap_or(0),
                    ..ResponseStage::default()
                });
            }
            "PolesZeros" if self.stage.is_some() => self.poles_zeros = Some(PolesZeros::default()),
            "Zero" | "Pole" => self.root = Complex64::new(0.0, 0.0),
            "InstrumentSensitivity" => {
                if let Some(epoch) = self.epoch.as_mut() {
                    epoch.response.sensitivity = Some(Sensitivity::default());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &str) {
        match name {
            "Channel" => {
                if let Some(mut epoch) = self.epoch.take() {
                    epoch.response.stages.sort_by_key(|s| s.number);
                    self.epochs.push(epoch);
                }
            }
            "Stage" => {
                if let (Some(stage), Some(epoch)) = (self.stage.take(), self.epoch.as_mut()) {
                    epoch.response.stages.push(stage);
                }
            }
            "PolesZeros" => {
                if let (Some(pz), Some(stage)) = (self.poles_zeros.take(), self.stage.as_mut()) {
                    stage.poles_zeros = Some(pz);
                }
            }
            "Zero" => {
                if let Some(pz) = self.poles_zeros.as_mut() {
                    pz.zeros.push(self.root);
                }
            }
            "Pole" => {
                if let Some(pz) = self.poles_zeros.as_mut() {
                    pz.poles.push(self.root);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) -> Result<(), FdsnError> {
        let Some(epoch) = self.epoch.as_mut() else {
            return Ok(());
        };
        let len = self.path.len();
        let tail: Vec<&str> = self.path[len.saturating_sub(3)..].iter().map(String::as_str).collect();

        match tail.as_slice() {
            [_, "Channel", "SampleRate"] => {
                epoch.sample_rate = Some(parse_number(text, "sample rate")?);
            }
            [_, "InstrumentSensitivity", "Value"] => {
                if let Some(s) = epoch.response.sensitivity.as_mut() {
                    s.value = parse_number(text, "sensitivity")?;
                }
            }
            [_, "InstrumentSensitivity", "Frequency"] => {
                if let Some(s) = epoch.response.sensitivity.as_mut() {
                    s.frequency = parse_number(text, "sensitivity frequency")?;
                }
            }
            ["InstrumentSensitivity", "InputUnits", "Name"] => {
                if let Some(s) = epoch.response.sensitivity.as_mut() {
                    s.input_units = Some(text.trim().to_string());
                }
            }
            [_, "InputUnits", "Name"] if self.path.len() >= 4 && self.path[len - 4] == "Stage" => {
                if let Some(stage) = self.stage.as_mut() {
                    stage.input_units = Some(text.trim().to_string());
                }
            }
            [_, "PolesZeros", "PzTransferFunctionType"] => {
                if let Some(pz) = self.poles_zeros.as_mut() {
                    pz.transfer = TransferFunction::parse(text);
                }
            }
            [_, "PolesZeros", "NormalizationFactor"] => {
                if let Some(pz) = self.poles_zeros.as_mut() {
                    pz.normalization_factor = parse_number(text, "normalization factor")?;
                }
            }
            [_, "PolesZeros", "NormalizationFrequency"] => {
                if let Some(pz) = self.poles_zeros.as_mut() {
                    pz.normalization_frequency = parse_number(text, "normalization frequency")?;
                }
            }
            [_, "Zero" | "Pole", "Real"] => self.root.re = parse_number(text, "pole/zero")?,
            [_, "Zero" | "Pole", "Imaginary"] => self.root.im = parse_number(text, "pole/zero")?,
            ["Stage", "StageGain", "Value"] => {
                if let Some(stage) = self.stage.as_mut() {
                    stage.gain = Some(parse_number(text, "stage gain")?);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Parses a StationXML document into channel epochs, in document order.
///
/// # Errors
/// `FdsnError::Decode` for malformed XML or unparseable numbers and dates.
pub fn parse_station_xml(xml: &str) -> Result<Vec<ChannelEpoch>, FdsnError> {
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut walker = Walker::default();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                saw_root |= name == "FDSNStationXML";
                walker.path.push(name.clone());
                walker.open(&name, &attributes(&e))?;
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                walker.path.push(name.clone());
                walker.open(&name, &attributes(&e))?;
                walker.close(&name);
                walker.path.pop();
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                walker.close(&name);
                walker.path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = String::from_utf8_lossy(&t).to_string();
                if !text.trim().is_empty() {
                    walker.text(&text)?;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FdsnError::Decode(format!(
                    "StationXML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(FdsnError::Decode("document is not FDSN StationXML".to_string()));
    }
    log::debug!("Parsed {} channel epochs from StationXML", walker.epochs.len());
    Ok(walker.epochs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
