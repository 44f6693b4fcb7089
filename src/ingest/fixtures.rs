/// Test fixtures: StationXML documents and miniSEED record builders.
///
/// The StationXML documents are trimmed to what the response parser reads,
/// but keep the real FDSN envelope:
///
///   FDSNStationXML
///     Network[code]
///       Station[code]
///         Channel[code, locationCode, startDate, endDate]
///           SampleRate
///           Response
///             InstrumentSensitivity (Value, Frequency, InputUnits/Name)
///             Stage[number]
///               PolesZeros (InputUnits, PzTransferFunctionType,
///                           NormalizationFactor, NormalizationFrequency,
///                           Zero/Pole with Real + Imaginary)
///               StageGain (Value, Frequency)
///
/// The miniSEED builders write single records the way dataselect servers
/// emit them: 48-byte header, blockette 1000 at byte 48, data at byte 64.

use chrono::{DateTime, Datelike, Timelike, Utc};

// ---------------------------------------------------------------------------
// StationXML
// ---------------------------------------------------------------------------

/// Broadband velocity sensor + digitizer, two channel epochs.
///
/// Stage 1 is a simplified two-pole seismometer (zeros at the origin,
/// poles at -0.037 ± 0.037i rad/s) with 1500 V/(m/s); stage 2 is a
/// digitizer at 419430 counts/V; stage 3 is a FIR stage with unit gain.
/// The 2010 epoch has a different gain so epoch selection can be checked.
pub(crate) fn fixture_velocity_sensor_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<FDSNStationXML xmlns="http://www.fdsn.org/xml/station/1" schemaVersion="1.1">
  <Source>SeisComP</Source>
  <Created>2024-05-01T18:00:00</Created>
  <Network code="TC" startDate="2000-01-01T00:00:00">
    <Station code="ABCD" startDate="2010-01-01T00:00:00">
      <Latitude>10.0</Latitude>
      <Longitude>-84.0</Longitude>
      <Elevation>1200.0</Elevation>
      <Channel code="HHZ" locationCode="00" startDate="2010-01-01T00:00:00" endDate="2020-01-01T00:00:00">
        <SampleRate>100</SampleRate>
        <Response>
          <InstrumentSensitivity>
            <Value>1.0e8</Value>
            <Frequency>1.0</Frequency>
            <InputUnits><Name>M/S</Name></InputUnits>
            <OutputUnits><Name>COUNTS</Name></OutputUnits>
          </InstrumentSensitivity>
          <Stage number="1">
            <PolesZeros>
              <InputUnits><Name>M/S</Name></InputUnits>
              <OutputUnits><Name>V</Name></OutputUnits>
              <PzTransferFunctionType>LAPLACE (RADIANS/SECOND)</PzTransferFunctionType>
              <NormalizationFactor>1.0</NormalizationFactor>
              <NormalizationFrequency>1.0</NormalizationFrequency>
              <Zero number="0"><Real>0</Real><Imaginary>0</Imaginary></Zero>
              <Zero number="1"><Real>0</Real><Imaginary>0</Imaginary></Zero>
              <Pole number="0"><Real>-0.037</Real><Imaginary>0.037</Imaginary></Pole>
              <Pole number="1"><Real>-0.037</Real><Imaginary>-0.037</Imaginary></Pole>
            </PolesZeros>
            <StageGain><Value>1000</Value><Frequency>1.0</Frequency></StageGain>
          </Stage>
          <Stage number="2">
            <Coefficients>
              <InputUnits><Name>V</Name></InputUnits>
              <OutputUnits><Name>COUNTS</Name></OutputUnits>
              <CfTransferFunctionType>DIGITAL</CfTransferFunctionType>
            </Coefficients>
            <StageGain><Value>100000</Value><Frequency>1.0</Frequency></StageGain>
          </Stage>
        </Response>
      </Channel>
      <Channel code="HHZ" locationCode="00" startDate="2020-01-01T00:00:00">
        <SampleRate>100</SampleRate>
        <Response>
          <InstrumentSensitivity>
            <Value>6.29e8</Value>
            <Frequency>1.0</Frequency>
            <InputUnits><Name>M/S</Name></InputUnits>
            <OutputUnits><Name>COUNTS</Name></OutputUnits>
          </InstrumentSensitivity>
          <Stage number="1">
            <PolesZeros>
              <InputUnits><Name>M/S</Name></InputUnits>
              <OutputUnits><Name>V</Name></OutputUnits>
              <PzTransferFunctionType>LAPLACE (RADIANS/SECOND)</PzTransferFunctionType>
              <NormalizationFactor>1.0</NormalizationFactor>
              <NormalizationFrequency>1.0</NormalizationFrequency>
              <Zero number="0"><Real>0</Real><Imaginary>0</Imaginary></Zero>
              <Zero number="1"><Real>0</Real><Imaginary>0</Imaginary></Zero>
              <Pole number="0"><Real>-0.037</Real><Imaginary>0.037</Imaginary></Pole>
              <Pole number="1"><Real>-0.037</Real><Imaginary>-0.037</Imaginary></Pole>
            </PolesZeros>
            <StageGain><Value>1500</Value><Frequency>1.0</Frequency></StageGain>
          </Stage>
          <Stage number="2">
            <Coefficients>
              <InputUnits><Name>V</Name></InputUnits>
              <OutputUnits><Name>COUNTS</Name></OutputUnits>
              <CfTransferFunctionType>DIGITAL</CfTransferFunctionType>
            </Coefficients>
            <StageGain><Value>419430</Value><Frequency>1.0</Frequency></StageGain>
          </Stage>
          <Stage number="3">
            <FIR>
              <InputUnits><Name>COUNTS</Name></InputUnits>
              <OutputUnits><Name>COUNTS</Name></OutputUnits>
              <Symmetry>NONE</Symmetry>
            </FIR>
            <StageGain><Value>1</Value><Frequency>1.0</Frequency></StageGain>
          </Stage>
        </Response>
      </Channel>
    </Station>
  </Network>
</FDSNStationXML>"#
}

/// Accelerometer with a flat response: 1e5 counts per m/s², declared only
/// through the overall sensitivity (no stages).
pub(crate) fn fixture_flat_accelerometer_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<FDSNStationXML xmlns="http://www.fdsn.org/xml/station/1" schemaVersion="1.1">
  <Source>SeisComP</Source>
  <Network code="OV">
    <Station code="ACC1">
      <Channel code="HNZ" locationCode="" startDate="2015-06-01T00:00:00Z">
        <SampleRate>200</SampleRate>
        <Response>
          <InstrumentSensitivity>
            <Value>100000</Value>
            <Frequency>1.0</Frequency>
            <InputUnits><Name>m/s**2</Name></InputUnits>
            <OutputUnits><Name>COUNTS</Name></OutputUnits>
          </InstrumentSensitivity>
        </Response>
      </Channel>
    </Station>
  </Network>
</FDSNStationXML>"#
}

/// Channel epoch with an empty Response element.
pub(crate) fn fixture_no_response_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<FDSNStationXML xmlns="http://www.fdsn.org/xml/station/1" schemaVersion="1.1">
  <Network code="TC">
    <Station code="NORS">
      <Channel code="HHZ" locationCode="00" startDate="2015-06-01T00:00:00">
        <SampleRate>100</SampleRate>
        <Response/>
      </Channel>
    </Station>
  </Network>
</FDSNStationXML>"#
}

// ---------------------------------------------------------------------------
// miniSEED
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
pub(crate) enum Order {
    Big,
    Little,
}

fn put_u16(buf: &mut [u8], at: usize, v: u16, order: Order) {
    let b = match order {
        Order::Big => v.to_be_bytes(),
        Order::Little => v.to_le_bytes(),
    };
    buf[at..at + 2].copy_from_slice(&b);
}

fn put_ascii(buf: &mut [u8], at: usize, width: usize, s: &str) {
    for i in 0..width {
        buf[at + i] = s.as_bytes().get(i).copied().unwrap_or(b' ');
    }
}

/// Writes one record around an already-encoded data section.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_record(
    order: Order,
    network: &str,
    station: &str,
    location: &str,
    channel: &str,
    start: DateTime<Utc>,
    rate: i16,
    encoding: u8,
    nsamples: u16,
    data: &[u8],
) -> Vec<u8> {
    let mut exponent = 8u8;
    while (1usize << exponent) < 64 + data.len() {
        exponent += 1;
    }
    let mut buf = vec![0u8; 1usize << exponent];

    buf[0..6].copy_from_slice(b"000001");
    buf[6] = b'D';
    buf[7] = b' ';
    put_ascii(&mut buf, 8, 5, station);
    put_ascii(&mut buf, 13, 2, location);
    put_ascii(&mut buf, 15, 3, channel);
    put_ascii(&mut buf, 18, 2, network);

    put_u16(&mut buf, 20, start.year() as u16, order);
    put_u16(&mut buf, 22, start.ordinal() as u16, order);
    buf[24] = start.hour() as u8;
    buf[25] = start.minute() as u8;
    buf[26] = start.second() as u8;
    put_u16(&mut buf, 28, (start.nanosecond() / 100_000) as u16, order);

    put_u16(&mut buf, 30, nsamples, order);
    put_u16(&mut buf, 32, rate as u16, order);
    put_u16(&mut buf, 34, 1, order);
    buf[39] = 1;
    put_u16(&mut buf, 44, 64, order);
    put_u16(&mut buf, 46, 48, order);

    put_u16(&mut buf, 48, 1000, order);
    put_u16(&mut buf, 50, 0, order);
    buf[52] = encoding;
    buf[53] = match order {
        Order::Big => 1,
        Order::Little => 0,
    };
    buf[54] = exponent;

    buf[64..64 + data.len()].copy_from_slice(data);
    buf
}

/// Big-endian record with an arbitrary encoding and data section.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_record_with_data(
    network: &str,
    station: &str,
    location: &str,
    channel: &str,
    start: DateTime<Utc>,
    rate: i16,
    encoding: u8,
    nsamples: u16,
    data: &[u8],
) -> Vec<u8> {
    build_record(Order::Big, network, station, location, channel, start, rate, encoding, nsamples, data)
}

/// Big-endian int32 record.
pub(crate) fn build_int32_record(
    network: &str,
    station: &str,
    location: &str,
    channel: &str,
    start: DateTime<Utc>,
    rate: i16,
    samples: &[i32],
) -> Vec<u8> {
    let data: Vec<u8> = samples.iter().flat_map(|s| s.to_be_bytes()).collect();
    build_record(Order::Big, network, station, location, channel, start, rate, 3, samples.len() as u16, &data)
}

/// Little-endian int16 record.
pub(crate) fn build_int16_record_le(
    network: &str,
    station: &str,
    location: &str,
    channel: &str,
    start: DateTime<Utc>,
    rate: i16,
    samples: &[i16],
) -> Vec<u8> {
    let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    build_record(Order::Little, network, station, location, channel, start, rate, 1, samples.len() as u16, &data)
}

fn frame(words: &[u32]) -> Vec<u8> {
    let mut out = vec![0u8; 64];
    for (i, w) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_be_bytes());
    }
    out
}

fn nibbles(codes: &[(usize, u32)]) -> u32 {
    codes.iter().fold(0, |acc, &(word, code)| acc | (code << (30 - 2 * word)))
}

/// One Steim-1 frame holding 10, 12, 9, 9, 300, -40000.
pub(crate) fn steim1_frame() -> Vec<u8> {
    let packed_bytes = u32::from_be_bytes([10u8, 2, (-3i8) as u8, 0]);
    frame(&[
        nibbles(&[(3, 1), (4, 3), (5, 3)]),
        10,                   // forward integration constant
        (-40000i32) as u32,   // reverse integration constant
        packed_bytes,         // diffs 10 (ignored), 2, -3, 0
        291,                  // one 32-bit diff
        (-40300i32) as u32,   // one 32-bit diff
    ])
}

/// One Steim-2 frame holding 5, 6, 4, 7, 6, 6, 8, 100008, 100003, 100010,
/// 100210.
pub(crate) fn steim2_frame() -> Vec<u8> {
    let four_bit = |vals: [i32; 7]| {
        vals.iter()
            .enumerate()
            .fold(2u32 << 30, |acc, (i, &v)| acc | (((v as u32) & 0xF) << (24 - 4 * i)))
    };
    let ten_bit = |vals: [i32; 3]| {
        vals.iter()
            .enumerate()
            .fold(3u32 << 30, |acc, (i, &v)| acc | (((v as u32) & 0x3FF) << (20 - 10 * i)))
    };
    frame(&[
        nibbles(&[(3, 3), (4, 2), (5, 2)]),
        5,
        100_210,
        four_bit([5, 1, -2, 3, -1, 0, 2]),
        (1u32 << 30) | 100_000,
        ten_bit([-5, 7, 200]),
    ])
}
