/// miniSEED 2.x decoder for FDSN dataselect payloads.
///
/// A dataselect response is a plain concatenation of fixed-length records.
/// Each record is:
///
///   bytes  0..48   fixed section of data header
///     0..6    sequence number (ASCII)
///     6       data quality indicator (D/R/Q/M)
///     8..13   station, 13..15 location, 15..18 channel, 18..20 network
///     20..30  BTIME start (year, day-of-year, h, m, s, unused, 0.1 ms)
///     30..32  number of samples
///     32..36  sample rate factor + multiplier
///     36      activity flags (bit 1: time correction already applied)
///     39      number of blockettes
///     40..44  time correction (0.1 ms)
///     44..46  offset of data, 46..48 offset of first blockette
///   blockettes   1000 (encoding, word order, record length) and optionally
///                1001 (microsecond offset)
///   data         samples in the encoding named by blockette 1000
///
/// Byte order is taken from the header itself: the BTIME year and
/// day-of-year only make sense in one of the two orders.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::model::{FdsnError, Trace};

const FIXED_HEADER_LEN: usize = 48;
const STEIM_FRAME_LEN: usize = 64;

// Blockette 1000 encoding codes
const ENC_TEXT: u8 = 0;
const ENC_INT16: u8 = 1;
const ENC_INT32: u8 = 3;
const ENC_FLOAT32: u8 = 4;
const ENC_FLOAT64: u8 = 5;
const ENC_STEIM1: u8 = 10;
const ENC_STEIM2: u8 = 11;

// ---------------------------------------------------------------------------
// Byte order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        let a = [b[0], b[1]];
        match self {
            ByteOrder::Big => u16::from_be_bytes(a),
            ByteOrder::Little => u16::from_le_bytes(a),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let a = [b[0], b[1], b[2], b[3]];
        match self {
            ByteOrder::Big => u32::from_be_bytes(a),
            ByteOrder::Little => u32::from_le_bytes(a),
        }
    }

    fn u64(self, b: &[u8]) -> u64 {
        let mut a = [0u8; 8];
        a.copy_from_slice(&b[..8]);
        match self {
            ByteOrder::Big => u64::from_be_bytes(a),
            ByteOrder::Little => u64::from_le_bytes(a),
        }
    }

    /// Picks the order in which the BTIME year/day-of-year are plausible.
    fn detect(header: &[u8]) -> Option<Self> {
        [ByteOrder::Big, ByteOrder::Little].into_iter().find(|&order| {
            let year = order.u16(&header[20..22]);
            let doy = order.u16(&header[22..24]);
            (1900..=2100).contains(&year) && (1..=366).contains(&doy)
        })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One decoded data record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub start: DateTime<Utc>,
    pub sampling_rate: f64,
    pub samples: Vec<f64>,
}

/// Header fields needed to decode the data section.
struct Header {
    order: ByteOrder,
    network: String,
    station: String,
    location: String,
    channel: String,
    start: DateTime<Utc>,
    nsamples: usize,
    sampling_rate: f64,
    data_offset: usize,
    encoding: u8,
    record_length: usize,
}

fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// SEED sample rate from factor and multiplier.
pub fn sample_rate(factor: i16, multiplier: i16) -> f64 {
    let f = factor as f64;
    let m = multiplier as f64;
    match (factor, multiplier) {
        (0, _) | (_, 0) => 0.0,
        (f_, m_) if f_ > 0 && m_ > 0 => f * m,
        (f_, m_) if f_ > 0 && m_ < 0 => -f / m,
        (f_, m_) if f_ < 0 && m_ > 0 => -m / f,
        _ => 1.0 / (f * m),
    }
}

fn parse_header(buf: &[u8]) -> Result<Header, FdsnError> {
    if buf.len() < FIXED_HEADER_LEN {
        return Err(FdsnError::Decode(format!(
            "truncated record header ({} bytes)",
            buf.len()
        )));
    }

    let order = ByteOrder::detect(buf)
        .ok_or_else(|| FdsnError::Decode("unrecognised record start time".to_string()))?;

    let year = order.u16(&buf[20..22]) as i32;
    let doy = order.u16(&buf[22..24]) as u32;
    let (hour, minute, second) = (buf[24] as u32, buf[25] as u32, buf[26] as u32);
    let tenth_millis = order.u16(&buf[28..30]) as i64;

    let nsamples = order.u16(&buf[30..32]) as usize;
    let factor = order.u16(&buf[32..34]) as i16;
    let multiplier = order.u16(&buf[34..36]) as i16;
    let activity_flags = buf[36];
    let num_blockettes = buf[39] as usize;
    let time_correction = order.u32(&buf[40..44]) as i32 as i64;
    let data_offset = order.u16(&buf[44..46]) as usize;
    let mut blockette_offset = order.u16(&buf[46..48]) as usize;

    let mut encoding = None;
    let mut record_length = None;
    let mut microseconds: i64 = 0;

    let mut seen = 0;
    while blockette_offset != 0 && seen < num_blockettes && blockette_offset + 4 <= buf.len() {
        let b = blockette_offset;
        let kind = order.u16(&buf[b..b + 2]);
        let next = order.u16(&buf[b + 2..b + 4]) as usize;
        match kind {
            1000 if b + 8 <= buf.len() => {
                encoding = Some(buf[b + 4]);
                let exponent = buf[b + 6] as u32;
                if !(7..=20).contains(&exponent) {
                    return Err(FdsnError::Decode(format!(
                        "implausible record length exponent {}",
                        exponent
                    )));
                }
                record_length = Some(1usize << exponent);
            }
            1001 if b + 8 <= buf.len() => {
                microseconds = buf[b + 5] as i8 as i64;
            }
            _ => {}
        }
        seen += 1;
        if next <= b {
            break;
        }
        blockette_offset = next;
    }

    let encoding =
        encoding.ok_or_else(|| FdsnError::Decode("record without blockette 1000".to_string()))?;
    let record_length = record_length.unwrap_or(buf.len());

    let date = NaiveDate::from_yo_opt(year, doy)
        .ok_or_else(|| FdsnError::Decode(format!("invalid day-of-year {} {}", year, doy)))?;
    // Second 60 marks a leap second; chrono keeps it in the nanosecond field.
    let naive = if second == 60 {
        date.and_hms_nano_opt(hour, minute, 59, 1_000_000_000)
    } else {
        date.and_hms_opt(hour, minute, second)
    }
    .ok_or_else(|| FdsnError::Decode(format!("invalid time {}:{}:{}", hour, minute, second)))?;

    let mut start = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
        + Duration::microseconds(tenth_millis * 100 + microseconds);
    if activity_flags & 0x02 == 0 && time_correction != 0 {
        start += Duration::microseconds(time_correction * 100);
    }

    Ok(Header {
        order,
        station: ascii_field(&buf[8..13]),
        location: ascii_field(&buf[13..15]),
        channel: ascii_field(&buf[15..18]),
        network: ascii_field(&buf[18..20]),
        start,
        nsamples,
        sampling_rate: sample_rate(factor, multiplier),
        data_offset,
        encoding,
        record_length,
    })
}

// ---------------------------------------------------------------------------
// Sample decoding
// ---------------------------------------------------------------------------

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

fn decode_fixed_width(
    data: &[u8],
    nsamples: usize,
    width: usize,
    read: impl Fn(&[u8]) -> f64,
) -> Result<Vec<f64>, FdsnError> {
    if data.len() < nsamples * width {
        return Err(FdsnError::Decode(format!(
            "data section holds {} bytes, {} samples need {}",
            data.len(),
            nsamples,
            nsamples * width
        )));
    }
    Ok(data.chunks_exact(width).take(nsamples).map(read).collect())
}

/// Decodes Steim-1 or Steim-2 compressed frames.
///
/// Frame 0 carries the forward (first sample) and reverse (last sample)
/// integration constants in words 1 and 2. Every other word holds
/// differences packed according to its 2-bit nibble in word 0.
fn decode_steim(
    data: &[u8],
    nsamples: usize,
    order: ByteOrder,
    steim2: bool,
) -> Result<Vec<f64>, FdsnError> {
    let mut diffs: Vec<i32> = Vec::with_capacity(nsamples + 8);
    let mut first: Option<i32> = None;
    let mut last: i32 = 0;

    'frames: for (f, frame) in data.chunks_exact(STEIM_FRAME_LEN).enumerate() {
        let nibbles = order.u32(&frame[0..4]);
        for w in 1..16 {
            let code = (nibbles >> (30 - 2 * w)) & 0x3;
            let word = order.u32(&frame[w * 4..w * 4 + 4]);

            if f == 0 && w == 1 {
                first = Some(word as i32);
                continue;
            }
            if f == 0 && w == 2 {
                last = word as i32;
                continue;
            }

            match code {
                0 => {}
                1 => diffs.extend(word.to_be_bytes().iter().map(|&b| b as i8 as i32)),
                2 if !steim2 => {
                    diffs.push((word >> 16) as u16 as i16 as i32);
                    diffs.push(word as u16 as i16 as i32);
                }
                3 if !steim2 => diffs.push(word as i32),
                2 => match word >> 30 {
                    1 => diffs.push(sign_extend(word & 0x3FFF_FFFF, 30)),
                    2 => {
                        for shift in [15, 0] {
                            diffs.push(sign_extend((word >> shift) & 0x7FFF, 15));
                        }
                    }
                    3 => {
                        for shift in [20, 10, 0] {
                            diffs.push(sign_extend((word >> shift) & 0x3FF, 10));
                        }
                    }
                    dnib => {
                        return Err(FdsnError::Decode(format!(
                            "invalid Steim-2 sub-code {} for nibble 2",
                            dnib
                        )));
                    }
                },
                _ => match word >> 30 {
                    0 => {
                        for shift in [24, 18, 12, 6, 0] {
                            diffs.push(sign_extend((word >> shift) & 0x3F, 6));
                        }
                    }
                    1 => {
                        for shift in [25, 20, 15, 10, 5, 0] {
                            diffs.push(sign_extend((word >> shift) & 0x1F, 5));
                        }
                    }
                    2 => {
                        for shift in [24, 20, 16, 12, 8, 4, 0] {
                            diffs.push(sign_extend((word >> shift) & 0xF, 4));
                        }
                    }
                    dnib => {
                        return Err(FdsnError::Decode(format!(
                            "invalid Steim-2 sub-code {} for nibble 3",
                            dnib
                        )));
                    }
                },
            }

            if diffs.len() >= nsamples {
                break 'frames;
            }
        }
    }

    let first = first.ok_or_else(|| FdsnError::Decode("empty Steim data section".to_string()))?;
    if diffs.len() < nsamples {
        return Err(FdsnError::Decode(format!(
            "Steim frames hold {} differences, header announces {} samples",
            diffs.len(),
            nsamples
        )));
    }

    // The first difference is relative to the previous record and is
    // superseded by the forward integration constant.
    let mut samples = Vec::with_capacity(nsamples);
    let mut current = first;
    samples.push(current as f64);
    for d in diffs.iter().take(nsamples).skip(1) {
        current = current.wrapping_add(*d);
        samples.push(current as f64);
    }

    if current != last {
        log::debug!(
            "Steim reverse integration constant mismatch: last sample {}, expected {}",
            current,
            last
        );
    }

    Ok(samples)
}

fn decode_samples(header: &Header, data: &[u8]) -> Result<Vec<f64>, FdsnError> {
    let order = header.order;
    let n = header.nsamples;
    match header.encoding {
        ENC_INT16 => decode_fixed_width(data, n, 2, |b| order.u16(b) as i16 as f64),
        ENC_INT32 => decode_fixed_width(data, n, 4, |b| order.u32(b) as i32 as f64),
        ENC_FLOAT32 => decode_fixed_width(data, n, 4, |b| f32::from_bits(order.u32(b)) as f64),
        ENC_FLOAT64 => decode_fixed_width(data, n, 8, |b| f64::from_bits(order.u64(b))),
        ENC_STEIM1 => decode_steim(data, n, order, false),
        ENC_STEIM2 => decode_steim(data, n, order, true),
        other => Err(FdsnError::Decode(format!("unsupported encoding {}", other))),
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Splits a byte stream into records and decodes every data record.
///
/// Text records and records without samples (e.g. log or timing records)
/// are skipped.
///
/// # Errors
/// `FdsnError::Decode` for truncated records, unknown encodings, or headers
/// that make no sense.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<Record>, FdsnError> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        // Trailing zero padding is not a record.
        if rest.iter().all(|&b| b == 0) {
            break;
        }

        let header = parse_header(rest)?;
        if header.record_length > rest.len() {
            return Err(FdsnError::Decode(format!(
                "record at byte {} claims {} bytes, only {} remain",
                offset,
                header.record_length,
                rest.len()
            )));
        }
        let record = &rest[..header.record_length];
        offset += header.record_length;

        if header.encoding == ENC_TEXT || header.nsamples == 0 || header.sampling_rate <= 0.0 {
            continue;
        }
        if header.data_offset < FIXED_HEADER_LEN || header.data_offset >= record.len() {
            return Err(FdsnError::Decode(format!(
                "data offset {} outside record of {} bytes",
                header.data_offset,
                record.len()
            )));
        }

        let samples = decode_samples(&header, &record[header.data_offset..])?;
        records.push(Record {
            network: header.network,
            station: header.station,
            location: header.location,
            channel: header.channel,
            start: header.start,
            sampling_rate: header.sampling_rate,
            samples,
        });
    }

    Ok(records)
}

/// Merges records into continuous traces.
///
/// A record extends the latest trace of the same channel when it has the
/// same sampling rate and starts within half a sample of where that trace
/// ends. Anything else (gap, overlap, rate change) opens a new trace.
/// Traces are returned in order of first appearance.
pub fn assemble_traces(records: Vec<Record>) -> Vec<Trace> {
    let mut traces: Vec<Trace> = Vec::new();

    for record in records {
        let continues = traces.iter().rposition(|t| {
            t.network == record.network
                && t.station == record.station
                && t.location == record.location
                && t.channel == record.channel
        });

        if let Some(i) = continues {
            let trace = &mut traces[i];
            let rate = trace.sampling_rate;
            let expected_offset = trace.samples.len() as f64 / rate;
            let actual_offset = (record.start - trace.start)
                .num_microseconds()
                .map(|us| us as f64 / 1e6)
                .unwrap_or(f64::INFINITY);
            let same_rate = (record.sampling_rate - rate).abs() < 1e-6 * rate;
            if same_rate && (actual_offset - expected_offset).abs() <= 0.5 / rate {
                trace.samples.extend(record.samples);
                continue;
            }
        }

        traces.push(Trace {
            network: record.network,
            station: record.station,
            location: record.location,
            channel: record.channel,
            start: record.start,
            sampling_rate: record.sampling_rate,
            samples: record.samples,
        });
    }

    traces
}

/// Decodes a dataselect payload into traces.
///
/// # Errors
/// - `FdsnError::Decode` — the payload is not valid miniSEED.
/// - `FdsnError::NoData` — the payload decoded but holds no samples.
pub fn read_traces(bytes: &[u8]) -> Result<Vec<Trace>, FdsnError> {
    let traces = assemble_traces(decode_records(bytes)?);
    if traces.is_empty() {
        return Err(FdsnError::NoData("payload holds no data records".to_string()));
    }
    Ok(traces)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
