//! Shared helpers for integration tests: a mock FDSN server on localhost
//! and builders for the payloads it serves.
//!
//! The server answers:
//! - `/fdsnws/dataselect/1/query` with big-endian int32 miniSEED holding a
//!   1 Hz sine of 1000 counts at 100 Hz, starting at the requested
//!   `starttime` and covering `seconds` of data; stations named `EMPTY...` get 204
//! - `/fdsnws/station/1/query` with a flat accelerometer response of 1e5
//!   counts per m/s² for the requested station
//! - anything else with 404
//!
//! [`start_digest_fdsn`] additionally guards `queryauth` behind an HTTP
//! Digest challenge.

#![allow(dead_code)]

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::thread;

pub const SAMPLE_RATE: i16 = 100;
pub const RECORD_SAMPLES: usize = 1000;

// ---------------------------------------------------------------------------
// miniSEED
// ---------------------------------------------------------------------------

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_be_bytes());
}

fn put_ascii(buf: &mut [u8], at: usize, width: usize, s: &str) {
    for i in 0..width {
        buf[at + i] = s.as_bytes().get(i).copied().unwrap_or(b' ');
    }
}

/// One big-endian int32 miniSEED 2 record with a blockette 1000.
pub fn int32_record(network: &str, station: &str, channel: &str, start: DateTime<Utc>, samples: &[i32]) -> Vec<u8> {
    let data: Vec<u8> = samples.iter().flat_map(|s| s.to_be_bytes()).collect();
    let mut exponent = 8u8;
    while (1usize << exponent) < 64 + data.len() {
        exponent += 1;
    }
    let mut buf = vec![0u8; 1usize << exponent];

    buf[0..6].copy_from_slice(b"000001");
    buf[6] = b'D';
    buf[7] = b' ';
    put_ascii(&mut buf, 8, 5, station);
    put_ascii(&mut buf, 13, 2, "");
    put_ascii(&mut buf, 15, 3, channel);
    put_ascii(&mut buf, 18, 2, network);

    put_u16(&mut buf, 20, start.year() as u16);
    put_u16(&mut buf, 22, start.ordinal() as u16);
    buf[24] = start.hour() as u8;
    buf[25] = start.minute() as u8;
    buf[26] = start.second() as u8;
    put_u16(&mut buf, 28, (start.nanosecond() / 100_000) as u16);

    put_u16(&mut buf, 30, samples.len() as u16);
    put_u16(&mut buf, 32, SAMPLE_RATE as u16);
    put_u16(&mut buf, 34, 1);
    buf[39] = 1;
    put_u16(&mut buf, 44, 64);
    put_u16(&mut buf, 46, 48);

    put_u16(&mut buf, 48, 1000);
    put_u16(&mut buf, 50, 0);
    buf[52] = 3;
    buf[53] = 1;
    buf[54] = exponent;

    buf[64..64 + data.len()].copy_from_slice(&data);
    buf
}

/// Contiguous records of a 1 Hz, 1000-count sine covering `seconds`.
pub fn sine_payload(network: &str, station: &str, start: DateTime<Utc>, seconds: i64) -> Vec<u8> {
    let total = seconds as usize * SAMPLE_RATE as usize;
    let rate = SAMPLE_RATE as f64;
    let samples: Vec<i32> = (0..total)
        .map(|i| (1000.0 * (2.0 * PI * i as f64 / rate).sin()).round() as i32)
        .collect();

    let mut out = Vec::new();
    for (n, chunk) in samples.chunks(RECORD_SAMPLES).enumerate() {
        let offset_us = (n * RECORD_SAMPLES) as i64 * 1_000_000 / SAMPLE_RATE as i64;
        let record_start = start + chrono::Duration::microseconds(offset_us);
        out.extend(int32_record(network, station, "HNZ", record_start, chunk));
    }
    out
}

// ---------------------------------------------------------------------------
// StationXML
// ---------------------------------------------------------------------------

pub fn accelerometer_xml(network: &str, station: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<FDSNStationXML xmlns="http://www.fdsn.org/xml/station/1" schemaVersion="1.1">
  <Source>mock</Source>
  <Network code="{net}">
    <Station code="{sta}">
      <Channel code="HNZ" locationCode="" startDate="2015-01-01T00:00:00">
        <SampleRate>100</SampleRate>
        <Response>
          <InstrumentSensitivity>
            <Value>100000</Value>
            <Frequency>1.0</Frequency>
            <InputUnits><Name>M/S**2</Name></InputUnits>
            <OutputUnits><Name>COUNTS</Name></OutputUnits>
          </InstrumentSensitivity>
          <Stage number="1">
            <StageGain>
              <Value>100000</Value>
              <Frequency>1.0</Frequency>
            </StageGain>
          </Stage>
        </Response>
      </Channel>
    </Station>
  </Network>
</FDSNStationXML>"#,
        net = network,
        sta = station
    )
}

// ---------------------------------------------------------------------------
// Mock server
// ---------------------------------------------------------------------------

fn query_params(url: &str) -> HashMap<String, String> {
    url.split_once('?')
        .map(|(_, q)| q)
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| {
            let value = urlencoding::decode(v).map(|s| s.into_owned()).unwrap_or_else(|_| v.to_string());
            (k.to_string(), value)
        })
        .collect()
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|t| t.and_utc())
}

pub const DIGEST_REALM: &str = "FDSN";
const DIGEST_NONCE: &str = "4c1c9a3e8f5b2d7a";

fn digest_challenge() -> tiny_http::Header {
    let value = format!(
        r#"Digest realm="{}", qop="auth", nonce="{}", opaque="a1b2c3""#,
        DIGEST_REALM, DIGEST_NONCE
    );
    tiny_http::Header::from_bytes(&b"WWW-Authenticate"[..], value.as_bytes()).expect("valid header")
}

/// Value of `key` among the comma-separated Digest parameters.
fn digest_field<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    header
        .strip_prefix("Digest ")?
        .split(',')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.trim_matches('"'))
}

/// True when the request answers the challenge for `user`.
fn digest_accepted(request: &tiny_http::Request, user: &str) -> bool {
    let Some(header) = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string())
    else {
        return false;
    };
    digest_field(&header, "username") == Some(user)
        && digest_field(&header, "realm") == Some(DIGEST_REALM)
        && digest_field(&header, "nonce") == Some(DIGEST_NONCE)
        && digest_field(&header, "uri") == Some(request.url())
        && digest_field(&header, "response").is_some_and(|r| r.len() == 32)
}

/// Starts the mock server in a background thread and returns its base URL.
/// Each dataselect response holds `seconds` of data from `starttime`.
pub fn start_mock_fdsn(seconds: i64) -> String {
    spawn_mock(seconds, None)
}

/// Like [`start_mock_fdsn`], but `queryauth` answers 401 with a Digest
/// challenge until a request carries a Digest answer for `user`.
pub fn start_digest_fdsn(seconds: i64, user: &'static str) -> String {
    spawn_mock(seconds, Some(user))
}

fn spawn_mock(seconds: i64, digest_user: Option<&'static str>) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("mock server binds");
    let addr = server
        .server_addr()
        .to_ip()
        .expect("mock server has an IP address");

    thread::spawn(move || {
        for request in server.incoming_requests() {
            let url = request.url().to_string();
            let params = query_params(&url);
            let network = params.get("network").cloned().unwrap_or_default();
            let station = params.get("station").cloned().unwrap_or_default();

            let locked = digest_user.is_some_and(|user| {
                url.starts_with("/fdsnws/dataselect/1/queryauth") && !digest_accepted(&request, user)
            });

            let response = if locked {
                tiny_http::Response::from_data(b"unauthorized".to_vec())
                    .with_status_code(tiny_http::StatusCode(401))
                    .with_header(digest_challenge())
            } else if url.starts_with("/fdsnws/dataselect/1/") {
                let start = params.get("starttime").and_then(|s| parse_time(s));
                match start {
                    Some(start) if !station.starts_with("EMPTY") => {
                        tiny_http::Response::from_data(sine_payload(&network, &station, start, seconds))
                    }
                    _ => tiny_http::Response::from_data(Vec::new()).with_status_code(tiny_http::StatusCode(204)),
                }
            } else if url.starts_with("/fdsnws/station/1/query") {
                tiny_http::Response::from_data(accelerometer_xml(&network, &station).into_bytes())
            } else {
                tiny_http::Response::from_data(b"not found".to_vec()).with_status_code(tiny_http::StatusCode(404))
            };

            let _ = request.respond(response);
        }
    });

    format!("http://{}", addr)
}
