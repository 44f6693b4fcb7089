/// FDSN web-service client: dataselect (miniSEED) and station (StationXML).
///
/// URL construction is kept in pure `build_*_url` functions so it can be
/// tested without a server. The HTTP side uses a blocking reqwest client
/// with a per-request timeout.
///
/// Status handling follows the FDSN web-service conventions:
///   204 No Content / 404 Not Found  — no data for the request
///   401 with credentials set        — answered once with HTTP Digest
///   other non-2xx                   — server or request error

use chrono::{DateTime, Utc};
use digest_auth::AuthContext;
use reqwest::StatusCode;
use reqwest::blocking::RequestBuilder;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::ingest::mseed;
use crate::ingest::stationxml::{self, ChannelEpoch};
use crate::model::{FdsnError, StationDescriptor, TimeWindow, Trace};

const DATASELECT_PATH: &str = "fdsnws/dataselect/1";
const STATION_PATH: &str = "fdsnws/station/1";

// ---------------------------------------------------------------------------
// Data source seam
// ---------------------------------------------------------------------------

/// Where waveforms and instrument responses come from.
///
/// `FdsnClient` is the production implementation; tests plug in canned
/// data.
pub trait WaveformSource {
    /// Traces for `station` within `window`, in the order the server
    /// returned them.
    fn get_waveforms(
        &self,
        station: &StationDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<Trace>, FdsnError>;

    /// Channel epochs (with responses) for `station` within `window`.
    fn get_response(
        &self,
        station: &StationDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<ChannelEpoch>, FdsnError>;
}

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Blank location codes are spelled `--` in FDSN queries.
fn location_param(location: &str) -> &str {
    if location.trim().is_empty() { "--" } else { location }
}

fn query_string(station: &StationDescriptor, window: &TimeWindow) -> String {
    format!(
        "network={}&station={}&location={}&channel={}&starttime={}&endtime={}",
        urlencoding::encode(&station.network),
        urlencoding::encode(&station.station),
        urlencoding::encode(location_param(&station.location)),
        urlencoding::encode(&station.channel),
        urlencoding::encode(&format_time(window.start)),
        urlencoding::encode(&format_time(window.end)),
    )
}

/// Builds a dataselect URL. `authenticated` selects `queryauth` instead of
/// `query`.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use fdsn_drumplot::ingest::fdsn::build_dataselect_url;
/// use fdsn_drumplot::model::{StationDescriptor, TimeWindow};
///
/// let end = Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap();
/// let url = build_dataselect_url(
///     "http://localhost:8080",
///     &StationDescriptor::new("TC", "ABCD"),
///     &TimeWindow::ending_at(end, 3600),
///     false,
/// );
/// assert!(url.starts_with("http://localhost:8080/fdsnws/dataselect/1/query?network=TC"));
/// ```
pub fn build_dataselect_url(
    base_url: &str,
    station: &StationDescriptor,
    window: &TimeWindow,
    authenticated: bool,
) -> String {
    let method = if authenticated { "queryauth" } else { "query" };
    format!(
        "{}/{}/{}?{}",
        base_url.trim_end_matches('/'),
        DATASELECT_PATH,
        method,
        query_string(station, window)
    )
}

/// Builds a station-service URL asking for full responses.
pub fn build_station_url(base_url: &str, station: &StationDescriptor, window: &TimeWindow) -> String {
    format!(
        "{}/{}/query?{}&level=response",
        base_url.trim_end_matches('/'),
        STATION_PATH,
        query_string(station, window)
    )
}

/// Path and query of `url`, the `uri` a Digest answer is computed over.
fn request_uri(url: &str) -> Result<String, FdsnError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FdsnError::Http(format!("bad URL {}: {}", url, e)))?;
    Ok(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct FdsnClient {
    base_url: String,
    credentials: Option<(String, String)>,
    http: reqwest::blocking::Client,
}

impl FdsnClient {
    /// Creates a client for the configured server.
    ///
    /// # Errors
    /// `FdsnError::Http` if the HTTP client cannot be constructed (e.g. TLS
    /// backend failure).
    pub fn new(config: &ServerConfig) -> Result<Self, FdsnError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("fdsn_drumplot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FdsnError::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.clone(),
            credentials: config
                .credentials()
                .map(|(u, p)| (u.to_string(), p.to_string())),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, FdsnError> {
        log::debug!("GET {}", url);

        let mut response = self.http.get(url).send()?;
        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some((user, password)) = &self.credentials {
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                response = self.answer_challenge(url, user, password, &challenge)?.send()?;
            }
        }

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Err(FdsnError::NoData(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(FdsnError::Http(format!("HTTP {} from {}", status, url)));
        }

        Ok(response.bytes()?.to_vec())
    }

    /// Repeats the request for `url` with credentials for `challenge`.
    /// Digest when offered, Basic otherwise.
    fn answer_challenge(
        &self,
        url: &str,
        user: &str,
        password: &str,
        challenge: &str,
    ) -> Result<RequestBuilder, FdsnError> {
        let request = self.http.get(url);
        if !challenge.trim_start().to_ascii_lowercase().starts_with("digest") {
            log::debug!("No Digest challenge from {}, sending Basic credentials", url);
            return Ok(request.basic_auth(user, Some(password)));
        }

        let mut prompt = digest_auth::parse(challenge)
            .map_err(|e| FdsnError::Http(format!("bad Digest challenge from {}: {}", url, e)))?;
        let context = AuthContext::new(user, password, request_uri(url)?);
        let answer = prompt
            .respond(&context)
            .map_err(|e| FdsnError::Http(format!("cannot answer Digest challenge from {}: {}", url, e)))?;
        Ok(request.header(AUTHORIZATION, answer.to_header_string()))
    }
}

impl WaveformSource for FdsnClient {
    fn get_waveforms(
        &self,
        station: &StationDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<Trace>, FdsnError> {
        let url = build_dataselect_url(&self.base_url, station, window, self.credentials.is_some());
        let bytes = self.fetch(&url)?;
        mseed::read_traces(&bytes)
    }

    fn get_response(
        &self,
        station: &StationDescriptor,
        window: &TimeWindow,
    ) -> Result<Vec<ChannelEpoch>, FdsnError> {
        let url = build_station_url(&self.base_url, station, window);
        let bytes = self.fetch(&url)?;
        let epochs = stationxml::parse_station_xml(&String::from_utf8_lossy(&bytes))?;
        if epochs.is_empty() {
            return Err(FdsnError::MissingResponse(format!(
                "station service returned no channels for {}",
                station.code()
            )));
        }
        Ok(epochs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
