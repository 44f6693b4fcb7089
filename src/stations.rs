/// Station list loader for the drum plot.
///
/// Two plain-text inputs drive a run:
///
/// - the code list, one `<network> <station>` pair per line (the station may
///   also be written `NET.STA`), which decides what gets plotted and in which
///   order;
/// - the name list, `<station> <display name...>`, used only for labels.
///
/// The code list is mandatory and must yield at least one entry. The name
/// list is a convenience; missing entries fall back to the station code.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::StationDescriptor;

#[derive(Debug, Error)]
pub enum StationListError {
    #[error("failed to read station list {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no stations defined in {0}")]
    Empty(String),
}

// ---------------------------------------------------------------------------
// Code list
// ---------------------------------------------------------------------------

/// Extracts the station code from the second column, which may be written
/// either `STA` or `NET.STA`.
pub fn station_code(token: &str) -> &str {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() == 2 { parts[1] } else { token }
}

/// Parses the contents of a station code list.
///
/// Lines with fewer than two whitespace-separated tokens are skipped, as are
/// `#` comments. Order is preserved and duplicates are kept.
pub fn parse_station_list(contents: &str, location: &str, channel: &str) -> Vec<StationDescriptor> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let network = tokens.next()?;
            let station = tokens.next()?;
            Some(StationDescriptor {
                network: network.to_string(),
                station: station_code(station).to_string(),
                location: location.to_string(),
                channel: channel.to_string(),
            })
        })
        .collect()
}

/// Loads the station code list.
///
/// # Errors
/// - `StationListError::Read` — the file is missing or unreadable.
/// - `StationListError::Empty` — the file has no usable entries.
pub fn load_station_list(
    path: &Path,
    location: &str,
    channel: &str,
) -> Result<Vec<StationDescriptor>, StationListError> {
    let contents = fs::read_to_string(path).map_err(|source| StationListError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let stations = parse_station_list(&contents, location, channel);
    if stations.is_empty() {
        return Err(StationListError::Empty(path.display().to_string()));
    }
    Ok(stations)
}

// ---------------------------------------------------------------------------
// Display names
// ---------------------------------------------------------------------------

/// Station code → human-readable name lookup.
#[derive(Debug, Clone, Default)]
pub struct StationNames {
    names: HashMap<String, String>,
}

impl StationNames {
    /// Parses `<code> <name...>` lines. The name is everything after the
    /// first run of whitespace; lines without a name are ignored. A repeated
    /// code keeps its last name.
    pub fn parse(contents: &str) -> Self {
        let names = contents
            .lines()
            .map(str::trim)
            .filter_map(|line| {
                let (code, rest) = line.split_once(char::is_whitespace)?;
                let name = rest.trim();
                if code.is_empty() || name.is_empty() {
                    return None;
                }
                Some((code.to_string(), name.to_string()))
            })
            .collect();
        Self { names }
    }

    /// Loads the name list. A missing or unreadable file is not fatal: it is
    /// logged and every station keeps its bare code.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) => {
                log::warn!("Station names unavailable ({}): {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Display name for `code`, or the code itself.
    pub fn display_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.names.get(code).map(String::as_str).unwrap_or(code)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
