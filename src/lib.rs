/// fdsn_drumplot: stacked "drum plot" of recent acceleration for a list of
/// FDSN seismic stations.
///
/// # Module structure
///
/// ```text
/// fdsn_drumplot
/// ├── model       — shared data types (StationDescriptor, TimeWindow, Trace, FdsnError, …)
/// ├── config      — run configuration loader (fdsn2plot.toml + environment)
/// ├── cli         — command-line flags layered over the configuration
/// ├── stations    — station code list and display-name list loaders
/// ├── drumplot    — one run: per-station fetch/process with fallback, summary
/// ├── ingest
/// │   ├── fdsn       — FDSN dataselect/station services: URL construction + client
/// │   ├── mseed      — miniSEED 2 record decoding (int, float, Steim-1/2)
/// │   ├── stationxml — StationXML response parsing and evaluation
/// │   └── fixtures (test only) — StationXML documents and miniSEED builders
/// ├── processing
/// │   ├── response — instrument response removal to acceleration
/// │   └── filters  — zero-phase Butterworth highpass/lowpass/bandstop
/// └── plot        — stacked panel rendering to PNG, viewer launch
/// ```

/// Public modules
pub mod cli;
pub mod config;
pub mod drumplot;
pub mod ingest;
pub mod model;
pub mod plot;
pub mod processing;
pub mod stations;
