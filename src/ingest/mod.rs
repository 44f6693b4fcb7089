/// Data retrieval from FDSN web services.
pub mod fdsn;
pub mod mseed;
pub mod stationxml;

#[cfg(test)]
pub(crate) mod fixtures;
