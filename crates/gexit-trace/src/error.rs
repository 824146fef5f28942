//! Error types for probing and enrichment.

use std::net::IpAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("failed to open probe socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error("failed to write hop row: {0}")]
    Sink(#[from] csv::Error),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("trace for {destination} did not complete ({missing} of {submitted} destinations missing)")]
    Incomplete {
        destination: String,
        missing: usize,
        submitted: usize,
    },
}

/// Failure of a single enrichment request. Never cached.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("lookup request for {addr} failed: {source}")]
    Request {
        addr: IpAddr,
        #[source]
        source: reqwest::Error,
    },

    #[error("lookup for {addr} returned status {status}")]
    Status { addr: IpAddr, status: u16 },

    #[error("lookup for {addr} returned a malformed body: {reason}")]
    Malformed { addr: IpAddr, reason: String },
}
