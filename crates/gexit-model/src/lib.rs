//! Shared data structures for the Google exit survey.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

pub mod rows;

pub use rows::{
    ClassificationRow, HopRow, ParsedRow, RowError, ALL_TIMEOUT_MARKER, CLASSIFICATION_COLUMNS,
    HOP_COLUMNS, NOT_APPLICABLE, SENTINEL, UNRESOLVABLE_MARKER,
};

/// Organization and location data for one responder address.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentRecord {
    pub organization: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub coordinates: String,
    pub postal_code: String,
    pub timezone: String,
}

impl EnrichmentRecord {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One TTL step of a trace. `responder` is `None` when every probe timed out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HopRecord {
    pub hop_index: u32,
    pub responder: Option<IpAddr>,
    pub rtt_ms: Vec<Option<f64>>,
    pub enrichment: Option<EnrichmentRecord>,
}

impl HopRecord {
    pub fn timeout(hop_index: u32, probes: usize) -> Self {
        Self {
            hop_index,
            responder: None,
            rtt_ms: vec![None; probes],
            enrichment: None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.responder.is_none()
    }

    pub fn organization(&self) -> &str {
        self.enrichment
            .as_ref()
            .map(|record| record.organization.as_str())
            .unwrap_or("")
    }

    /// Median over the samples that got a reply.
    pub fn median_rtt_ms(&self) -> Option<f64> {
        median(self.rtt_ms.iter().copied().flatten())
    }
}

/// How a destination's TTL ladder ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    /// A probe got an end-of-path reply.
    Reached,
    /// `max_hops` was probed without an end-of-path reply.
    HopLimit,
    /// No probe at any TTL got a reply.
    AllTimedOut,
    /// The destination name did not resolve; nothing was probed.
    Unresolvable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DestinationTrace {
    pub destination: String,
    pub destination_address: Option<IpAddr>,
    pub hops: Vec<HopRecord>,
    pub outcome: TraceOutcome,
}

impl DestinationTrace {
    pub fn unresolvable(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            destination_address: None,
            hops: Vec::new(),
            outcome: TraceOutcome::Unresolvable,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    ExitedGoogle,
    TimeoutAfterLastGoogle,
    UnknownExit,
    NoGoogleNode,
}

impl ExitStatus {
    pub const ALL: [ExitStatus; 4] = [
        ExitStatus::ExitedGoogle,
        ExitStatus::TimeoutAfterLastGoogle,
        ExitStatus::UnknownExit,
        ExitStatus::NoGoogleNode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::ExitedGoogle => "Exited Google",
            ExitStatus::TimeoutAfterLastGoogle => "Timeout after last Google hop",
            ExitStatus::UnknownExit => "Unknown exit",
            ExitStatus::NoGoogleNode => "No Google node found",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == label)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub destination: String,
    pub last_google_hop_index: Option<u32>,
    pub last_google_address: Option<IpAddr>,
    pub exit_hop_index: Option<u32>,
    pub exit_address: Option<IpAddr>,
    pub hops_before_exit: Option<u32>,
    pub median_rtt_to_last_google_hop: Option<f64>,
    pub status: ExitStatus,
}

impl ClassificationResult {
    pub fn no_google_node(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            last_google_hop_index: None,
            last_google_address: None,
            exit_hop_index: None,
            exit_address: None,
            hops_before_exit: None,
            median_rtt_to_last_google_hop: None,
            status: ExitStatus::NoGoogleNode,
        }
    }
}

/// Median of the given values; the mean of the two middle values for an even
/// count, `None` for no values.
pub fn median<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
