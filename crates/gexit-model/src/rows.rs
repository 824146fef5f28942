//! Flat table rows for the raw hop table and the classification table.

use crate::{ClassificationResult, DestinationTrace, EnrichmentRecord, HopRecord, TraceOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Placeholder for a lost probe or a silent hop.
pub const SENTINEL: &str = "*";
pub const NOT_APPLICABLE: &str = "N/A";
pub const UNRESOLVABLE_MARKER: &str = "Unresolvable";
pub const ALL_TIMEOUT_MARKER: &str = "All hops timeout";

pub const HOP_COLUMNS: [&str; 14] = [
    "destination",
    "destination_address",
    "hop_index",
    "responder_address",
    "organization",
    "city",
    "region",
    "country",
    "coordinates",
    "postal_code",
    "timezone",
    "rtt_sample_1",
    "rtt_sample_2",
    "rtt_sample_3",
];

pub const CLASSIFICATION_COLUMNS: [&str; 8] = [
    "destination",
    "last_google_hop_index",
    "last_google_address",
    "exit_hop_index",
    "exit_address",
    "hops_before_exit",
    "median_rtt_to_last_google_hop",
    "status",
];

/// One line of the raw hop table. Every cell is text so rows written by
/// older runs or by hand still load; `parse` does the interpretation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HopRow {
    pub destination: String,
    pub destination_address: String,
    pub hop_index: String,
    pub responder_address: String,
    pub organization: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub coordinates: String,
    pub postal_code: String,
    pub timezone: String,
    pub rtt_sample_1: String,
    pub rtt_sample_2: String,
    pub rtt_sample_3: String,
}

/// What a raw row turned out to hold when read back.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRow {
    Hop(HopRecord),
    Marker(TraceOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowError {
    HopIndex(String),
    Address(String),
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowError::HopIndex(value) => write!(f, "invalid hop index: {value:?}"),
            RowError::Address(value) => write!(f, "invalid responder address: {value:?}"),
        }
    }
}

impl std::error::Error for RowError {}

impl HopRow {
    pub fn from_hop(destination: &str, destination_address: Option<IpAddr>, hop: &HopRecord) -> Self {
        let enrichment = hop.enrichment.clone().unwrap_or_default();
        let mut samples = hop.rtt_ms.iter().map(|sample| format_sample(*sample));
        let mut next_sample = || samples.next().unwrap_or_else(|| SENTINEL.to_string());

        Self {
            destination: destination.to_string(),
            destination_address: format_address(destination_address),
            hop_index: hop.hop_index.to_string(),
            responder_address: hop
                .responder
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| SENTINEL.to_string()),
            organization: enrichment.organization,
            city: enrichment.city,
            region: enrichment.region,
            country: enrichment.country,
            coordinates: enrichment.coordinates,
            postal_code: enrichment.postal_code,
            timezone: enrichment.timezone,
            rtt_sample_1: next_sample(),
            rtt_sample_2: next_sample(),
            rtt_sample_3: next_sample(),
        }
    }

    /// Terminal row for a destination that never produced hops, or whose hops
    /// all timed out. `None` for anything else.
    pub fn marker(trace: &DestinationTrace) -> Option<Self> {
        let label = match trace.outcome {
            TraceOutcome::Unresolvable => UNRESOLVABLE_MARKER,
            TraceOutcome::AllTimedOut => ALL_TIMEOUT_MARKER,
            TraceOutcome::Reached | TraceOutcome::HopLimit => return None,
        };
        Some(Self {
            destination: trace.destination.clone(),
            destination_address: format_address(trace.destination_address),
            hop_index: NOT_APPLICABLE.to_string(),
            responder_address: label.to_string(),
            ..Self::default()
        })
    }

    /// Every row a finished trace contributes to the raw table.
    pub fn rows_for(trace: &DestinationTrace) -> Vec<Self> {
        let mut rows: Vec<Self> = trace
            .hops
            .iter()
            .map(|hop| Self::from_hop(&trace.destination, trace.destination_address, hop))
            .collect();
        rows.extend(Self::marker(trace));
        rows
    }

    /// Reads the row back. Non-numeric samples become sentinels.
    pub fn parse(&self) -> Result<ParsedRow, RowError> {
        match self.responder_address.trim() {
            UNRESOLVABLE_MARKER => return Ok(ParsedRow::Marker(TraceOutcome::Unresolvable)),
            ALL_TIMEOUT_MARKER => return Ok(ParsedRow::Marker(TraceOutcome::AllTimedOut)),
            _ => {}
        }

        let hop_index: u32 = self
            .hop_index
            .trim()
            .parse()
            .map_err(|_| RowError::HopIndex(self.hop_index.clone()))?;

        let responder = match self.responder_address.trim() {
            "" | SENTINEL => None,
            value => Some(
                value
                    .parse::<IpAddr>()
                    .map_err(|_| RowError::Address(value.to_string()))?,
            ),
        };

        let rtt_ms: Vec<Option<f64>> = [&self.rtt_sample_1, &self.rtt_sample_2, &self.rtt_sample_3]
            .into_iter()
            .map(|value| parse_sample(value))
            .collect();

        let enrichment = responder.map(|_| EnrichmentRecord {
            organization: self.organization.clone(),
            city: self.city.clone(),
            region: self.region.clone(),
            country: self.country.clone(),
            coordinates: self.coordinates.clone(),
            postal_code: self.postal_code.clone(),
            timezone: self.timezone.clone(),
        });

        Ok(ParsedRow::Hop(HopRecord {
            hop_index,
            responder,
            rtt_ms,
            enrichment,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationRow {
    pub destination: String,
    pub last_google_hop_index: Option<u32>,
    pub last_google_address: Option<String>,
    pub exit_hop_index: Option<u32>,
    pub exit_address: Option<String>,
    pub hops_before_exit: Option<u32>,
    pub median_rtt_to_last_google_hop: Option<f64>,
    pub status: String,
}

impl From<&ClassificationResult> for ClassificationRow {
    fn from(result: &ClassificationResult) -> Self {
        Self {
            destination: result.destination.clone(),
            last_google_hop_index: result.last_google_hop_index,
            last_google_address: result.last_google_address.map(|ip| ip.to_string()),
            exit_hop_index: result.exit_hop_index,
            exit_address: result.exit_address.map(|ip| ip.to_string()),
            hops_before_exit: result.hops_before_exit,
            median_rtt_to_last_google_hop: result.median_rtt_to_last_google_hop,
            status: result.status.as_str().to_string(),
        }
    }
}

fn format_address(address: Option<IpAddr>) -> String {
    address
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| NOT_APPLICABLE.to_string())
}

fn format_sample(sample: Option<f64>) -> String {
    match sample {
        Some(value) => value.to_string(),
        None => SENTINEL.to_string(),
    }
}

fn parse_sample(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google() -> EnrichmentRecord {
        EnrichmentRecord {
            organization: "AS15169 Google LLC".to_string(),
            city: "Mountain View".to_string(),
            country: "US".to_string(),
            ..EnrichmentRecord::default()
        }
    }

    #[test]
    fn hop_row_pads_missing_samples_with_sentinels() {
        let hop = HopRecord {
            hop_index: 7,
            responder: Some("142.250.1.1".parse().unwrap()),
            rtt_ms: vec![Some(14.25)],
            enrichment: Some(google()),
        };
        let row = HopRow::from_hop("example.com", Some("93.184.216.34".parse().unwrap()), &hop);

        assert_eq!(row.hop_index, "7");
        assert_eq!(row.responder_address, "142.250.1.1");
        assert_eq!(row.organization, "AS15169 Google LLC");
        assert_eq!(row.rtt_sample_1, "14.25");
        assert_eq!(row.rtt_sample_2, "*");
        assert_eq!(row.rtt_sample_3, "*");
    }

    #[test]
    fn timeout_row_reads_back_without_enrichment() {
        let row = HopRow::from_hop("example.com", None, &HopRecord::timeout(3, 3));
        assert_eq!(row.destination_address, "N/A");
        assert_eq!(row.responder_address, "*");

        match row.parse().unwrap() {
            ParsedRow::Hop(hop) => {
                assert_eq!(hop.hop_index, 3);
                assert!(hop.responder.is_none());
                assert!(hop.enrichment.is_none());
                assert_eq!(hop.rtt_ms, vec![None, None, None]);
            }
            other => panic!("unexpected row: {other:?}"),
        }
    }

    #[test]
    fn marker_rows_only_for_silent_outcomes() {
        let mut trace = DestinationTrace::unresolvable("nowhere.invalid");
        let row = HopRow::marker(&trace).unwrap();
        assert_eq!(row.hop_index, "N/A");
        assert_eq!(row.responder_address, UNRESOLVABLE_MARKER);
        assert_eq!(row.parse().unwrap(), ParsedRow::Marker(TraceOutcome::Unresolvable));

        trace.outcome = TraceOutcome::Reached;
        assert!(HopRow::marker(&trace).is_none());
    }

    #[test]
    fn garbage_samples_are_skipped_not_fatal() {
        let row = HopRow {
            destination: "example.com".to_string(),
            hop_index: "2".to_string(),
            responder_address: "10.1.1.1".to_string(),
            rtt_sample_1: "fast".to_string(),
            rtt_sample_2: "8.5".to_string(),
            rtt_sample_3: "".to_string(),
            ..HopRow::default()
        };
        match row.parse().unwrap() {
            ParsedRow::Hop(hop) => {
                assert_eq!(hop.rtt_ms, vec![None, Some(8.5), None]);
                assert_eq!(hop.median_rtt_ms(), Some(8.5));
            }
            other => panic!("unexpected row: {other:?}"),
        }
    }

    #[test]
    fn bad_hop_index_is_reported() {
        let row = HopRow {
            hop_index: "first".to_string(),
            responder_address: "10.1.1.1".to_string(),
            ..HopRow::default()
        };
        assert_eq!(row.parse(), Err(RowError::HopIndex("first".to_string())));
    }
}
