use crate::classify::classify;
use anyhow::{Context, Result};
use gexit_model::{
    ClassificationResult, ClassificationRow, ExitStatus, HopRecord, HopRow, ParsedRow,
    TraceOutcome, CLASSIFICATION_COLUMNS,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::warn;

/// One destination's hops as read back from the raw table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTrace {
    pub destination: String,
    pub hops: Vec<HopRecord>,
    /// Set when the table carries an unresolvable/all-timeout marker row.
    pub marker: Option<TraceOutcome>,
}

impl RecordedTrace {
    pub fn classify(&self) -> ClassificationResult {
        classify(&self.destination, &self.hops)
    }
}

pub fn read_hop_table_path(path: &Path) -> Result<Vec<RecordedTrace>> {
    let file = File::open(path).with_context(|| format!("failed to open hop table {path:?}"))?;
    read_hop_table(file).with_context(|| format!("failed to read hop table {path:?}"))
}

/// Groups rows by destination, keeping destinations in first-seen order and
/// each destination's hops sorted by hop index. Rows that cannot be read are
/// skipped with a warning.
pub fn read_hop_table<R: Read>(reader: R) -> Result<Vec<RecordedTrace>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut traces: Vec<RecordedTrace> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();

    for (line, row) in reader.deserialize::<HopRow>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                warn!(line = line + 2, error = %err, "skipping unreadable row");
                continue;
            }
        };
        if row.destination.is_empty() {
            continue;
        }

        let slot = *index_of.entry(row.destination.clone()).or_insert_with(|| {
            traces.push(RecordedTrace {
                destination: row.destination.clone(),
                hops: Vec::new(),
                marker: None,
            });
            traces.len() - 1
        });
        let trace = &mut traces[slot];

        match row.parse() {
            Ok(ParsedRow::Hop(hop)) => trace.hops.push(hop),
            Ok(ParsedRow::Marker(outcome)) => trace.marker = Some(outcome),
            Err(err) => {
                warn!(destination = %row.destination, line = line + 2, error = %err, "skipping malformed hop row");
            }
        }
    }

    for trace in &mut traces {
        trace.hops.sort_by_key(|hop| hop.hop_index);
    }

    Ok(traces)
}

pub fn classify_all(traces: &[RecordedTrace]) -> Vec<ClassificationResult> {
    traces.iter().map(RecordedTrace::classify).collect()
}

pub fn write_classification_table<W: Write>(
    writer: W,
    results: &[ClassificationResult],
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    writer.write_record(CLASSIFICATION_COLUMNS)?;
    for result in results {
        writer.serialize(ClassificationRow::from(result))?;
    }
    writer.flush()?;
    Ok(())
}

/// Count of results per status, in a fixed status order.
pub fn status_counts(results: &[ClassificationResult]) -> Vec<(ExitStatus, usize)> {
    ExitStatus::ALL
        .into_iter()
        .map(|status| {
            let count = results.iter().filter(|result| result.status == status).count();
            (status, count)
        })
        .collect()
}
