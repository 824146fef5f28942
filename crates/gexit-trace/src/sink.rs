use crate::error::TraceError;
use gexit_model::{DestinationTrace, HopRecord, HopRow, HOP_COLUMNS};
use parking_lot::Mutex;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};

/// Shared destination for raw hop rows. Implementations must write each row
/// whole; rows from different destinations may interleave.
pub trait HopSink: Send + Sync {
    fn record_hop(
        &self,
        destination: &str,
        address: Ipv4Addr,
        hop: &HopRecord,
    ) -> Result<(), TraceError>;

    /// Called once per destination after its last hop.
    fn finish_trace(&self, trace: &DestinationTrace) -> Result<(), TraceError>;
}

/// Raw hop table as CSV, one locked write per row.
pub struct CsvHopSink<W: Write + Send> {
    writer: Mutex<csv::Writer<W>>,
}

impl<W: Write + Send> CsvHopSink<W> {
    pub fn new(inner: W) -> Result<Self, TraceError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(HOP_COLUMNS)?;
        writer.flush().map_err(csv::Error::from)?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    fn write_row(&self, row: &HopRow) -> Result<(), TraceError> {
        let mut writer = self.writer.lock();
        writer.serialize(row)?;
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), TraceError> {
        self.writer.lock().flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, TraceError> {
        self.writer
            .into_inner()
            .into_inner()
            .map_err(|err| TraceError::Sink(csv::Error::from(err.into_error())))
    }
}

impl<W: Write + Send> HopSink for CsvHopSink<W> {
    fn record_hop(
        &self,
        destination: &str,
        address: Ipv4Addr,
        hop: &HopRecord,
    ) -> Result<(), TraceError> {
        self.write_row(&HopRow::from_hop(destination, Some(IpAddr::V4(address)), hop))
    }

    fn finish_trace(&self, trace: &DestinationTrace) -> Result<(), TraceError> {
        match HopRow::marker(trace) {
            Some(row) => self.write_row(&row),
            None => Ok(()),
        }
    }
}
